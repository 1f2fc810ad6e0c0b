//! Generic webhook envelope.

use chrono::SecondsFormat;
use serde::Serialize;

use crate::Result;
use crate::database::models::EventDbModel;

/// JSON envelope POSTed to generic webhooks.
///
/// Field order is fixed by the struct so the rendered body is byte-stable.
#[derive(Debug, Serialize)]
pub struct WebhookEnvelope<'a> {
    pub event_id: &'a str,
    pub account_id: &'a str,
    pub event_type: &'a str,
    pub severity: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub node_id: &'a str,
    pub node_alias: &'a str,
    pub data: serde_json::Value,
    pub timestamp: String,
}

impl<'a> WebhookEnvelope<'a> {
    pub fn from_event(event: &'a EventDbModel) -> Self {
        Self {
            event_id: &event.id,
            account_id: &event.account_id,
            event_type: &event.event_type,
            severity: &event.severity,
            title: &event.title,
            description: &event.description,
            node_id: &event.node_id,
            node_alias: &event.node_alias,
            data: event.data_value(),
            timestamp: event
                .timestamp_utc()
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }
}

/// Render the webhook body for an event.
pub fn build_payload(event: &EventDbModel) -> Result<String> {
    Ok(serde_json::to_string(&WebhookEnvelope::from_event(event))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{EventType, Severity};

    fn event() -> EventDbModel {
        EventDbModel::new(
            "acct-1",
            "03abcdef",
            "alice",
            EventType::InvoiceSettled,
            Severity::Info,
            "Invoice settled",
            "Received 1000 sats",
            &serde_json::json!({"amount_sat": 1000, "memo": "coffee"}),
            1_700_000_000_123_456_000,
        )
    }

    #[test]
    fn test_build_payload() {
        let event = event();
        let body = build_payload(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(value["event_id"], event.id.as_str());
        assert_eq!(value["account_id"], "acct-1");
        assert_eq!(value["event_type"], "InvoiceSettled");
        assert_eq!(value["severity"], "Info");
        assert_eq!(value["title"], "Invoice settled");
        assert_eq!(value["description"], "Received 1000 sats");
        assert_eq!(value["data"]["amount_sat"], 1000);
        assert_eq!(value["timestamp"], "2023-11-14T22:13:20.123456Z");
    }

    #[test]
    fn test_payload_is_byte_stable() {
        let event = event();
        assert_eq!(build_payload(&event).unwrap(), build_payload(&event).unwrap());
        assert!(build_payload(&event).unwrap().starts_with(r#"{"event_id":"#));
    }
}
