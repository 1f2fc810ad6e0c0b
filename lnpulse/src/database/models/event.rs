//! Event database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{now_ms, ns_to_datetime};

/// Event database model.
/// An immutable fact observed on a monitored node.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct EventDbModel {
    pub id: String,
    pub account_id: String,
    pub node_id: String,
    pub node_alias: String,
    /// Event type: InvoiceCreated, InvoiceSettled, ...
    pub event_type: String,
    /// Severity: Info, Warning, Error
    pub severity: String,
    pub title: String,
    pub description: String,
    /// JSON blob with the type-specific payload
    pub data: String,
    /// When the node action happened (epoch ns)
    pub timestamp: i64,
    /// When the event was ingested (epoch ms)
    pub created_at: i64,
    pub idempotency_key: Option<String>,
}

impl EventDbModel {
    /// Build a new event with a generated id and ingestion time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: impl Into<String>,
        node_id: impl Into<String>,
        node_alias: impl Into<String>,
        event_type: EventType,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        data: &serde_json::Value,
        timestamp: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            node_id: node_id.into(),
            node_alias: node_alias.into(),
            event_type: event_type.as_str().to_string(),
            severity: severity.as_str().to_string(),
            title: title.into(),
            description: description.into(),
            data: data.to_string(),
            timestamp,
            created_at: now_ms(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Parsed `event_type`; `None` for rows written by a newer version.
    pub fn get_event_type(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    pub fn get_severity(&self) -> Option<Severity> {
        Severity::parse(&self.severity)
    }

    /// Parsed `data`, `Null` if the stored blob is not valid JSON.
    pub fn data_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.data).unwrap_or(serde_json::Value::Null)
    }

    pub fn timestamp_utc(&self) -> chrono::DateTime<chrono::Utc> {
        ns_to_datetime(self.timestamp)
    }
}

/// Lightning node event types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    utoipa::ToSchema,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    InvoiceCreated,
    InvoiceSettled,
    InvoiceCancelled,
    InvoiceAccepted,
    ChannelOpened,
    ChannelClosed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceCreated => "InvoiceCreated",
            Self::InvoiceSettled => "InvoiceSettled",
            Self::InvoiceCancelled => "InvoiceCancelled",
            Self::InvoiceAccepted => "InvoiceAccepted",
            Self::ChannelOpened => "ChannelOpened",
            Self::ChannelClosed => "ChannelClosed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Human readable label used in chat embeds.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvoiceCreated => "Invoice Created",
            Self::InvoiceSettled => "Invoice Settled",
            Self::InvoiceCancelled => "Invoice Cancelled",
            Self::InvoiceAccepted => "Invoice Accepted",
            Self::ChannelOpened => "Channel Opened",
            Self::ChannelClosed => "Channel Closed",
        }
    }
}

/// Event severity levels.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    utoipa::ToSchema,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

/// Filters for listing events.
#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    pub event_type: Option<EventType>,
    pub severity: Option<Severity>,
    pub node_id: Option<String>,
    /// Inclusive lower bound on `timestamp` (epoch ns)
    pub start: Option<i64>,
    /// Inclusive upper bound on `timestamp` (epoch ns)
    pub end: Option<i64>,
}

/// Position in the `timestamp DESC, id DESC` ordering, used to resume a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    pub timestamp: i64,
    pub id: String,
}

impl EventCursor {
    pub fn after(event: &EventDbModel) -> Self {
        Self {
            timestamp: event.timestamp,
            id: event.id.clone(),
        }
    }

    /// Opaque page token: `<timestamp>_<id>`.
    pub fn encode(&self) -> String {
        format!("{}_{}", self.timestamp, self.id)
    }

    pub fn decode(token: &str) -> Option<Self> {
        let (ts, id) = token.split_once('_')?;
        if id.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: ts.parse().ok()?,
            id: id.to_string(),
        })
    }
}

/// Per-severity event counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SeverityStats {
    pub info: i64,
    pub warning: i64,
    pub error: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_event_type_round_trip() {
        for ty in EventType::iter() {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
            assert_eq!(ty.to_string(), ty.as_str());
        }
        assert_eq!(EventType::parse("InvoicePaid"), None);
        assert_eq!(EventType::parse("invoicesettled"), None);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("Info"), Some(Severity::Info));
        assert_eq!(Severity::parse("Warning"), Some(Severity::Warning));
        assert_eq!(Severity::parse("Error"), Some(Severity::Error));
        assert_eq!(Severity::parse("Critical"), None);
    }

    #[test]
    fn test_new_event() {
        let event = EventDbModel::new(
            "acct",
            "node-1",
            "alice",
            EventType::InvoiceSettled,
            Severity::Info,
            "Invoice settled",
            "1000 sats",
            &serde_json::json!({"amount_sat": 1000}),
            1_700_000_000_000,
        )
        .with_idempotency_key("hash-1");

        assert_eq!(event.event_type, "InvoiceSettled");
        assert_eq!(event.severity, "Info");
        assert_eq!(event.data_value()["amount_sat"], 1000);
        assert_eq!(event.idempotency_key.as_deref(), Some("hash-1"));
        assert!(uuid::Uuid::parse_str(&event.id).is_ok());
    }

    #[test]
    fn test_cursor_token() {
        let cursor = EventCursor {
            timestamp: 42,
            id: "a_b".to_string(),
        };
        let token = cursor.encode();
        assert_eq!(EventCursor::decode(&token), Some(cursor));
        assert_eq!(EventCursor::decode("garbage"), None);
        assert_eq!(EventCursor::decode("12_"), None);
    }
}
