//! Channel-specific payload rendering.
//!
//! Rendering is pure: the same (event, endpoint) pair always yields the same
//! bytes, so a body stored at enqueue time is re-sent unchanged on every retry
//! and its signature stays valid.

pub mod discord;
pub mod webhook;

use crate::database::models::{EventDbModel, NotificationDbModel, NotificationType};
use crate::notification::signing::{self, SIGNATURE_HEADER};
use crate::{Error, Result};

/// Header carrying the event id on every outbound request.
pub const EVENT_ID_HEADER: &str = "X-Webhook-Event-Id";

/// A rendered request ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub body: String,
    /// Extra headers; `Content-Type` and `User-Agent` are set by the transport.
    pub headers: Vec<(String, String)>,
}

/// Render the body for an endpoint type.
pub fn render_body(event: &EventDbModel, notification_type: NotificationType) -> Result<String> {
    match notification_type {
        NotificationType::Webhook => webhook::build_payload(event),
        NotificationType::Discord => discord::build_payload(event),
    }
}

/// Headers for a rendered body. Webhooks with a secret get a signature over `body`.
pub fn delivery_headers(
    notification: &NotificationDbModel,
    event_id: &str,
    body: &str,
) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    if notification.get_type() == Some(NotificationType::Webhook) {
        headers.push((EVENT_ID_HEADER.to_string(), event_id.to_string()));
        if let Some(secret) = notification.secret.as_deref().filter(|s| !s.is_empty()) {
            headers.push((
                SIGNATURE_HEADER.to_string(),
                signing::sign(secret, body.as_bytes())?,
            ));
        }
    }
    Ok(headers)
}

/// Render the complete payload for an (event, endpoint) pair.
pub fn format(event: &EventDbModel, notification: &NotificationDbModel) -> Result<Payload> {
    let notification_type = notification.get_type().ok_or_else(|| {
        Error::validation(format!(
            "Unknown notification type '{}'",
            notification.notification_type
        ))
    })?;
    let body = render_body(event, notification_type)?;
    let headers = delivery_headers(notification, &event.id, &body)?;
    Ok(Payload { body, headers })
}
