//! API request and response models (DTOs).
//!
//! # Model Categories
//!
//! - **Pagination**: page-numbered list wrapper
//! - **Events**: ingestion requests, event and delivery history responses
//! - **Notifications**: endpoint registration and edits
//! - **Health**: liveness and readiness

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::database::models::{
    DeliveryAttemptDbModel, EventDbModel, EventFilters, EventType, NotificationDbModel,
    NotificationEventDbModel, Severity,
};
use crate::database::time::{datetime_to_ns, ms_to_datetime, ns_to_datetime};
use crate::events::EventPage;
use crate::{Error, Result};

// ============================================================================
// Pagination
// ============================================================================

/// Paginated response wrapper for list endpoints.
///
/// ```json
/// {
///     "items": [...],
///     "total": 45,
///     "page": 2,
///     "per_page": 20,
///     "total_pages": 3
/// }
/// ```
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    /// Total number of items matching the filters
    pub total: i64,
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
    /// Keyset token for the page after this one, when more items may follow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Plain page parameters.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// Page number (default 1)
    pub page: Option<u32>,
    /// Items per page (default 20, clamped to 1..=100)
    pub per_page: Option<u32>,
}

// ============================================================================
// Events
// ============================================================================

/// Event submitted by a node integration.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IngestEventRequest {
    pub account_id: String,
    pub node_id: String,
    #[serde(default)]
    pub node_alias: String,
    /// One of InvoiceCreated, InvoiceSettled, InvoiceCancelled, InvoiceAccepted,
    /// ChannelOpened, ChannelClosed
    pub event_type: String,
    /// Info, Warning or Error
    pub severity: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Type-specific payload, stored verbatim
    #[serde(default)]
    pub data: serde_json::Value,
    /// When the node action happened
    pub timestamp: DateTime<Utc>,
    /// Deduplication key, unique per account
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestEventResponse {
    pub id: String,
    /// Number of endpoints a delivery was scheduled for
    pub deliveries: usize,
}

/// Query parameters for listing events.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventListQuery {
    /// Page number (default 1)
    pub page: Option<u32>,
    /// Items per page (default 20, clamped to 1..=100)
    pub per_page: Option<u32>,
    /// Info, Warning or Error
    pub severity: Option<String>,
    pub event_type: Option<String>,
    pub node_id: Option<String>,
    /// Inclusive lower bound on the event timestamp (RFC 3339)
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the event timestamp (RFC 3339)
    pub end: Option<DateTime<Utc>>,
    /// Resume after a `next_page_token`; takes precedence over `page`
    pub page_token: Option<String>,
}

impl EventListQuery {
    pub fn filters(&self) -> Result<EventFilters> {
        let severity = self
            .severity
            .as_deref()
            .map(|s| {
                Severity::parse(s).ok_or_else(|| Error::validation(format!("Unknown severity '{}'", s)))
            })
            .transpose()?;
        let event_type = self
            .event_type
            .as_deref()
            .map(|s| {
                EventType::parse(s)
                    .ok_or_else(|| Error::validation(format!("Unknown event_type '{}'", s)))
            })
            .transpose()?;

        Ok(EventFilters {
            event_type,
            severity,
            node_id: self.node_id.clone().filter(|n| !n.is_empty()),
            start: self.start.map(|t| bound_ns("start", t)).transpose()?,
            end: self.end.map(|t| bound_ns("end", t)).transpose()?,
        })
    }
}

fn bound_ns(name: &str, t: DateTime<Utc>) -> Result<i64> {
    datetime_to_ns(t).ok_or_else(|| Error::validation(format!("{} is out of range", name)))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventResponse {
    pub id: String,
    pub account_id: String,
    pub node_id: String,
    pub node_alias: String,
    pub event_type: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl From<EventDbModel> for EventResponse {
    fn from(event: EventDbModel) -> Self {
        Self {
            data: event.data_value(),
            timestamp: ns_to_datetime(event.timestamp),
            created_at: ms_to_datetime(event.created_at),
            id: event.id,
            account_id: event.account_id,
            node_id: event.node_id,
            node_alias: event.node_alias,
            event_type: event.event_type,
            severity: event.severity,
            title: event.title,
            description: event.description,
            idempotency_key: event.idempotency_key,
        }
    }
}

impl From<EventPage> for PaginatedResponse<EventResponse> {
    fn from(page: EventPage) -> Self {
        let total_pages = page.total_pages();
        Self {
            items: page.items.into_iter().map(EventResponse::from).collect(),
            total: page.total,
            page: page.page,
            per_page: page.per_page,
            total_pages,
            next_page_token: None,
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryAttemptResponse {
    pub id: String,
    pub notification_id: String,
    pub attempt_number: i64,
    /// Pending (retry scheduled), Succeeded or Failed
    pub status: String,
    pub http_status: Option<i64>,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl From<DeliveryAttemptDbModel> for DeliveryAttemptResponse {
    fn from(attempt: DeliveryAttemptDbModel) -> Self {
        Self {
            id: attempt.id,
            notification_id: attempt.notification_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            http_status: attempt.http_status,
            error: attempt.error,
            attempted_at: ms_to_datetime(attempt.attempted_at),
            next_retry_at: attempt.next_retry_at.map(ms_to_datetime),
        }
    }
}

/// Event with its delivery history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventDetailResponse {
    #[serde(flatten)]
    pub event: EventResponse,
    pub deliveries: Vec<DeliveryAttemptResponse>,
}

/// Event routed to one endpoint, with where its delivery stands.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationEventResponse {
    #[serde(flatten)]
    pub event: EventResponse,
    /// PENDING, SUCCEEDED, FAILED or CANCELLED
    pub delivery_state: String,
    /// Latest ledger row; the fields below are omitted before the first attempt completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_number: Option<i64>,
    /// Pending (retry scheduled), Succeeded or Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_http_status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempted_at: Option<DateTime<Utc>>,
}

impl From<NotificationEventDbModel> for NotificationEventResponse {
    fn from(row: NotificationEventDbModel) -> Self {
        Self {
            event: row.event.into(),
            delivery_state: row.job_state,
            last_attempt_number: row.last_attempt_number,
            last_status: row.last_status,
            last_http_status: row.last_http_status,
            last_attempted_at: row.last_attempted_at.map(ms_to_datetime),
        }
    }
}

impl From<EventPage<NotificationEventDbModel>> for PaginatedResponse<NotificationEventResponse> {
    fn from(page: EventPage<NotificationEventDbModel>) -> Self {
        let total_pages = page.total_pages();
        Self {
            items: page
                .items
                .into_iter()
                .map(NotificationEventResponse::from)
                .collect(),
            total: page.total,
            page: page.page,
            per_page: page.per_page,
            total_pages,
            next_page_token: None,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateNotificationRequest {
    pub name: String,
    /// Webhook or Discord
    pub notification_type: String,
    pub url: String,
    /// HMAC key for webhook signatures
    pub secret: Option<String>,
    /// Event types to receive; omitted or empty means all
    pub subscribed_types: Option<Vec<String>>,
}

/// Partial edit. Omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateNotificationRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    /// An empty string removes the secret
    pub secret: Option<String>,
    /// An empty list subscribes to all types
    pub subscribed_types: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

/// Parse event type names; an empty list means no filter.
pub fn parse_event_types(names: &[String]) -> Result<Option<Vec<EventType>>> {
    if names.is_empty() {
        return Ok(None);
    }
    names
        .iter()
        .map(|name| {
            EventType::parse(name)
                .ok_or_else(|| Error::validation(format!("Unknown event type '{}'", name)))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Notification endpoint as returned by the API. The secret itself is never exposed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationResponse {
    pub id: String,
    pub account_id: String,
    pub user_id: String,
    pub name: String,
    pub notification_type: String,
    pub url: String,
    pub has_secret: bool,
    /// Omitted when the endpoint receives every event type
    pub subscribed_types: Option<Vec<EventType>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<NotificationDbModel> for NotificationResponse {
    fn from(n: NotificationDbModel) -> Self {
        Self {
            has_secret: n.secret.as_deref().is_some_and(|s| !s.is_empty()),
            subscribed_types: n.get_subscribed_types(),
            created_at: ms_to_datetime(n.created_at),
            updated_at: ms_to_datetime(n.updated_at),
            id: n.id,
            account_id: n.account_id,
            user_id: n.user_id,
            name: n.name,
            notification_type: n.notification_type,
            url: n.url,
            is_active: n.is_active,
        }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy"
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_filters() {
        let query = EventListQuery {
            severity: Some("Error".to_string()),
            event_type: Some("ChannelClosed".to_string()),
            node_id: Some(String::new()),
            ..Default::default()
        };
        let filters = query.filters().unwrap();
        assert_eq!(filters.severity, Some(Severity::Error));
        assert_eq!(filters.event_type, Some(EventType::ChannelClosed));
        assert!(filters.node_id.is_none());

        let bad = EventListQuery {
            severity: Some("Fatal".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad.filters(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_parse_event_types() {
        assert_eq!(parse_event_types(&[]).unwrap(), None);
        assert_eq!(
            parse_event_types(&["ChannelOpened".to_string()]).unwrap(),
            Some(vec![EventType::ChannelOpened])
        );
        assert!(parse_event_types(&["Nope".to_string()]).is_err());
    }

    #[test]
    fn test_notification_response_hides_secret() {
        let n = NotificationDbModel::new(
            "a",
            "u",
            "hook",
            crate::database::models::NotificationType::Webhook,
            "https://example.com",
        )
        .with_secret("hunter2");
        let json = serde_json::to_string(&NotificationResponse::from(n)).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"has_secret\":true"));
    }
}
