//! Delivery schedule and ledger models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::event::EventDbModel;
use crate::database::time::now_ms;

/// Delivery job database model.
/// The persisted schedule for one (event, notification) pair.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DeliveryJobDbModel {
    pub id: String,
    /// Arrival order across all jobs
    pub seq: i64,
    pub event_id: String,
    pub notification_id: String,
    /// PENDING, SUCCEEDED, FAILED, CANCELLED
    pub state: String,
    /// Number of the next attempt to execute
    pub attempt_number: i64,
    /// Rendered request body
    pub payload: String,
    pub next_attempt_at: i64,
    /// Worker lease; NULL when unclaimed
    pub claimed_until: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DeliveryJobDbModel {
    /// A first-attempt job due immediately. `seq` is assigned on insert.
    pub fn new(
        event_id: impl Into<String>,
        notification_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seq: 0,
            event_id: event_id.into(),
            notification_id: notification_id.into(),
            state: JobState::Pending.as_str().to_string(),
            attempt_number: 1,
            payload: payload.into(),
            next_attempt_at: now,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get_state(&self) -> Option<JobState> {
        JobState::parse(&self.state)
    }
}

/// Delivery job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Succeeded,
    Failed,
    /// Endpoint deactivated or deleted before the next attempt
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Delivery attempt database model.
/// One immutable ledger row per executed attempt.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DeliveryAttemptDbModel {
    pub id: String,
    pub event_id: String,
    pub notification_id: String,
    pub attempt_number: i64,
    /// Pending (retry scheduled), Succeeded, Failed
    pub status: String,
    pub http_status: Option<i64>,
    pub error: Option<String>,
    pub attempted_at: i64,
    pub next_retry_at: Option<i64>,
}

impl DeliveryAttemptDbModel {
    pub fn new(
        job: &DeliveryJobDbModel,
        status: AttemptStatus,
        http_status: Option<u16>,
        error: Option<String>,
        next_retry_at: Option<i64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: job.event_id.clone(),
            notification_id: job.notification_id.clone(),
            attempt_number: job.attempt_number,
            status: status.as_str().to_string(),
            http_status: http_status.map(i64::from),
            error,
            attempted_at: now_ms(),
            next_retry_at,
        }
    }

    pub fn get_status(&self) -> Option<AttemptStatus> {
        AttemptStatus::parse(&self.status)
    }
}

/// Outcome recorded for a single attempt.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    utoipa::ToSchema,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum AttemptStatus {
    /// Transient failure, retry scheduled at `next_retry_at`
    Pending,
    Succeeded,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

/// Delivery counters for one endpoint, derived from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeliveryStats {
    pub succeeded_count: i64,
    pub failed_count: i64,
    pub pending_count: i64,
}

/// An event routed to one endpoint, with where its delivery stands.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct NotificationEventDbModel {
    #[sqlx(flatten)]
    pub event: EventDbModel,
    /// State of the pair's delivery job
    pub job_state: String,
    /// Latest ledger row for the pair; NULL until the first attempt completes
    pub last_attempt_number: Option<i64>,
    pub last_status: Option<String>,
    pub last_http_status: Option<i64>,
    pub last_attempted_at: Option<i64>,
}

impl NotificationEventDbModel {
    pub fn get_job_state(&self) -> Option<JobState> {
        JobState::parse(&self.job_state)
    }

    pub fn get_last_status(&self) -> Option<AttemptStatus> {
        self.last_status.as_deref().and_then(AttemptStatus::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state() {
        assert_eq!(JobState::Pending.as_str(), "PENDING");
        assert_eq!(JobState::parse("CANCELLED"), Some(JobState::Cancelled));
        assert_eq!(JobState::parse("pending"), None);
        assert!(!JobState::Pending.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_new_job_is_due_first_attempt() {
        let job = DeliveryJobDbModel::new("evt", "ntf", "{}");
        assert_eq!(job.attempt_number, 1);
        assert_eq!(job.get_state(), Some(JobState::Pending));
        assert!(job.next_attempt_at <= now_ms());
        assert!(job.claimed_until.is_none());
    }

    #[test]
    fn test_attempt_copies_job_identity() {
        let mut job = DeliveryJobDbModel::new("evt", "ntf", "{}");
        job.attempt_number = 3;
        let attempt = DeliveryAttemptDbModel::new(
            &job,
            AttemptStatus::Pending,
            Some(503),
            Some("HTTP 503".to_string()),
            Some(123),
        );
        assert_eq!(attempt.event_id, "evt");
        assert_eq!(attempt.notification_id, "ntf");
        assert_eq!(attempt.attempt_number, 3);
        assert_eq!(attempt.http_status, Some(503));
        assert_eq!(attempt.get_status(), Some(AttemptStatus::Pending));
    }
}
