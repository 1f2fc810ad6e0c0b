//! Event store.
//!
//! Ingestion validates a raw event, inserts it, resolves the matching endpoints
//! and enqueues one delivery job per endpoint, all in one write transaction.
//! Either every job exists together with the event or nothing was written.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::database::models::{
    DeliveryAttemptDbModel, DeliveryJobDbModel, EventCursor, EventDbModel, EventFilters,
    EventType, NotificationEventDbModel, Severity, SeverityStats,
};
use crate::database::repositories::{
    DeliveryRepository, DeliveryTxOps, EventRepository, EventTxOps, NotificationTxOps,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::datetime_to_ns;
use crate::database::{DbPool, begin_immediate};
use crate::delivery::DeliveryEngine;
use crate::notification::formatter::render_body;
use crate::notification::match_event;
use crate::{Error, Result};

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// An event as submitted by a producer, before validation.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub account_id: String,
    pub node_id: String,
    pub node_alias: String,
    pub event_type: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

impl NewEvent {
    /// Validate and turn into a storable event with a fresh id.
    pub fn into_event(self) -> Result<EventDbModel> {
        require("account_id", &self.account_id)?;
        require("node_id", &self.node_id)?;
        require("title", &self.title)?;

        let event_type = EventType::parse(&self.event_type).ok_or_else(|| {
            Error::validation(format!("Unknown event_type '{}'", self.event_type))
        })?;
        let severity = Severity::parse(&self.severity)
            .ok_or_else(|| Error::validation(format!("Unknown severity '{}'", self.severity)))?;

        let idempotency_key = match self.idempotency_key {
            Some(key) if key.trim().is_empty() => {
                return Err(Error::validation("idempotency_key must not be empty"));
            }
            Some(key) if key.len() > MAX_IDEMPOTENCY_KEY_LEN => {
                return Err(Error::validation(format!(
                    "idempotency_key must be at most {} bytes",
                    MAX_IDEMPOTENCY_KEY_LEN
                )));
            }
            other => other,
        };

        let timestamp = datetime_to_ns(self.timestamp).ok_or_else(|| {
            Error::validation(format!("timestamp {} is out of range", self.timestamp))
        })?;

        let mut event = EventDbModel::new(
            self.account_id,
            self.node_id,
            self.node_alias,
            event_type,
            severity,
            self.title,
            self.description,
            &self.data,
            timestamp,
        );
        event.idempotency_key = idempotency_key;
        Ok(event)
    }
}

/// Result of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub event: EventDbModel,
    /// Number of endpoints a delivery job was enqueued for.
    pub deliveries: usize,
}

/// One page of a numbered listing.
#[derive(Debug, Clone)]
pub struct EventPage<T = EventDbModel> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> EventPage<T> {
    pub fn total_pages(&self) -> u32 {
        let per_page = i64::from(self.per_page.max(1));
        u32::try_from((self.total + per_page - 1) / per_page).unwrap_or(u32::MAX)
    }
}

/// Clamp user-supplied paging to `page >= 1` and `1 <= per_page <= 100`.
pub fn normalize_paging(page: Option<u32>, per_page: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    (page, per_page)
}

/// Durable event log plus fan-out into the delivery schedule.
pub struct EventStore {
    pool: DbPool,
    events: Arc<dyn EventRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    engine: Option<Arc<DeliveryEngine>>,
}

impl EventStore {
    pub fn new(
        pool: DbPool,
        events: Arc<dyn EventRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
    ) -> Self {
        Self {
            pool,
            events,
            deliveries,
            engine: None,
        }
    }

    /// Wake `engine` after every ingestion that enqueued work.
    pub fn with_engine(mut self, engine: Arc<DeliveryEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Persist an event and enqueue its deliveries.
    ///
    /// Fails with `Validation` for malformed input and `Duplicate` when the
    /// account already has an event with the same idempotency key.
    pub async fn ingest(&self, new: NewEvent) -> Result<IngestReceipt> {
        let event = new.into_event()?;
        let deliveries =
            retry_on_sqlite_busy("ingest_event", || self.ingest_once(&event)).await?;

        info!(
            event_id = %event.id,
            account_id = %event.account_id,
            event_type = %event.event_type,
            deliveries,
            "Event ingested"
        );

        if deliveries > 0
            && let Some(engine) = &self.engine
        {
            engine.wake();
        }
        Ok(IngestReceipt { event, deliveries })
    }

    async fn ingest_once(&self, event: &EventDbModel) -> Result<usize> {
        let mut tx = begin_immediate(&self.pool).await?;

        if let Err(e) = EventTxOps::insert(&mut tx, event).await {
            tx.rollback().await?;
            return Err(e);
        }

        let candidates = NotificationTxOps::list_active(&mut tx, &event.account_id).await?;
        let mut enqueued = 0;
        for notification in match_event(event, &candidates) {
            let Some(notification_type) = notification.get_type() else {
                warn!(
                    notification_id = %notification.id,
                    "Skipping endpoint with unknown type '{}'",
                    notification.notification_type
                );
                continue;
            };
            let body = render_body(event, notification_type)?;
            let job = DeliveryJobDbModel::new(&event.id, &notification.id, body);
            DeliveryTxOps::enqueue_job(&mut tx, &job).await?;
            debug!(
                event_id = %event.id,
                notification_id = %notification.id,
                "Delivery enqueued"
            );
            enqueued += 1;
        }

        tx.commit().await?;
        Ok(enqueued)
    }

    pub async fn get(&self, event_id: &str) -> Result<EventDbModel> {
        self.events.get_event(event_id).await
    }

    /// Event owned by `account_id`; `NotFound` for other accounts.
    pub async fn get_for_account(&self, account_id: &str, event_id: &str) -> Result<EventDbModel> {
        self.events.get_event_for_account(account_id, event_id).await
    }

    /// Numbered page in `timestamp DESC, id DESC` order.
    pub async fn list(
        &self,
        account_id: &str,
        filters: &EventFilters,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<EventPage> {
        let (page, per_page) = normalize_paging(page, per_page);
        let offset = i64::from(page - 1) * i64::from(per_page);
        let items = self
            .events
            .list_events(account_id, filters, i64::from(per_page), offset)
            .await?;
        let total = self.events.count_events(account_id, filters).await?;
        Ok(EventPage {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Keyset page after an opaque token. Returns the items and the next token,
    /// if there may be more.
    pub async fn list_after(
        &self,
        account_id: &str,
        filters: &EventFilters,
        page_token: Option<&str>,
        per_page: Option<u32>,
    ) -> Result<(Vec<EventDbModel>, Option<String>)> {
        let cursor = page_token
            .map(|token| {
                EventCursor::decode(token)
                    .ok_or_else(|| Error::validation(format!("Invalid page token '{}'", token)))
            })
            .transpose()?;
        let (_, per_page) = normalize_paging(None, per_page);

        let items = self
            .events
            .list_events_after(account_id, filters, cursor.as_ref(), i64::from(per_page))
            .await?;
        let next = if items.len() == per_page as usize {
            items.last().map(|e| EventCursor::after(e).encode())
        } else {
            None
        };
        Ok((items, next))
    }

    pub async fn count(&self, account_id: &str, filters: &EventFilters) -> Result<i64> {
        self.events.count_events(account_id, filters).await
    }

    pub async fn severity_stats(&self, account_id: &str) -> Result<SeverityStats> {
        self.events.severity_stats(account_id).await
    }

    /// Numbered page of the events routed to one endpoint, newest first.
    pub async fn list_for_notification(
        &self,
        notification_id: &str,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<EventPage<NotificationEventDbModel>> {
        let (page, per_page) = normalize_paging(page, per_page);
        let offset = i64::from(page - 1) * i64::from(per_page);
        let items = self
            .events
            .list_events_for_notification(notification_id, i64::from(per_page), offset)
            .await?;
        let total = self.events.count_events_for_notification(notification_id).await?;
        Ok(EventPage {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Ledger rows for an event across all endpoints.
    pub async fn history(&self, event_id: &str) -> Result<Vec<DeliveryAttemptDbModel>> {
        self.deliveries.history(event_id).await
    }
}
