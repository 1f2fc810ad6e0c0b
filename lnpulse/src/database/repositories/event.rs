//! Event repository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::database::models::{
    EventCursor, EventDbModel, EventFilters, NotificationEventDbModel, SeverityStats,
};
use crate::{Error, Result};

/// Event repository trait.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn get_event(&self, id: &str) -> Result<EventDbModel>;
    /// Event scoped to an account; other accounts' events are reported as not found.
    async fn get_event_for_account(&self, account_id: &str, id: &str) -> Result<EventDbModel>;
    async fn find_by_idempotency_key(
        &self,
        account_id: &str,
        key: &str,
    ) -> Result<Option<EventDbModel>>;
    async fn list_events(
        &self,
        account_id: &str,
        filters: &EventFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EventDbModel>>;
    /// Keyset page strictly after `cursor` in `timestamp DESC, id DESC` order.
    async fn list_events_after(
        &self,
        account_id: &str,
        filters: &EventFilters,
        cursor: Option<&EventCursor>,
        limit: i64,
    ) -> Result<Vec<EventDbModel>>;
    async fn count_events(&self, account_id: &str, filters: &EventFilters) -> Result<i64>;
    /// Events that have a delivery job for the endpoint, newest first, each with
    /// its job state and latest attempt.
    async fn list_events_for_notification(
        &self,
        notification_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationEventDbModel>>;
    async fn count_events_for_notification(&self, notification_id: &str) -> Result<i64>;
    async fn severity_stats(&self, account_id: &str) -> Result<SeverityStats>;
}

/// Transactional event operations.
///
/// These methods run inside a caller-owned transaction and do NOT commit.
pub struct EventTxOps;

impl EventTxOps {
    /// Insert an event. A repeated `(account_id, idempotency_key)` yields `Error::Duplicate`.
    pub async fn insert(conn: &mut SqliteConnection, event: &EventDbModel) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (
                id, account_id, node_id, node_alias, event_type, severity,
                title, description, data, timestamp, created_at, idempotency_key
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.account_id)
        .bind(&event.node_id)
        .bind(&event.node_alias)
        .bind(&event.event_type)
        .bind(&event.severity)
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.data)
        .bind(event.timestamp)
        .bind(event.created_at)
        .bind(&event.idempotency_key)
        .execute(conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::duplicate(
                    "Event",
                    event
                        .idempotency_key
                        .clone()
                        .unwrap_or_else(|| event.id.clone()),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filters: &'a EventFilters) {
    if let Some(event_type) = filters.event_type {
        qb.push(" AND event_type = ").push_bind(event_type.as_str());
    }
    if let Some(severity) = filters.severity {
        qb.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(node_id) = &filters.node_id {
        qb.push(" AND node_id = ").push_bind(node_id.as_str());
    }
    if let Some(start) = filters.start {
        qb.push(" AND timestamp >= ").push_bind(start);
    }
    if let Some(end) = filters.end {
        qb.push(" AND timestamp <= ").push_bind(end);
    }
}

/// SQLx implementation of EventRepository.
pub struct SqlxEventRepository {
    pool: SqlitePool,
}

impl SqlxEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for SqlxEventRepository {
    async fn get_event(&self, id: &str) -> Result<EventDbModel> {
        sqlx::query_as::<_, EventDbModel>("SELECT * FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Event", id))
    }

    async fn get_event_for_account(&self, account_id: &str, id: &str) -> Result<EventDbModel> {
        sqlx::query_as::<_, EventDbModel>("SELECT * FROM events WHERE id = ? AND account_id = ?")
            .bind(id)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Event", id))
    }

    async fn find_by_idempotency_key(
        &self,
        account_id: &str,
        key: &str,
    ) -> Result<Option<EventDbModel>> {
        let event = sqlx::query_as::<_, EventDbModel>(
            "SELECT * FROM events WHERE account_id = ? AND idempotency_key = ?",
        )
        .bind(account_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    async fn list_events(
        &self,
        account_id: &str,
        filters: &EventFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EventDbModel>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM events WHERE account_id = ");
        qb.push_bind(account_id);
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let events = qb
            .build_query_as::<EventDbModel>()
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }

    async fn list_events_after(
        &self,
        account_id: &str,
        filters: &EventFilters,
        cursor: Option<&EventCursor>,
        limit: i64,
    ) -> Result<Vec<EventDbModel>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM events WHERE account_id = ");
        qb.push_bind(account_id);
        push_filters(&mut qb, filters);
        if let Some(cursor) = cursor {
            qb.push(" AND (timestamp < ")
                .push_bind(cursor.timestamp)
                .push(" OR (timestamp = ")
                .push_bind(cursor.timestamp)
                .push(" AND id < ")
                .push_bind(cursor.id.as_str())
                .push("))");
        }
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(limit);

        let events = qb
            .build_query_as::<EventDbModel>()
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }

    async fn count_events(&self, account_id: &str, filters: &EventFilters) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM events WHERE account_id = ");
        qb.push_bind(account_id);
        push_filters(&mut qb, filters);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn list_events_for_notification(
        &self,
        notification_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationEventDbModel>> {
        let rows = sqlx::query_as::<_, NotificationEventDbModel>(
            r#"
            SELECT e.*,
                   j.state AS job_state,
                   a.attempt_number AS last_attempt_number,
                   a.status AS last_status,
                   a.http_status AS last_http_status,
                   a.attempted_at AS last_attempted_at
            FROM delivery_jobs j
            JOIN events e ON e.id = j.event_id
            LEFT JOIN delivery_attempts a
                ON a.event_id = j.event_id
               AND a.notification_id = j.notification_id
               AND a.attempt_number = (
                   SELECT MAX(attempt_number) FROM delivery_attempts
                   WHERE event_id = j.event_id AND notification_id = j.notification_id
               )
            WHERE j.notification_id = ?
            ORDER BY e.timestamp DESC, e.id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(notification_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_events_for_notification(&self, notification_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_jobs WHERE notification_id = ?")
                .bind(notification_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn severity_stats(&self, account_id: &str) -> Result<SeverityStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity, COUNT(*) FROM events WHERE account_id = ? GROUP BY severity",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = SeverityStats::default();
        for (severity, count) in rows {
            match severity.as_str() {
                "Info" => stats.info = count,
                "Warning" => stats.warning = count,
                "Error" => stats.error = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}
