//! Delivery schedule and ledger repository.
//!
//! `delivery_jobs` is the persisted retry schedule polled by the engine;
//! `delivery_attempts` is the append-only ledger. An attempt row and the job
//! transition it causes are always written in one transaction.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::database::models::{
    AttemptStatus, DeliveryAttemptDbModel, DeliveryJobDbModel, DeliveryStats, JobState,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{days_ago_ms, now_ms};
use crate::database::{DbPool, begin_immediate};
use crate::{Error, Result};

/// Job transition applied together with a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    Succeeded,
    Failed,
    /// Schedule `attempt_number + 1` at the given time (epoch ms).
    Retry { next_attempt_at: i64 },
}

/// Delivery repository trait.
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Lease up to `limit` due PENDING jobs, oldest arrival first.
    ///
    /// Jobs for endpoints in `exclude_notifications` are skipped.
    async fn claim_due_jobs(
        &self,
        now: i64,
        lease_until: i64,
        limit: i64,
        exclude_notifications: &[String],
    ) -> Result<Vec<DeliveryJobDbModel>>;
    /// Drop a lease without recording an attempt.
    async fn release_claim(&self, job_id: &str) -> Result<()>;
    /// Append `attempt` to the ledger and apply `transition` to the job.
    ///
    /// Returns `false` when the job no longer matches the claimed attempt
    /// (another worker already recorded it), in which case nothing is written.
    async fn complete_attempt(
        &self,
        job: &DeliveryJobDbModel,
        attempt: &DeliveryAttemptDbModel,
        transition: JobTransition,
    ) -> Result<bool>;
    /// Move a PENDING job to CANCELLED without an attempt.
    async fn cancel_job(&self, job_id: &str) -> Result<bool>;
    async fn get_job(&self, event_id: &str, notification_id: &str) -> Result<DeliveryJobDbModel>;
    async fn list_jobs_for_event(&self, event_id: &str) -> Result<Vec<DeliveryJobDbModel>>;
    /// Append a ledger row outside a job transition.
    async fn record(&self, attempt: &DeliveryAttemptDbModel) -> Result<()>;
    async fn status_for(&self, notification_id: &str) -> Result<DeliveryStats>;
    async fn history(&self, event_id: &str) -> Result<Vec<DeliveryAttemptDbModel>>;
    async fn history_for_pair(
        &self,
        event_id: &str,
        notification_id: &str,
    ) -> Result<Vec<DeliveryAttemptDbModel>>;
    /// Delete terminal jobs last touched before the retention window. Ledger rows stay.
    async fn cleanup_finished_jobs(&self, retention_days: u32) -> Result<u64>;
}

/// Transactional delivery operations.
///
/// These methods run inside a caller-owned transaction and do NOT commit.
pub struct DeliveryTxOps;

impl DeliveryTxOps {
    /// Enqueue a job, assigning the next arrival sequence number.
    pub async fn enqueue_job(conn: &mut SqliteConnection, job: &DeliveryJobDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_jobs (
                id, seq, event_id, notification_id, state, attempt_number, payload,
                next_attempt_at, claimed_until, created_at, updated_at
            ) VALUES (
                ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM delivery_jobs),
                ?, ?, ?, ?, ?, ?, ?, ?, ?
            )
            "#,
        )
        .bind(&job.id)
        .bind(&job.event_id)
        .bind(&job.notification_id)
        .bind(&job.state)
        .bind(job.attempt_number)
        .bind(&job.payload)
        .bind(job.next_attempt_at)
        .bind(job.claimed_until)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn insert_attempt(
        conn: &mut SqliteConnection,
        attempt: &DeliveryAttemptDbModel,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_attempts (
                id, event_id, notification_id, attempt_number, status,
                http_status, error, attempted_at, next_retry_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.id)
        .bind(&attempt.event_id)
        .bind(&attempt.notification_id)
        .bind(attempt.attempt_number)
        .bind(&attempt.status)
        .bind(attempt.http_status)
        .bind(&attempt.error)
        .bind(attempt.attempted_at)
        .bind(attempt.next_retry_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Advance a claimed job. Returns `false` if the job moved on since it was claimed.
    pub async fn apply_transition(
        conn: &mut SqliteConnection,
        job: &DeliveryJobDbModel,
        transition: JobTransition,
    ) -> Result<bool> {
        let (state, attempt_number, next_attempt_at) = match transition {
            JobTransition::Succeeded => (JobState::Succeeded, job.attempt_number, job.next_attempt_at),
            JobTransition::Failed => (JobState::Failed, job.attempt_number, job.next_attempt_at),
            JobTransition::Retry { next_attempt_at } => {
                (JobState::Pending, job.attempt_number + 1, next_attempt_at)
            }
        };

        let result = sqlx::query(
            r#"
            UPDATE delivery_jobs SET
                state = ?,
                attempt_number = ?,
                next_attempt_at = ?,
                claimed_until = NULL,
                updated_at = ?
            WHERE id = ? AND state = 'PENDING' AND attempt_number = ?
            "#,
        )
        .bind(state.as_str())
        .bind(attempt_number)
        .bind(next_attempt_at)
        .bind(now_ms())
        .bind(&job.id)
        .bind(job.attempt_number)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn claim_query<'a>(
    now: i64,
    lease_until: i64,
    limit: i64,
    exclude_notifications: &'a [String],
) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE delivery_jobs SET claimed_until = ");
    qb.push_bind(lease_until)
        .push(", updated_at = ")
        .push_bind(now)
        .push(
            " WHERE id IN (SELECT id FROM delivery_jobs WHERE state = 'PENDING' AND next_attempt_at <= ",
        )
        .push_bind(now)
        .push(" AND (claimed_until IS NULL OR claimed_until < ")
        .push_bind(now)
        .push(")");

    if !exclude_notifications.is_empty() {
        qb.push(" AND notification_id NOT IN (");
        let mut separated = qb.separated(", ");
        for id in exclude_notifications {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");
    }

    qb.push(" ORDER BY seq LIMIT ")
        .push_bind(limit)
        .push(") RETURNING *");
    qb
}

/// SQLx implementation of DeliveryRepository.
pub struct SqlxDeliveryRepository {
    pool: DbPool,
}

impl SqlxDeliveryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn complete_attempt_once(
        &self,
        job: &DeliveryJobDbModel,
        attempt: &DeliveryAttemptDbModel,
        transition: JobTransition,
    ) -> Result<bool> {
        let mut tx = begin_immediate(&self.pool).await?;

        if !DeliveryTxOps::apply_transition(&mut tx, job, transition).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        match DeliveryTxOps::insert_attempt(&mut tx, attempt).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(false);
            }
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl DeliveryRepository for SqlxDeliveryRepository {
    async fn claim_due_jobs(
        &self,
        now: i64,
        lease_until: i64,
        limit: i64,
        exclude_notifications: &[String],
    ) -> Result<Vec<DeliveryJobDbModel>> {
        retry_on_sqlite_busy("claim_due_jobs", || async {
            let mut jobs = claim_query(now, lease_until, limit, exclude_notifications)
                .build_query_as::<DeliveryJobDbModel>()
                .fetch_all(&self.pool)
                .await?;
            // RETURNING order is unspecified.
            jobs.sort_by_key(|job| job.seq);
            Ok(jobs)
        })
        .await
    }

    async fn release_claim(&self, job_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE delivery_jobs SET claimed_until = NULL, updated_at = ? WHERE id = ? AND state = 'PENDING'",
        )
        .bind(now_ms())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_attempt(
        &self,
        job: &DeliveryJobDbModel,
        attempt: &DeliveryAttemptDbModel,
        transition: JobTransition,
    ) -> Result<bool> {
        retry_on_sqlite_busy("complete_attempt", || {
            self.complete_attempt_once(job, attempt, transition)
        })
        .await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_jobs SET state = 'CANCELLED', claimed_until = NULL, updated_at = ?
            WHERE id = ? AND state = 'PENDING'
            "#,
        )
        .bind(now_ms())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_job(&self, event_id: &str, notification_id: &str) -> Result<DeliveryJobDbModel> {
        sqlx::query_as::<_, DeliveryJobDbModel>(
            "SELECT * FROM delivery_jobs WHERE event_id = ? AND notification_id = ?",
        )
        .bind(event_id)
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("DeliveryJob", format!("{event_id}/{notification_id}")))
    }

    async fn list_jobs_for_event(&self, event_id: &str) -> Result<Vec<DeliveryJobDbModel>> {
        let jobs = sqlx::query_as::<_, DeliveryJobDbModel>(
            "SELECT * FROM delivery_jobs WHERE event_id = ? ORDER BY seq",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn record(&self, attempt: &DeliveryAttemptDbModel) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        DeliveryTxOps::insert_attempt(&mut conn, attempt).await
    }

    async fn status_for(&self, notification_id: &str) -> Result<DeliveryStats> {
        let (succeeded_count, failed_count, pending_count): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM delivery_attempts WHERE notification_id = ? AND status = ?),
                (SELECT COUNT(*) FROM delivery_attempts WHERE notification_id = ? AND status = ?),
                (SELECT COUNT(*) FROM delivery_jobs WHERE notification_id = ? AND state = 'PENDING')
            "#,
        )
        .bind(notification_id)
        .bind(AttemptStatus::Succeeded.as_str())
        .bind(notification_id)
        .bind(AttemptStatus::Failed.as_str())
        .bind(notification_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(DeliveryStats {
            succeeded_count,
            failed_count,
            pending_count,
        })
    }

    async fn history(&self, event_id: &str) -> Result<Vec<DeliveryAttemptDbModel>> {
        let attempts = sqlx::query_as::<_, DeliveryAttemptDbModel>(
            r#"
            SELECT * FROM delivery_attempts
            WHERE event_id = ?
            ORDER BY attempt_number, attempted_at, notification_id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn history_for_pair(
        &self,
        event_id: &str,
        notification_id: &str,
    ) -> Result<Vec<DeliveryAttemptDbModel>> {
        let attempts = sqlx::query_as::<_, DeliveryAttemptDbModel>(
            r#"
            SELECT * FROM delivery_attempts
            WHERE event_id = ? AND notification_id = ?
            ORDER BY attempt_number
            "#,
        )
        .bind(event_id)
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn cleanup_finished_jobs(&self, retention_days: u32) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM delivery_jobs WHERE state != 'PENDING' AND updated_at < ?",
        )
        .bind(days_ago_ms(retention_days))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
