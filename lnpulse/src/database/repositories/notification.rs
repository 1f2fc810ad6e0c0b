//! Notification endpoint repository.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use crate::database::models::NotificationDbModel;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Notification repository trait.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Fetch by id, including soft-deleted rows.
    async fn get_notification(&self, id: &str) -> Result<NotificationDbModel>;
    /// Fetch a live (not deleted) endpoint owned by `account_id`.
    async fn get_for_account(&self, account_id: &str, id: &str) -> Result<NotificationDbModel>;
    async fn list_for_account(&self, account_id: &str) -> Result<Vec<NotificationDbModel>>;
    async fn list_active(&self, account_id: &str) -> Result<Vec<NotificationDbModel>>;
    async fn create_notification(&self, notification: &NotificationDbModel) -> Result<()>;
    async fn update_notification(&self, notification: &NotificationDbModel) -> Result<()>;
    async fn set_active(&self, id: &str, is_active: bool) -> Result<()>;
    async fn soft_delete(&self, id: &str) -> Result<()>;
}

const ACTIVE_QUERY: &str = r#"
    SELECT * FROM notifications
    WHERE account_id = ? AND is_active = 1 AND is_deleted = 0
    ORDER BY created_at, id
"#;

/// Transactional notification reads used during ingestion.
pub struct NotificationTxOps;

impl NotificationTxOps {
    /// Active endpoints of an account, read inside the ingest transaction.
    pub async fn list_active(
        conn: &mut SqliteConnection,
        account_id: &str,
    ) -> Result<Vec<NotificationDbModel>> {
        let notifications = sqlx::query_as::<_, NotificationDbModel>(ACTIVE_QUERY)
            .bind(account_id)
            .fetch_all(conn)
            .await?;
        Ok(notifications)
    }
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn get_notification(&self, id: &str) -> Result<NotificationDbModel> {
        sqlx::query_as::<_, NotificationDbModel>("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Notification", id))
    }

    async fn get_for_account(&self, account_id: &str, id: &str) -> Result<NotificationDbModel> {
        sqlx::query_as::<_, NotificationDbModel>(
            "SELECT * FROM notifications WHERE id = ? AND account_id = ? AND is_deleted = 0",
        )
        .bind(id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("Notification", id))
    }

    async fn list_for_account(&self, account_id: &str) -> Result<Vec<NotificationDbModel>> {
        let notifications = sqlx::query_as::<_, NotificationDbModel>(
            r#"
            SELECT * FROM notifications
            WHERE account_id = ? AND is_deleted = 0
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }

    async fn list_active(&self, account_id: &str) -> Result<Vec<NotificationDbModel>> {
        let notifications = sqlx::query_as::<_, NotificationDbModel>(ACTIVE_QUERY)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(notifications)
    }

    async fn create_notification(&self, notification: &NotificationDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, account_id, user_id, name, notification_type, url, secret,
                subscribed_types, is_active, is_deleted, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.account_id)
        .bind(&notification.user_id)
        .bind(&notification.name)
        .bind(&notification.notification_type)
        .bind(&notification.url)
        .bind(&notification.secret)
        .bind(&notification.subscribed_types)
        .bind(notification.is_active)
        .bind(notification.is_deleted)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .bind(notification.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_notification(&self, notification: &NotificationDbModel) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET
                name = ?,
                url = ?,
                secret = ?,
                subscribed_types = ?,
                is_active = ?,
                updated_at = ?
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(&notification.name)
        .bind(&notification.url)
        .bind(&notification.secret)
        .bind(&notification.subscribed_types)
        .bind(notification.is_active)
        .bind(now_ms())
        .bind(&notification.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Notification", &notification.id));
        }
        Ok(())
    }

    async fn set_active(&self, id: &str, is_active: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notifications SET is_active = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(is_active)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Notification", id));
        }
        Ok(())
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            UPDATE notifications SET is_deleted = 1, is_active = 0, deleted_at = ?, updated_at = ?
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Notification", id));
        }
        Ok(())
    }
}
