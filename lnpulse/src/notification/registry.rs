//! Notification endpoint registry.
//!
//! Validates endpoint registrations and edits before they reach the repository.
//! Reads go straight to the database, so the matcher always sees the latest
//! active flag.

use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::database::models::{
    EventType, NotificationDbModel, NotificationType, NotificationUpdate, encode_subscribed_types,
};
use crate::database::repositories::NotificationRepository;
use crate::{Error, Result};

/// Accepted Discord webhook URL prefixes.
const DISCORD_WEBHOOK_PREFIXES: &[&str] = &[
    "https://discord.com/api/webhooks/",
    "https://discordapp.com/api/webhooks/",
];

const MAX_NAME_LEN: usize = 100;
const MAX_SECRET_LEN: usize = 256;

/// Check a target URL against the rule for its endpoint type.
pub fn validate_url(notification_type: NotificationType, url: &str) -> Result<()> {
    let parsed =
        Url::parse(url).map_err(|e| Error::validation(format!("Invalid URL '{}': {}", url, e)))?;

    if parsed.scheme() != "https" {
        return Err(Error::validation("Notification URL must use https://"));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation("Notification URL must have a host"));
    }

    if notification_type == NotificationType::Discord
        && !DISCORD_WEBHOOK_PREFIXES
            .iter()
            .any(|prefix| url.starts_with(prefix))
    {
        return Err(Error::validation(
            "Discord URL must start with https://discord.com/api/webhooks/",
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("Notification name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::validation(format!(
            "Notification name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_secret(secret: Option<&str>) -> Result<()> {
    if let Some(secret) = secret
        && secret.len() > MAX_SECRET_LEN
    {
        return Err(Error::validation(format!(
            "Secret must be at most {} bytes",
            MAX_SECRET_LEN
        )));
    }
    Ok(())
}

/// Parameters for a new endpoint.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub account_id: String,
    pub user_id: String,
    pub name: String,
    pub notification_type: NotificationType,
    pub url: String,
    pub secret: Option<String>,
    pub subscribed_types: Option<Vec<EventType>>,
}

/// Account endpoint registry.
pub struct NotificationRegistry {
    repo: Arc<dyn NotificationRepository>,
}

impl NotificationRegistry {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self { repo }
    }

    /// Register an endpoint after validating its name, URL and secret.
    pub async fn register(&self, new: NewNotification) -> Result<NotificationDbModel> {
        validate_name(&new.name)?;
        validate_url(new.notification_type, &new.url)?;
        let secret = new.secret.filter(|s| !s.is_empty());
        validate_secret(secret.as_deref())?;

        let mut notification = NotificationDbModel::new(
            new.account_id,
            new.user_id,
            new.name.trim(),
            new.notification_type,
            new.url,
        );
        notification.secret = secret;
        if let Some(types) = &new.subscribed_types {
            notification = notification.with_subscribed_types(types);
        }

        self.repo.create_notification(&notification).await?;
        info!(
            notification_id = %notification.id,
            account_id = %notification.account_id,
            "Registered {} endpoint '{}'",
            notification.notification_type,
            notification.name
        );
        Ok(notification)
    }

    pub async fn get(&self, account_id: &str, id: &str) -> Result<NotificationDbModel> {
        self.repo.get_for_account(account_id, id).await
    }

    pub async fn list(&self, account_id: &str) -> Result<Vec<NotificationDbModel>> {
        self.repo.list_for_account(account_id).await
    }

    /// Read-through list used by the matcher.
    pub async fn list_active(&self, account_id: &str) -> Result<Vec<NotificationDbModel>> {
        self.repo.list_active(account_id).await
    }

    pub async fn activate(&self, account_id: &str, id: &str) -> Result<NotificationDbModel> {
        self.set_active(account_id, id, true).await
    }

    /// Stop new attempts for this endpoint. In-flight attempts finish normally.
    pub async fn deactivate(&self, account_id: &str, id: &str) -> Result<NotificationDbModel> {
        self.set_active(account_id, id, false).await
    }

    async fn set_active(
        &self,
        account_id: &str,
        id: &str,
        is_active: bool,
    ) -> Result<NotificationDbModel> {
        self.repo.get_for_account(account_id, id).await?;
        self.repo.set_active(id, is_active).await?;
        info!(notification_id = %id, is_active, "Notification active flag changed");
        self.repo.get_for_account(account_id, id).await
    }

    /// Apply a partial edit with the same validation as registration.
    pub async fn update(
        &self,
        account_id: &str,
        id: &str,
        update: NotificationUpdate,
    ) -> Result<NotificationDbModel> {
        let mut notification = self.repo.get_for_account(account_id, id).await?;
        let notification_type = notification.get_type().ok_or_else(|| {
            Error::validation(format!(
                "Unknown notification type '{}'",
                notification.notification_type
            ))
        })?;

        if let Some(name) = update.name {
            validate_name(&name)?;
            notification.name = name.trim().to_string();
        }
        if let Some(url) = update.url {
            validate_url(notification_type, &url)?;
            notification.url = url;
        }
        if let Some(secret) = update.secret {
            let secret = secret.filter(|s| !s.is_empty());
            validate_secret(secret.as_deref())?;
            notification.secret = secret;
        }
        if let Some(types) = update.subscribed_types {
            notification.subscribed_types = types.as_deref().map(encode_subscribed_types);
        }
        if let Some(is_active) = update.is_active {
            notification.is_active = is_active;
        }

        self.repo.update_notification(&notification).await?;
        self.repo.get_for_account(account_id, id).await
    }

    /// Soft-delete; ledger rows referencing the endpoint are kept.
    pub async fn delete(&self, account_id: &str, id: &str) -> Result<()> {
        self.repo.get_for_account(account_id, id).await?;
        self.repo.soft_delete(id).await?;
        info!(notification_id = %id, "Notification deleted");
        Ok(())
    }
}
