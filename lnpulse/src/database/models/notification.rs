//! Notification endpoint database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::event::EventType;
use crate::database::time::now_ms;

/// Notification endpoint database model.
/// A destination an account registered to receive its node events.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: String,
    pub account_id: String,
    /// User that created the endpoint
    pub user_id: String,
    pub name: String,
    /// Endpoint type: Webhook, Discord
    pub notification_type: String,
    pub url: String,
    /// HMAC signing key for webhook bodies
    pub secret: Option<String>,
    /// JSON array of subscribed event types, NULL for all
    pub subscribed_types: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl NotificationDbModel {
    pub fn new(
        account_id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        notification_type: NotificationType,
        url: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            user_id: user_id.into(),
            name: name.into(),
            notification_type: notification_type.as_str().to_string(),
            url: url.into(),
            secret: None,
            subscribed_types: None,
            is_active: true,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_subscribed_types(mut self, types: &[EventType]) -> Self {
        self.subscribed_types = Some(encode_subscribed_types(types));
        self
    }

    pub fn get_type(&self) -> Option<NotificationType> {
        NotificationType::parse(&self.notification_type)
    }

    /// Subscribed event types; `None` means every type.
    ///
    /// A blob that fails to parse is treated as all types.
    pub fn get_subscribed_types(&self) -> Option<Vec<EventType>> {
        let raw = self.subscribed_types.as_deref()?;
        serde_json::from_str::<Vec<EventType>>(raw).ok()
    }

    /// Whether the endpoint may receive new delivery attempts.
    pub fn is_deliverable(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

pub fn encode_subscribed_types(types: &[EventType]) -> String {
    let names: Vec<&str> = types.iter().map(EventType::as_str).collect();
    serde_json::Value::from(names).to_string()
}

/// Notification endpoint types.
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
pub enum NotificationType {
    Webhook,
    Discord,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "Webhook",
            Self::Discord => "Discord",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Webhook" => Some(Self::Webhook),
            "Discord" => Some(Self::Discord),
            _ => None,
        }
    }
}

/// Partial update applied by account administrators.
#[derive(Debug, Clone, Default)]
pub struct NotificationUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    /// `Some(None)` clears the secret
    pub secret: Option<Option<String>>,
    /// `Some(None)` resets to all types
    pub subscribed_types: Option<Option<Vec<EventType>>>,
    pub is_active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type() {
        assert_eq!(NotificationType::Webhook.as_str(), "Webhook");
        assert_eq!(NotificationType::parse("Discord"), Some(NotificationType::Discord));
        assert_eq!(NotificationType::parse("Email"), None);
        assert_eq!(NotificationType::Discord.to_string(), "Discord");
    }

    #[test]
    fn test_subscribed_types() {
        let n = NotificationDbModel::new(
            "acct",
            "user",
            "ops",
            NotificationType::Webhook,
            "https://example.com/hook",
        );
        assert_eq!(n.get_subscribed_types(), None);
        assert!(n.is_deliverable());

        let n = n.with_subscribed_types(&[EventType::ChannelOpened, EventType::ChannelClosed]);
        assert_eq!(
            n.subscribed_types.as_deref(),
            Some(r#"["ChannelOpened","ChannelClosed"]"#)
        );
        assert_eq!(
            n.get_subscribed_types(),
            Some(vec![EventType::ChannelOpened, EventType::ChannelClosed])
        );
    }

    #[test]
    fn test_corrupt_subscribed_types_means_all() {
        let mut n = NotificationDbModel::new(
            "acct",
            "user",
            "ops",
            NotificationType::Webhook,
            "https://example.com/hook",
        );
        n.subscribed_types = Some("not json".to_string());
        assert_eq!(n.get_subscribed_types(), None);
    }
}
