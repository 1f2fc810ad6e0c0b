//! Event to endpoint matching.

use crate::database::models::{EventDbModel, NotificationDbModel};

/// Whether `notification` should receive `event`.
pub fn matches(event: &EventDbModel, notification: &NotificationDbModel) -> bool {
    if notification.account_id != event.account_id || !notification.is_deliverable() {
        return false;
    }
    match (notification.get_subscribed_types(), event.get_event_type()) {
        (None, _) => true,
        (Some(types), Some(event_type)) => types.contains(&event_type),
        (Some(_), None) => false,
    }
}

/// Endpoints from `candidates` that receive `event`, in a stable order.
///
/// Pure and idempotent; attempt bookkeeping belongs to the delivery engine.
pub fn match_event<'a>(
    event: &EventDbModel,
    candidates: &'a [NotificationDbModel],
) -> Vec<&'a NotificationDbModel> {
    let mut matched: Vec<&NotificationDbModel> =
        candidates.iter().filter(|n| matches(event, n)).collect();
    matched.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    matched.dedup_by(|a, b| a.id == b.id);
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{EventType, NotificationType, Severity};

    fn event(account: &str, ty: EventType) -> EventDbModel {
        EventDbModel::new(
            account,
            "node",
            "alias",
            ty,
            Severity::Info,
            "t",
            "d",
            &serde_json::json!({}),
            1,
        )
    }

    fn endpoint(account: &str, created_at: i64) -> NotificationDbModel {
        let mut n = NotificationDbModel::new(
            account,
            "u",
            "hook",
            NotificationType::Webhook,
            "https://example.com",
        );
        n.created_at = created_at;
        n
    }

    #[test]
    fn test_every_active_endpoint_of_account_matches() {
        let e = event("a", EventType::InvoiceSettled);
        let mut inactive = endpoint("a", 3);
        inactive.is_active = false;
        let mut deleted = endpoint("a", 4);
        deleted.is_deleted = true;

        let candidates = vec![
            endpoint("a", 2),
            endpoint("a", 1),
            endpoint("b", 0),
            inactive,
            deleted,
        ];
        let matched = match_event(&e, &candidates);

        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].created_at, 1);
        assert_eq!(matched[1].created_at, 2);
    }

    #[test]
    fn test_subscribed_types_filter() {
        let opened = event("a", EventType::ChannelOpened);
        let settled = event("a", EventType::InvoiceSettled);
        let channels_only = endpoint("a", 1)
            .with_subscribed_types(&[EventType::ChannelOpened, EventType::ChannelClosed]);

        assert!(matches(&opened, &channels_only));
        assert!(!matches(&settled, &channels_only));
    }

    #[test]
    fn test_matching_is_repeatable() {
        let e = event("a", EventType::InvoiceCreated);
        let candidates = vec![endpoint("a", 1), endpoint("a", 2)];
        let first: Vec<&str> = match_event(&e, &candidates).iter().map(|n| n.id.as_str()).collect();
        let second: Vec<&str> = match_event(&e, &candidates).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(first, second);
    }
}
