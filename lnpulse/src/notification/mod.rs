//! Notification endpoints and payload rendering.
//!
//! - **Registry**: validated endpoint registration, activation and soft delete
//! - **Matcher**: resolves the endpoints that receive an event
//! - **Formatter**: webhook envelopes and Discord embeds
//! - **Signing**: HMAC-SHA256 body signatures for secret-bearing webhooks

pub mod formatter;
pub mod matcher;
pub mod registry;
pub mod signing;

pub use formatter::{Payload, format};
pub use matcher::match_event;
pub use registry::{NewNotification, NotificationRegistry, validate_url};
