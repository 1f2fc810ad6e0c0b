//! Outbound delivery.
//!
//! - **Backoff**: exponential retry schedule with non-decreasing jitter
//! - **Transport**: HTTP POST and response classification
//! - **Engine**: polls due jobs, enforces concurrency limits, records outcomes

pub mod backoff;
pub mod engine;
pub mod transport;

pub use backoff::RetryPolicy;
pub use engine::{AttemptOutcome, DeliveryConfig, DeliveryEngine};
pub use transport::{DeliveryTransport, HttpTransport};
