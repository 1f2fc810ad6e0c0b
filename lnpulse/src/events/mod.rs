//! Node event ingestion and queries.

pub mod store;

pub use store::{EventPage, EventStore, IngestReceipt, NewEvent, normalize_paging};
