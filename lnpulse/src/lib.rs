//! lnpulse library crate.
//!
//! Lightning node event propagation: producers submit node events, matching
//! notification endpoints are resolved per account, and a persisted delivery
//! schedule pushes webhook and Discord payloads with retries.

pub mod api;
pub mod app;
pub mod config;
pub mod database;
pub mod delivery;
pub mod error;
pub mod events;
pub mod logging;
pub mod notification;

pub use error::{Error, Result};
