//! REST API.
//!
//! - `POST /internal/events`: ingestion for node integrations
//! - `/api/events`: event queries with delivery history
//! - `/api/notification`: endpoint management
//! - `/api/health`: liveness and readiness probes

pub mod auth;
pub mod error;
pub mod models;
pub mod openapi;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
