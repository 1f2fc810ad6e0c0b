//! API route modules.
//!
//! Organizes routes by resource type.

pub mod events;
pub mod health;
pub mod ingest;
pub mod logging;
pub mod notifications;

use axum::{Router, routing::post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::openapi::ApiDoc;
use crate::api::server::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/internal/events", post(ingest::ingest_event))
        .nest("/internal/logging", logging::router())
        .nest("/api/events", events::router())
        .nest("/api/notification", notifications::router())
        .nest("/api/health", health::router())
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

