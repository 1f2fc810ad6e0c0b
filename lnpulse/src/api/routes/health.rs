//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::models::{ComponentHealth, HealthResponse};
use crate::api::server::AppState;
use crate::database;

/// Liveness check response.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct LivenessResponse {
    /// Always "alive" if responding
    pub status: String,
    pub uptime_secs: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

async fn database_health(state: &AppState) -> ComponentHealth {
    match database::ping(&state.pool).await {
        Ok(()) => ComponentHealth {
            name: "database".to_string(),
            status: "healthy".to_string(),
            message: None,
        },
        Err(e) => ComponentHealth {
            name: "database".to_string(),
            status: "unhealthy".to_string(),
            message: Some(e.to_string()),
        },
    }
}

/// Overall health with per-component status.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let components = vec![database_health(&state).await];
    let status = if components.iter().all(|c| c.status == "healthy") {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        components,
    })
}

/// Readiness check: 200 when the database answers, 503 otherwise.
#[utoipa::path(
    get,
    path = "/api/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Ready to accept traffic"),
        (status = 503, description = "Database unavailable")
    )
)]
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match database::ping(&state.pool).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "not ready")
        }
    }
}

/// Liveness check.
#[utoipa::path(
    get,
    path = "/api/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Process is responsive", body = LivenessResponse)
    )
)]
pub async fn liveness_check(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
