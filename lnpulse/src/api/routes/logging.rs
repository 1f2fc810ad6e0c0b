//! Runtime log filter routes.
//!
//! Mounted under `/internal`, next to ingestion, so only the operator network reaches them.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::get,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateLogFilterRequest {
    /// `EnvFilter` directive, e.g. `lnpulse=debug,sqlx=warn`
    pub filter: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub log_dir: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_log_filter))
}

fn current(state: &AppState) -> ApiResult<LoggingConfigResponse> {
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;
    Ok(LoggingConfigResponse {
        filter: logging_config.get_filter(),
        log_dir: logging_config.log_dir().display().to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/internal/logging",
    tag = "logging",
    responses(
        (status = 200, description = "Current log filter", body = LoggingConfigResponse)
    )
)]
pub async fn get_logging_config(
    State(state): State<AppState>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    Ok(Json(current(&state)?))
}

#[utoipa::path(
    put,
    path = "/internal/logging",
    tag = "logging",
    request_body = UpdateLogFilterRequest,
    responses(
        (status = 200, description = "Filter replaced", body = LoggingConfigResponse),
        (status = 400, description = "Invalid directive", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn update_log_filter(
    State(state): State<AppState>,
    payload: Result<Json<UpdateLogFilterRequest>, JsonRejection>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let Json(request) = payload?;
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;

    logging_config
        .set_filter(request.filter.trim())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    tracing::info!(filter = %request.filter.trim(), "Log filter changed via API");

    Ok(Json(current(&state)?))
}
