//! Internal ingestion route used by node integrations.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{IngestEventRequest, IngestEventResponse};
use crate::api::server::AppState;
use crate::events::NewEvent;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Record a node event and schedule its deliveries.
#[utoipa::path(
    post,
    path = "/internal/events",
    tag = "events",
    request_body = IngestEventRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Used when the body has no idempotency_key")
    ),
    responses(
        (status = 201, description = "Event stored", body = IngestEventResponse),
        (status = 400, description = "Invalid event", body = crate::api::error::ApiErrorResponse),
        (status = 409, description = "Duplicate idempotency key", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn ingest_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<IngestEventRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IngestEventResponse>)> {
    let Json(request) = payload?;

    let header_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|v| {
            v.to_str()
                .map(str::to_string)
                .map_err(|_| ApiError::bad_request("Idempotency-Key must be visible ASCII"))
        })
        .transpose()?;

    let new_event = NewEvent {
        account_id: request.account_id,
        node_id: request.node_id,
        node_alias: request.node_alias,
        event_type: request.event_type,
        severity: request.severity,
        title: request.title,
        description: request.description,
        data: if request.data.is_null() {
            serde_json::json!({})
        } else {
            request.data
        },
        timestamp: request.timestamp,
        idempotency_key: request.idempotency_key.or(header_key),
    };

    let receipt = state.event_store.ingest(new_event).await?;
    Ok((
        StatusCode::CREATED,
        Json(IngestEventResponse {
            id: receipt.event.id,
            deliveries: receipt.deliveries,
        }),
    ))
}
