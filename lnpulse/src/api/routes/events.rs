//! Event query routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    routing::get,
};

use crate::api::auth::CallerIdentity;
use crate::api::error::ApiResult;
use crate::api::models::{
    DeliveryAttemptResponse, EventDetailResponse, EventListQuery, EventResponse, PaginatedResponse,
};
use crate::api::server::AppState;
use crate::database::models::{EventCursor, SeverityStats};
use crate::events::{EventPage, normalize_paging};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_events))
        .route("/stats", get(event_stats))
        .route("/{id}", get(get_event))
}

/// List the caller's events, newest first.
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "events",
    params(EventListQuery),
    responses(
        (status = 200, description = "Page of events", body = PaginatedResponse<EventResponse>),
        (status = 400, description = "Invalid filter", body = crate::api::error::ApiErrorResponse),
        (status = 401, description = "Missing caller identity", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<EventListQuery>, QueryRejection>,
) -> ApiResult<Json<PaginatedResponse<EventResponse>>> {
    let Query(query) = query?;
    let filters = query.filters()?;
    let store = &state.event_store;

    if let Some(token) = query.page_token.as_deref() {
        let (items, next_page_token) = store
            .list_after(&caller.account_id, &filters, Some(token), query.per_page)
            .await?;
        let (page, per_page) = normalize_paging(query.page, query.per_page);
        let mut response = PaginatedResponse::from(EventPage {
            items,
            total: store.count(&caller.account_id, &filters).await?,
            page,
            per_page,
        });
        response.next_page_token = next_page_token;
        return Ok(Json(response));
    }

    let page = store
        .list(&caller.account_id, &filters, query.page, query.per_page)
        .await?;
    let next_page_token = (page.items.len() == page.per_page as usize)
        .then(|| page.items.last())
        .flatten()
        .map(|e| EventCursor::after(e).encode());

    let mut response = PaginatedResponse::from(page);
    response.next_page_token = next_page_token;
    Ok(Json(response))
}

/// One event with its delivery history.
#[utoipa::path(
    get,
    path = "/api/events/{id}",
    tag = "events",
    params(("id" = String, Path, description = "Event ID")),
    responses(
        (status = 200, description = "Event details", body = EventDetailResponse),
        (status = 404, description = "Event not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn get_event(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<EventDetailResponse>> {
    let event = state
        .event_store
        .get_for_account(&caller.account_id, &id)
        .await?;
    let deliveries = state.event_store.history(&event.id).await?;

    Ok(Json(EventDetailResponse {
        event: event.into(),
        deliveries: deliveries
            .into_iter()
            .map(DeliveryAttemptResponse::from)
            .collect(),
    }))
}

/// Event counts per severity for the caller's account.
#[utoipa::path(
    get,
    path = "/api/events/stats",
    tag = "events",
    responses(
        (status = 200, description = "Severity counts", body = SeverityStats)
    )
)]
pub async fn event_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> ApiResult<Json<SeverityStats>> {
    Ok(Json(
        state.event_store.severity_stats(&caller.account_id).await?,
    ))
}
