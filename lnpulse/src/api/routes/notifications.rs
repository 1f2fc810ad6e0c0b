//! Notification endpoint routes.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    routing::{get, post},
};

use crate::api::auth::CallerIdentity;
use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    CreateNotificationRequest, NotificationEventResponse, NotificationResponse, PageQuery,
    PaginatedResponse, UpdateNotificationRequest, parse_event_types,
};
use crate::api::server::AppState;
use crate::database::models::{DeliveryStats, NotificationType, NotificationUpdate};
use crate::notification::NewNotification;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications).post(create_notification))
        .route(
            "/{id}",
            get(get_notification)
                .patch(update_notification)
                .delete(delete_notification),
        )
        .route("/{id}/activate", post(activate_notification))
        .route("/{id}/deactivate", post(deactivate_notification))
        .route("/{id}/stats", get(notification_stats))
        .route("/{id}/events", get(notification_events))
}

/// List the caller's endpoints.
#[utoipa::path(
    get,
    path = "/api/notification",
    tag = "notifications",
    responses(
        (status = 200, description = "Endpoints, newest first", body = Vec<NotificationResponse>),
        (status = 401, description = "Missing caller identity", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> ApiResult<Json<Vec<NotificationResponse>>> {
    let notifications = state.registry.list(&caller.account_id).await?;
    Ok(Json(
        notifications
            .into_iter()
            .map(NotificationResponse::from)
            .collect(),
    ))
}

/// Register an endpoint.
#[utoipa::path(
    post,
    path = "/api/notification",
    tag = "notifications",
    request_body = CreateNotificationRequest,
    responses(
        (status = 201, description = "Endpoint registered", body = NotificationResponse),
        (status = 400, description = "Invalid type or URL", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn create_notification(
    State(state): State<AppState>,
    caller: CallerIdentity,
    payload: Result<Json<CreateNotificationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<NotificationResponse>)> {
    let Json(request) = payload?;

    let notification_type = NotificationType::parse(&request.notification_type).ok_or_else(|| {
        ApiError::validation(format!(
            "Unknown notification_type '{}', expected Webhook or Discord",
            request.notification_type
        ))
    })?;
    let subscribed_types = parse_event_types(request.subscribed_types.as_deref().unwrap_or(&[]))?;

    let notification = state
        .registry
        .register(NewNotification {
            account_id: caller.account_id,
            user_id: caller.user_id,
            name: request.name,
            notification_type,
            url: request.url,
            secret: request.secret,
            subscribed_types,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(notification.into())))
}

#[utoipa::path(
    get,
    path = "/api/notification/{id}",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Endpoint", body = NotificationResponse),
        (status = 404, description = "Not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn get_notification(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationResponse>> {
    let notification = state.registry.get(&caller.account_id, &id).await?;
    Ok(Json(notification.into()))
}

/// Edit an endpoint. Omitted fields stay unchanged.
#[utoipa::path(
    patch,
    path = "/api/notification/{id}",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    request_body = UpdateNotificationRequest,
    responses(
        (status = 200, description = "Updated endpoint", body = NotificationResponse),
        (status = 400, description = "Invalid update", body = crate::api::error::ApiErrorResponse),
        (status = 404, description = "Not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn update_notification(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    payload: Result<Json<UpdateNotificationRequest>, JsonRejection>,
) -> ApiResult<Json<NotificationResponse>> {
    let Json(request) = payload?;

    let subscribed_types = request
        .subscribed_types
        .as_deref()
        .map(parse_event_types)
        .transpose()?;
    let update = NotificationUpdate {
        name: request.name,
        url: request.url,
        secret: request.secret.map(|s| Some(s).filter(|s| !s.is_empty())),
        subscribed_types,
        is_active: request.is_active,
    };

    let notification = state
        .registry
        .update(&caller.account_id, &id, update)
        .await?;
    Ok(Json(notification.into()))
}

/// Soft-delete an endpoint; pending deliveries to it are cancelled.
#[utoipa::path(
    delete,
    path = "/api/notification/{id}",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn delete_notification(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.delete(&caller.account_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/notification/{id}/activate",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Endpoint activated", body = NotificationResponse),
        (status = 404, description = "Not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn activate_notification(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationResponse>> {
    let notification = state.registry.activate(&caller.account_id, &id).await?;
    Ok(Json(notification.into()))
}

/// Stop new attempts. Attempts already in flight finish.
#[utoipa::path(
    post,
    path = "/api/notification/{id}/deactivate",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Endpoint deactivated", body = NotificationResponse),
        (status = 404, description = "Not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn deactivate_notification(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationResponse>> {
    let notification = state.registry.deactivate(&caller.account_id, &id).await?;
    Ok(Json(notification.into()))
}

/// Delivery counters from the ledger.
#[utoipa::path(
    get,
    path = "/api/notification/{id}/stats",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Delivery counters", body = DeliveryStats),
        (status = 404, description = "Not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn notification_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<DeliveryStats>> {
    let notification = state.registry.get(&caller.account_id, &id).await?;
    Ok(Json(state.deliveries.status_for(&notification.id).await?))
}

/// Events routed to this endpoint, newest first, with their latest attempt.
#[utoipa::path(
    get,
    path = "/api/notification/{id}/events",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID"), PageQuery),
    responses(
        (status = 200, description = "Page of routed events", body = PaginatedResponse<NotificationEventResponse>),
        (status = 400, description = "Invalid paging", body = crate::api::error::ApiErrorResponse),
        (status = 404, description = "Not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn notification_events(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<PaginatedResponse<NotificationEventResponse>>> {
    let Query(query) = query?;
    let notification = state.registry.get(&caller.account_id, &id).await?;
    let page = state
        .event_store
        .list_for_notification(&notification.id, query.page, query.per_page)
        .await?;
    Ok(Json(page.into()))
}
