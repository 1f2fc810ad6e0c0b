//! OpenAPI documentation configuration.
//!
//! The document is served at `/api-docs/openapi.json` with Swagger UI at `/swagger-ui`.

use utoipa::OpenApi;

use crate::api::models::{
    ComponentHealth, CreateNotificationRequest, DeliveryAttemptResponse, EventDetailResponse,
    EventResponse, HealthResponse, IngestEventRequest, IngestEventResponse,
    NotificationEventResponse, NotificationResponse, PaginatedResponse, UpdateNotificationRequest,
};
use crate::api::routes::health::LivenessResponse;
use crate::database::models::{
    AttemptStatus, DeliveryStats, EventType, NotificationType, Severity, SeverityStats,
};

/// OpenAPI documentation for the lnpulse API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "lnpulse API",
        version = "0.1.0",
        description = "Lightning node event ingestion, notification endpoint management and delivery history.",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:12600", description = "Local development server")
    ),
    tags(
        (name = "health", description = "Health check endpoints for monitoring and orchestration"),
        (name = "events", description = "Event ingestion and queries"),
        (name = "notifications", description = "Notification endpoint management"),
        (name = "logging", description = "Runtime log filter")
    ),
    paths(
        crate::api::routes::health::health_check,
        crate::api::routes::health::readiness_check,
        crate::api::routes::health::liveness_check,
        crate::api::routes::ingest::ingest_event,
        crate::api::routes::events::list_events,
        crate::api::routes::events::get_event,
        crate::api::routes::events::event_stats,
        crate::api::routes::notifications::list_notifications,
        crate::api::routes::notifications::create_notification,
        crate::api::routes::notifications::get_notification,
        crate::api::routes::notifications::update_notification,
        crate::api::routes::notifications::delete_notification,
        crate::api::routes::notifications::activate_notification,
        crate::api::routes::notifications::deactivate_notification,
        crate::api::routes::notifications::notification_stats,
        crate::api::routes::notifications::notification_events,
        crate::api::routes::logging::get_logging_config,
        crate::api::routes::logging::update_log_filter,
    ),
    components(
        schemas(
            HealthResponse,
            ComponentHealth,
            LivenessResponse,
            crate::api::routes::logging::LoggingConfigResponse,
            crate::api::routes::logging::UpdateLogFilterRequest,
            crate::api::error::ApiErrorResponse,
            IngestEventRequest,
            IngestEventResponse,
            EventResponse,
            EventDetailResponse,
            DeliveryAttemptResponse,
            PaginatedResponse<EventResponse>,
            NotificationEventResponse,
            PaginatedResponse<NotificationEventResponse>,
            SeverityStats,
            CreateNotificationRequest,
            UpdateNotificationRequest,
            NotificationResponse,
            DeliveryStats,
            EventType,
            Severity,
            NotificationType,
            AttemptStatus,
        )
    ),
    modifiers(&CallerHeadersAddon)
)]
pub struct ApiDoc;

/// Documents the identity headers forwarded by the gateway.
struct CallerHeadersAddon;

impl utoipa::Modify for CallerHeadersAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "account_id",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Account-Id"),
                    ),
                ),
            );
        }
    }
}
