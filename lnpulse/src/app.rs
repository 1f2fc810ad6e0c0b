//! Service wiring shared by the binary and integration tests.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::database::DbPool;
use crate::database::repositories::{
    DeliveryRepository, NotificationRepository, SqlxDeliveryRepository, SqlxEventRepository,
    SqlxNotificationRepository,
};
use crate::delivery::{DeliveryConfig, DeliveryEngine, DeliveryTransport};
use crate::events::EventStore;
use crate::notification::NotificationRegistry;

/// Every long-lived service, built over one pool.
#[derive(Clone)]
pub struct Services {
    pub pool: DbPool,
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub registry: Arc<NotificationRegistry>,
    pub engine: Arc<DeliveryEngine>,
    pub event_store: Arc<EventStore>,
}

impl Services {
    /// Wire repositories, the engine and the event store. Nothing is started.
    pub fn new(
        pool: DbPool,
        delivery_config: DeliveryConfig,
        transport: Arc<dyn DeliveryTransport>,
        cancel_token: CancellationToken,
    ) -> Self {
        let deliveries: Arc<dyn DeliveryRepository> =
            Arc::new(SqlxDeliveryRepository::new(pool.clone()));
        let notifications: Arc<dyn NotificationRepository> =
            Arc::new(SqlxNotificationRepository::new(pool.clone()));

        let engine = Arc::new(DeliveryEngine::new(
            delivery_config,
            notifications.clone(),
            deliveries.clone(),
            transport,
            cancel_token,
        ));
        let event_store = Arc::new(
            EventStore::new(
                pool.clone(),
                Arc::new(SqlxEventRepository::new(pool.clone())),
                deliveries.clone(),
            )
            .with_engine(engine.clone()),
        );
        let registry = Arc::new(NotificationRegistry::new(notifications.clone()));

        Self {
            pool,
            deliveries,
            notifications,
            registry,
            engine,
            event_store,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.pool.clone(),
            self.event_store.clone(),
            self.registry.clone(),
            self.deliveries.clone(),
        )
    }
}
