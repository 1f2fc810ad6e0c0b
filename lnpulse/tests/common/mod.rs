//! Shared harness: a file-backed database, a local webhook receiver and the
//! fully wired service graph.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use lnpulse::app::Services;
use lnpulse::database::models::{EventType, NotificationDbModel, NotificationType};
use lnpulse::database::repositories::NotificationRepository;
use lnpulse::database::{DbPool, init_pool, run_migrations};
use lnpulse::delivery::{DeliveryConfig, HttpTransport, RetryPolicy};
use lnpulse::events::NewEvent;

/// One request seen by the receiver.
#[derive(Debug, Clone)]
pub struct Received {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Keeps the next request to a path open until released.
#[derive(Default)]
pub struct Hold {
    entered: Notify,
    release: Notify,
}

impl Hold {
    /// Wait until the held request has arrived.
    pub async fn entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("held request never arrived");
    }

    /// Let the held request answer.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct ReceiverState {
    script: Mutex<HashMap<String, VecDeque<u16>>>,
    holds: Mutex<HashMap<String, Arc<Hold>>>,
    requests: Mutex<Vec<Received>>,
}

/// Local HTTP endpoint that answers with scripted statuses, 200 once a path's
/// script runs out. A 3xx answer carries a `Location` pointing at `/redirected`.
pub struct Receiver {
    addr: SocketAddr,
    state: Arc<ReceiverState>,
    cancel: CancellationToken,
}

impl Receiver {
    pub async fn start() -> Self {
        let state = Arc::new(ReceiverState::default());
        let app = Router::new()
            .route("/{name}", post(receive))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            cancel,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("http://{}/{}", self.addr, name)
    }

    /// Queue response statuses for `/{name}`.
    pub fn script(&self, name: &str, statuses: &[u16]) {
        self.state
            .script
            .lock()
            .entry(format!("/{}", name))
            .or_default()
            .extend(statuses.iter().copied());
    }

    /// Hold the next request to `/{name}` until [`Hold::release`].
    pub fn hold(&self, name: &str) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        self.state
            .holds
            .lock()
            .insert(format!("/{}", name), hold.clone());
        hold
    }

    pub fn requests_to(&self, name: &str) -> Vec<Received> {
        let path = format!("/{}", name);
        self.state
            .requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive(
    State(state): State<Arc<ReceiverState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/{}", name);
    let hold = state.holds.lock().remove(&path);
    if let Some(hold) = hold {
        hold.entered.notify_one();
        hold.release.notified().await;
    }

    let status = state
        .script
        .lock()
        .get_mut(&path)
        .and_then(|q| q.pop_front())
        .unwrap_or(200);
    state.requests.lock().push(Received {
        path,
        headers,
        body,
    });
    let status = StatusCode::from_u16(status).unwrap();
    if status.is_redirection() {
        return (status, [(header::LOCATION, HeaderValue::from_static("/redirected"))]).into_response();
    }
    status.into_response()
}

/// Services over a throwaway database. With [`TestApp::new`] retries are due
/// immediately, so `engine.run_once()` drives every attempt to a terminal state.
pub struct TestApp {
    pub services: Services,
    pub pool: DbPool,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new(max_attempts: u32) -> Self {
        Self::with_retry(RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        })
        .await
    }

    pub async fn with_retry(retry: RetryPolicy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("lnpulse.db").display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let config = DeliveryConfig {
            retry,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let transport = Arc::new(HttpTransport::new(config.request_timeout).unwrap());
        let services = Services::new(pool.clone(), config, transport, CancellationToken::new());

        Self {
            services,
            pool,
            _dir: dir,
        }
    }

    /// Make every pending job due now.
    pub async fn expire_backoff(&self) {
        sqlx::query("UPDATE delivery_jobs SET next_attempt_at = 0 WHERE state = 'PENDING'")
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub fn router(&self) -> Router {
        lnpulse::api::routes::create_router(self.services.app_state())
    }

    /// Store an endpoint directly; the registry only accepts https URLs.
    pub async fn add_webhook(
        &self,
        account_id: &str,
        url: &str,
        secret: Option<&str>,
        types: &[EventType],
    ) -> NotificationDbModel {
        let mut notification = NotificationDbModel::new(
            account_id,
            "user-1",
            "receiver",
            NotificationType::Webhook,
            url,
        );
        if let Some(secret) = secret {
            notification = notification.with_secret(secret);
        }
        if !types.is_empty() {
            notification = notification.with_subscribed_types(types);
        }
        self.services
            .notifications
            .create_notification(&notification)
            .await
            .unwrap();
        notification
    }

    /// Store a Discord endpoint directly, pointed at the local receiver.
    pub async fn add_discord(
        &self,
        account_id: &str,
        url: &str,
        secret: Option<&str>,
    ) -> NotificationDbModel {
        let mut notification = NotificationDbModel::new(
            account_id,
            "user-1",
            "discord",
            NotificationType::Discord,
            url,
        );
        if let Some(secret) = secret {
            notification = notification.with_secret(secret);
        }
        self.services
            .notifications
            .create_notification(&notification)
            .await
            .unwrap();
        notification
    }
}

pub fn new_event(account_id: &str, event_type: EventType) -> NewEvent {
    NewEvent {
        account_id: account_id.to_string(),
        node_id: "03aa".to_string(),
        node_alias: "alice".to_string(),
        event_type: event_type.as_str().to_string(),
        severity: "Info".to_string(),
        title: format!("{} on alice", event_type.as_str()),
        description: String::new(),
        data: serde_json::json!({ "amount_msat": 1000 }),
        timestamp: chrono::Utc::now(),
        idempotency_key: None,
    }
}
