//! Webhook receiver for local testing of lnpulse deliveries.
//!
//! Run:
//!   WEBHOOK_SECRET=dev-secret cargo run -p lnpulse --example webhook_receiver
//!
//! Register it (lnpulse only accepts https targets, so put a TLS proxy in front)
//! and ingest an event:
//!   curl -X POST http://127.0.0.1:12600/internal/events -H "content-type: application/json" \
//!     -d '{"account_id":"acct","node_id":"03aa","event_type":"InvoiceSettled","severity":"Info","title":"paid","timestamp":"2026-01-01T00:00:00Z"}'
//!
//! Set WEBHOOK_FAIL_FIRST=N to answer the first N deliveries with 503 and watch
//! the retries arrive.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::Router;
use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lnpulse::notification::formatter::EVENT_ID_HEADER;
use lnpulse::notification::signing::{SIGNATURE_HEADER, verify};

#[derive(Debug)]
struct ReceiverState {
    secret: Option<String>,
    body_limit_bytes: usize,
    fail_first: u32,
    received: AtomicU32,
}

impl ReceiverState {
    fn from_env() -> Self {
        let secret = std::env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let body_limit_bytes = std::env::var("WEBHOOK_BODY_LIMIT_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1024 * 1024);

        let fail_first = std::env::var("WEBHOOK_FAIL_FIRST")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);

        Self {
            secret,
            body_limit_bytes,
            fail_first,
            received: AtomicU32::new(0),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let addr: SocketAddr = std::env::var("WEBHOOK_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:12333".to_string())
        .parse()?;

    let state = Arc::new(ReceiverState::from_env());

    let app = Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/webhook", post(webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    info!(%addr, "webhook receiver listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn webhook(State(state): State<Arc<ReceiverState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let bytes = match to_bytes(body, state.body_limit_bytes).await {
        Ok(b) => b,
        Err(err) => {
            warn!(%err, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "invalid body").into_response();
        }
    };

    if let Some(secret) = state.secret.as_deref() {
        let signature = parts
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify(secret, &bytes, signature) {
            warn!("rejected webhook: missing or invalid signature");
            return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
        }
    }

    let seen = state.received.fetch_add(1, Ordering::SeqCst) + 1;
    let event_id = parts
        .headers
        .get(EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    if seen <= state.fail_first {
        warn!(%event_id, seen, "failing delivery on purpose");
        return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
    }

    let event: Option<Value> = serde_json::from_slice(&bytes).ok();
    info!(
        %event_id,
        event_type = ?event.as_ref().and_then(|e| e.get("event_type")),
        title = ?event.as_ref().and_then(|e| e.get("title")),
        "received event"
    );

    (StatusCode::OK, axum::Json(json!({ "ok": true }))).into_response()
}
