use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lnpulse::api::ApiServer;
use lnpulse::app::Services;
use lnpulse::config::AppConfig;
use lnpulse::database::{self, MaintenanceScheduler};
use lnpulse::delivery::HttpTransport;
use lnpulse::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir, config.log_retention_days)?;

    info!("Starting lnpulse v{}", env!("CARGO_PKG_VERSION"));

    let pool = database::init_pool(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    database::run_migrations(&pool).await?;

    let cancel_token = CancellationToken::new();
    let transport = Arc::new(HttpTransport::new(config.delivery.request_timeout)?);
    let services = Services::new(
        pool.clone(),
        config.delivery.clone(),
        transport,
        cancel_token.child_token(),
    );

    let engine_handle = services.engine.start();
    let maintenance_handle = Arc::new(MaintenanceScheduler::new(
        pool.clone(),
        services.deliveries.clone(),
        config.maintenance.clone(),
    ))
    .start(cancel_token.child_token());
    let log_cleanup_handle = logging_config.start_retention_cleanup(cancel_token.child_token());

    let state = services.app_state().with_logging_config(logging_config);
    let server = ApiServer::new(config.api.clone(), state, cancel_token.child_token());

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    let served = server.run().await;
    cancel_token.cancel();

    for (name, handle) in [
        ("delivery engine", engine_handle),
        ("maintenance", maintenance_handle),
        ("log cleanup", log_cleanup_handle),
    ] {
        if let Err(e) = handle.await {
            error!("{} task failed: {}", name, e);
        }
    }

    pool.close().await;
    info!("lnpulse stopped");
    served.map_err(Into::into)
}
