//! Periodic database maintenance.
//!
//! Prunes terminal delivery jobs past their retention window and checkpoints the
//! WAL. The delivery ledger is never pruned here.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::database::DbPool;
use crate::database::repositories::DeliveryRepository;

/// Configuration for the maintenance scheduler.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Interval between maintenance runs (default: 1 hour).
    pub interval: Duration,
    /// Finished job retention period in days (default: 30).
    pub job_retention_days: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            job_retention_days: 30,
        }
    }
}

/// Database maintenance scheduler.
pub struct MaintenanceScheduler {
    pool: DbPool,
    deliveries: Arc<dyn DeliveryRepository>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(
        pool: DbPool,
        deliveries: Arc<dyn DeliveryRepository>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            pool,
            deliveries,
            config,
        }
    }

    /// Start the maintenance loop; it exits when `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            // The first tick completes immediately; skip it so startup stays quiet.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Maintenance scheduler stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.run_maintenance().await {
                            error!("Maintenance error: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Run all maintenance tasks once.
    pub async fn run_maintenance(&self) -> Result<u64> {
        debug!("Starting database maintenance");

        let jobs_deleted = self
            .deliveries
            .cleanup_finished_jobs(self.config.job_retention_days)
            .await?;
        if jobs_deleted > 0 {
            info!("Cleaned up {} finished delivery jobs", jobs_deleted);
        }

        let (busy, log, checkpointed): (i64, i64, i64) =
            sqlx::query_as("PRAGMA wal_checkpoint(PASSIVE)")
                .fetch_one(&self.pool)
                .await?;
        debug!(
            "WAL checkpoint: busy={}, log={}, checkpointed={}",
            busy, log, checkpointed
        );

        Ok(jobs_deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqlxDeliveryRepository;
    use crate::database::{init_pool_with_size, run_migrations};

    #[tokio::test]
    async fn test_run_maintenance_on_empty_db() {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let scheduler = MaintenanceScheduler::new(
            pool.clone(),
            Arc::new(SqlxDeliveryRepository::new(pool)),
            MaintenanceConfig::default(),
        );
        assert_eq!(scheduler.run_maintenance().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_cancel() {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let scheduler = Arc::new(MaintenanceScheduler::new(
            pool.clone(),
            Arc::new(SqlxDeliveryRepository::new(pool)),
            MaintenanceConfig::default(),
        ));
        let cancel = CancellationToken::new();
        let handle = scheduler.start(cancel.clone());
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
