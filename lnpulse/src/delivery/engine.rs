//! Delivery engine.
//!
//! Polls the persisted schedule for due jobs, leases them and runs one attempt
//! per job on a bounded worker pool. Each outcome is written to the ledger in the
//! same transaction that advances the job, so a restart resumes exactly where
//! the schedule left off.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::RetryPolicy;
use super::transport::DeliveryTransport;
use crate::database::models::{AttemptStatus, DeliveryAttemptDbModel, DeliveryJobDbModel};
use crate::database::repositories::{DeliveryRepository, JobTransition, NotificationRepository};
use crate::database::time::{add_duration_ms, now_ms};
use crate::notification::Payload;
use crate::notification::formatter::delivery_headers;
use crate::{Error, Result};

/// Delivery engine configuration.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub retry: RetryPolicy,
    /// Hard timeout for a single HTTP request.
    pub request_timeout: Duration,
    /// Attempts in flight across all endpoints.
    pub max_workers: usize,
    /// Attempts in flight against a single endpoint.
    pub per_endpoint_concurrency: usize,
    /// Fallback poll interval when nothing wakes the engine.
    pub poll_interval: Duration,
    /// How long a claimed job stays invisible to other pollers.
    pub lease: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            max_workers: 16,
            per_endpoint_concurrency: 2,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(60),
        }
    }
}

/// What a single attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub status: AttemptStatus,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub transition: JobTransition,
}

impl AttemptOutcome {
    /// Map a transport result onto a ledger status and job transition.
    pub fn from_result(
        policy: &RetryPolicy,
        attempt_number: u32,
        result: &Result<u16>,
        now: i64,
    ) -> Self {
        match result {
            Ok(http_status) => Self {
                status: AttemptStatus::Succeeded,
                http_status: Some(*http_status),
                error: None,
                transition: JobTransition::Succeeded,
            },
            Err(e) if e.is_retryable() && policy.should_retry(attempt_number) => {
                let retry_after = match e {
                    Error::TransientDelivery { retry_after, .. } => *retry_after,
                    _ => None,
                };
                let delay = policy.delay_with_hint(attempt_number, retry_after);
                Self {
                    status: AttemptStatus::Pending,
                    http_status: e.delivery_status(),
                    error: Some(e.to_string()),
                    transition: JobTransition::Retry {
                        next_attempt_at: add_duration_ms(now, delay),
                    },
                }
            }
            Err(e) => Self {
                status: AttemptStatus::Failed,
                http_status: e.delivery_status(),
                error: Some(e.to_string()),
                transition: JobTransition::Failed,
            },
        }
    }

    fn next_retry_at(&self) -> Option<i64> {
        match self.transition {
            JobTransition::Retry { next_attempt_at } => Some(next_attempt_at),
            _ => None,
        }
    }
}

/// Schedules and executes delivery attempts.
pub struct DeliveryEngine {
    config: DeliveryConfig,
    notifications: Arc<dyn NotificationRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    transport: Arc<dyn DeliveryTransport>,
    /// Global worker pool.
    workers: Arc<Semaphore>,
    /// Per-endpoint in-flight limit, keyed by notification id.
    endpoint_limits: DashMap<String, Arc<Semaphore>>,
    notify: Notify,
    cancellation_token: CancellationToken,
}

impl DeliveryEngine {
    pub fn new(
        config: DeliveryConfig,
        notifications: Arc<dyn NotificationRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        transport: Arc<dyn DeliveryTransport>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            config,
            notifications,
            deliveries,
            transport,
            endpoint_limits: DashMap::new(),
            notify: Notify::new(),
            cancellation_token,
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Nudge the poller after new jobs were enqueued.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Stop claiming new jobs. In-flight attempts run to completion.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    /// Start the polling loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run().await })
    }

    async fn run(self: Arc<Self>) {
        info!(
            max_workers = self.config.max_workers,
            per_endpoint = self.config.per_endpoint_concurrency,
            "Delivery engine started"
        );
        let mut tasks = JoinSet::new();

        loop {
            loop {
                match self.dispatch_due(&mut tasks).await {
                    Ok(0) => break,
                    Ok(n) => debug!("Dispatched {} delivery attempts", n),
                    Err(e) => {
                        error!("Failed to claim due deliveries: {}", e);
                        break;
                    }
                }
            }

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!("Delivery task failed: {}", e);
                }
            }
            self.prune_idle_limiters();

            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight deliveries", tasks.len());
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Delivery task failed: {}", e);
            }
        }
        info!("Delivery engine stopped");
    }

    /// Dispatch everything currently due and wait for it, until nothing is due.
    ///
    /// Returns the number of attempts made.
    pub async fn run_once(self: &Arc<Self>) -> Result<usize> {
        let mut total = 0;
        loop {
            let mut tasks = JoinSet::new();
            let dispatched = self.dispatch_due(&mut tasks).await?;
            if dispatched == 0 {
                self.prune_idle_limiters();
                return Ok(total);
            }
            total += dispatched;
            while tasks.join_next().await.is_some() {}
        }
    }

    fn endpoint_limiter(&self, notification_id: &str) -> Arc<Semaphore> {
        self.endpoint_limits
            .entry(notification_id.to_string())
            .or_insert_with(|| {
                Arc::new(Semaphore::new(self.config.per_endpoint_concurrency.max(1)))
            })
            .clone()
    }

    /// Forget limiters with nothing in flight, so the map tracks busy endpoints only.
    fn prune_idle_limiters(&self) {
        let idle = self.config.per_endpoint_concurrency.max(1);
        self.endpoint_limits
            .retain(|_, limiter| limiter.available_permits() < idle);
    }

    fn saturated_endpoints(&self) -> Vec<String> {
        self.endpoint_limits
            .iter()
            .filter(|entry| entry.value().available_permits() == 0)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Claim due jobs up to the free worker capacity and spawn their attempts.
    async fn dispatch_due(self: &Arc<Self>, tasks: &mut JoinSet<()>) -> Result<usize> {
        let capacity = self.workers.available_permits();
        if capacity == 0 {
            return Ok(0);
        }

        let now = now_ms();
        let lease_until = add_duration_ms(now, self.config.lease);
        let jobs = self
            .deliveries
            .claim_due_jobs(now, lease_until, capacity as i64, &self.saturated_endpoints())
            .await?;

        let mut blocked: HashSet<String> = HashSet::new();
        let mut dispatched = 0;

        for job in jobs {
            if blocked.contains(&job.notification_id) {
                self.deliveries.release_claim(&job.id).await?;
                continue;
            }
            let Ok(worker) = Arc::clone(&self.workers).try_acquire_owned() else {
                self.deliveries.release_claim(&job.id).await?;
                continue;
            };
            let Ok(endpoint) = self
                .endpoint_limiter(&job.notification_id)
                .try_acquire_owned()
            else {
                // Leave the rest of this endpoint's jobs for a later pass.
                blocked.insert(job.notification_id.clone());
                self.deliveries.release_claim(&job.id).await?;
                continue;
            };

            let engine = Arc::clone(self);
            tasks.spawn(async move {
                let _permits = (worker, endpoint);
                let job_id = job.id.clone();
                if let Err(e) = engine.execute_attempt(job).await {
                    error!(job_id = %job_id, "Delivery attempt failed to complete: {}", e);
                }
                engine.notify.notify_one();
            });
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Run one attempt for a claimed job and record its outcome.
    async fn execute_attempt(&self, job: DeliveryJobDbModel) -> Result<()> {
        let notification = match self.notifications.get_notification(&job.notification_id).await {
            Ok(notification) => Some(notification),
            Err(Error::NotFound { .. }) => None,
            Err(e) => {
                self.deliveries.release_claim(&job.id).await?;
                return Err(e);
            }
        };

        let Some(notification) = notification.filter(|n| n.is_deliverable()) else {
            if self.deliveries.cancel_job(&job.id).await? {
                info!(
                    event_id = %job.event_id,
                    notification_id = %job.notification_id,
                    "Delivery cancelled: endpoint inactive"
                );
            }
            return Ok(());
        };

        let result = match delivery_headers(&notification, &job.event_id, &job.payload) {
            Ok(headers) => {
                let payload = Payload {
                    body: job.payload.clone(),
                    headers,
                };
                self.transport.deliver(&notification.url, &payload).await
            }
            Err(e) => Err(Error::PermanentDelivery {
                status: None,
                message: e.to_string(),
            }),
        };

        let attempt_number = u32::try_from(job.attempt_number).unwrap_or(u32::MAX);
        let now = now_ms();
        let outcome = AttemptOutcome::from_result(&self.config.retry, attempt_number, &result, now);
        let mut attempt = DeliveryAttemptDbModel::new(
            &job,
            outcome.status,
            outcome.http_status,
            outcome.error.clone(),
            outcome.next_retry_at(),
        );
        attempt.attempted_at = now;

        if !self
            .deliveries
            .complete_attempt(&job, &attempt, outcome.transition)
            .await?
        {
            warn!(
                event_id = %job.event_id,
                notification_id = %job.notification_id,
                attempt = job.attempt_number,
                "Attempt already recorded elsewhere; discarding result"
            );
            return Ok(());
        }

        match outcome.status {
            AttemptStatus::Succeeded => debug!(
                event_id = %job.event_id,
                notification_id = %job.notification_id,
                attempt = job.attempt_number,
                "Delivered"
            ),
            AttemptStatus::Pending => warn!(
                event_id = %job.event_id,
                notification_id = %job.notification_id,
                attempt = job.attempt_number,
                "Delivery failed, retry scheduled: {}",
                outcome.error.as_deref().unwrap_or_default()
            ),
            AttemptStatus::Failed => error!(
                event_id = %job.event_id,
                notification_id = %job.notification_id,
                attempt = job.attempt_number,
                "Delivery failed permanently: {}",
                outcome.error.as_deref().unwrap_or_default()
            ),
        }
        Ok(())
    }
}
