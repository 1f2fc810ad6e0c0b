//! Process configuration from environment variables.
//!
//! `.env` is loaded by `main` through dotenvy before [`AppConfig::from_env`] runs.
//! Unset variables fall back to defaults; set but unparseable values are
//! configuration errors.

use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::database::MaintenanceConfig;
use crate::delivery::{DeliveryConfig, RetryPolicy};
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:lnpulse.db?mode=rwc";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_RETENTION_DAYS: i64 = 7;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub log_retention_days: i64,
    pub api: ApiServerConfig,
    pub delivery: DeliveryConfig,
    pub maintenance: MaintenanceConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut api = ApiServerConfig::default();
        if let Some(bind_address) = var("API_BIND_ADDRESS") {
            api.bind_address = bind_address;
        }
        api.port = parse_or(&var, "API_PORT", api.port)?;

        let retry_defaults = RetryPolicy::default();
        let delivery_defaults = DeliveryConfig::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(&var, "DELIVERY_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
            base_delay: millis_or(&var, "DELIVERY_BASE_DELAY_MS", retry_defaults.base_delay)?,
            max_delay: millis_or(&var, "DELIVERY_MAX_DELAY_MS", retry_defaults.max_delay)?,
        };
        let delivery = DeliveryConfig {
            retry,
            request_timeout: Duration::from_secs(parse_or(
                &var,
                "DELIVERY_TIMEOUT_SECS",
                delivery_defaults.request_timeout.as_secs(),
            )?),
            max_workers: parse_or(&var, "DELIVERY_MAX_WORKERS", delivery_defaults.max_workers)?,
            per_endpoint_concurrency: parse_or(
                &var,
                "DELIVERY_PER_ENDPOINT_CONCURRENCY",
                delivery_defaults.per_endpoint_concurrency,
            )?,
            poll_interval: millis_or(
                &var,
                "DELIVERY_POLL_INTERVAL_MS",
                delivery_defaults.poll_interval,
            )?,
            lease: Duration::from_secs(parse_or(
                &var,
                "DELIVERY_LEASE_SECS",
                delivery_defaults.lease.as_secs(),
            )?),
        };

        let maintenance_defaults = MaintenanceConfig::default();
        let maintenance = MaintenanceConfig {
            job_retention_days: parse_or(
                &var,
                "DELIVERY_JOB_RETENTION_DAYS",
                maintenance_defaults.job_retention_days,
            )?,
            ..maintenance_defaults
        };

        let config = Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            log_dir: var("LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
            log_retention_days: parse_or(&var, "LOG_RETENTION_DAYS", DEFAULT_LOG_RETENTION_DAYS)?,
            api,
            delivery,
            maintenance,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let delivery = &self.delivery;
        if delivery.retry.max_attempts == 0 {
            return Err(Error::config("DELIVERY_MAX_ATTEMPTS must be at least 1"));
        }
        if delivery.retry.base_delay > delivery.retry.max_delay {
            return Err(Error::config(
                "DELIVERY_BASE_DELAY_MS must not exceed DELIVERY_MAX_DELAY_MS",
            ));
        }
        if delivery.request_timeout.is_zero() {
            return Err(Error::config("DELIVERY_TIMEOUT_SECS must be at least 1"));
        }
        if delivery.max_workers == 0 || delivery.per_endpoint_concurrency == 0 {
            return Err(Error::config(
                "DELIVERY_MAX_WORKERS and DELIVERY_PER_ENDPOINT_CONCURRENCY must be at least 1",
            ));
        }
        // A lease shorter than a request would let a second worker reclaim it mid-flight.
        if delivery.lease <= delivery.request_timeout {
            return Err(Error::config(
                "DELIVERY_LEASE_SECS must be greater than DELIVERY_TIMEOUT_SECS",
            ));
        }
        if self.log_retention_days < 1 {
            return Err(Error::config("LOG_RETENTION_DAYS must be at least 1"));
        }
        Ok(())
    }
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::config(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn millis_or<V>(var: &V, key: &str, default: Duration) -> Result<Duration>
where
    V: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(var, key, default_ms).map(Duration::from_millis)
}
