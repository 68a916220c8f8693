use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::reconciler::ReconcilerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub reconcile_delay: Duration,
    pub reconcile_timeout: Duration,
    pub max_concurrent_reconciles: usize,
    pub cloud_api_url: String,
    pub job_manager_url: String,
    pub state_db: Option<PathBuf>,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let reconcile_delay_ms = std::env::var("BALLAST_RECONCILE_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30_000u64);

        // Unless overridden, a tick may run for at most ten delays.
        let reconcile_timeout_ms = std::env::var("BALLAST_RECONCILE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(reconcile_delay_ms * 10);

        let max_concurrent_reconciles = std::env::var("BALLAST_MAX_CONCURRENT_RECONCILES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(16);

        let cloud_api_url = std::env::var("BALLAST_CLOUD_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:7200".to_string());

        let job_manager_url = std::env::var("BALLAST_JOB_MANAGER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:7100".to_string());

        let state_db = std::env::var("BALLAST_STATE_DB").ok().map(PathBuf::from);

        let log_level = std::env::var("BALLAST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            reconcile_delay: Duration::from_millis(reconcile_delay_ms),
            reconcile_timeout: Duration::from_millis(reconcile_timeout_ms),
            max_concurrent_reconciles,
            cloud_api_url,
            job_manager_url,
            state_db,
            log_level,
        })
    }

    /// The subset of configuration consumed by the reconciliation loop.
    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            reconcile_delay: self.reconcile_delay,
            reconcile_timeout: self.reconcile_timeout,
            max_concurrent_reconciles: self.max_concurrent_reconciles,
        }
    }
}
