//! ballast Load Balancer Reconciler
//!
//! Periodically converges cloud load balancer membership with the job
//! manager's view of running tasks. The reconciler itself only decides and
//! emits desired target transitions; applying them against the cloud API is
//! the downstream batching engine's job.

use std::sync::Arc;

use anyhow::Result;
use ballast_reconciler::client::{CloudApiClient, JobManagerClient};
use ballast_reconciler::config::Config;
use ballast_reconciler::reconciler::LoadBalancerReconciler;
use ballast_reconciler::store::{AssociationStore, MemoryStore, SqliteStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting ballast load balancer reconciler");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        cloud_api_url = %config.cloud_api_url,
        job_manager_url = %config.job_manager_url,
        delay_ms = config.reconcile_delay.as_millis() as u64,
        "Configuration loaded"
    );

    let store: Arc<dyn AssociationStore> = match &config.state_db {
        Some(path) => {
            info!(path = %path.display(), "Using SQLite association store");
            Arc::new(SqliteStore::open(path)?)
        }
        None => {
            info!("Using in-memory association store");
            Arc::new(MemoryStore::new())
        }
    };

    let connector = Arc::new(CloudApiClient::new(config.cloud_api_url.clone())?);
    let jobs = Arc::new(JobManagerClient::new(config.job_manager_url.clone())?);

    let reconciler = Arc::new(LoadBalancerReconciler::new(
        config.reconciler(),
        store,
        connector,
        jobs,
    ));
    let mut events = reconciler.events();

    // The batching engine attaches here; until then, surface every emitted
    // transition in the logs.
    let consumer = tokio::spawn(async move {
        while let Some(transition) = events.recv().await {
            info!(
                target = %transition.target,
                state = %transition.state,
                reason = ?transition.reason,
                "Target transition emitted"
            );
        }
    });

    let runner = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    reconciler.shutdown();

    runner.await?;
    consumer.await?;

    Ok(())
}
