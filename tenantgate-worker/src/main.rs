//! # TenantGate Worker
//!
//! Runs the periodic background jobs. Start as many replicas as needed; the
//! shared store makes sure each job tick runs on exactly one of them.
//!
//! ## Usage
//!
//! ```bash
//! WORKER__REPLICA_ID=worker-1 cargo run -p tenantgate-worker
//! ```
//!
//! Without `REDIS_URL` the worker refuses to start unless
//! `WORKER__SINGLE_REPLICA=true`, which coordinates through an in-process
//! store.

use std::sync::Arc;
use tenantgate_shared::audit::PgAuditSink;
use tenantgate_shared::authz::PgGrantRepository;
use tenantgate_shared::cache::DistributedCache;
use tenantgate_shared::db::{create_pool, DatabaseConfig};
use tenantgate_shared::lock::SchedulerCoordinator;
use tenantgate_shared::store::{StoreConfig, StoreError};
use tenantgate_worker::config::SchedulerConfig;
use tenantgate_worker::coordination::lock_store;
use tenantgate_worker::jobs::{RetentionJob, TrialExpirationJob};
use tenantgate_worker::scheduler::Scheduler;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!(
        "TenantGate Worker v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = SchedulerConfig::load()?;
    let pool = create_pool(DatabaseConfig::from_env()?).await?;
    let store_config = match StoreConfig::from_env() {
        Ok(store_config) => Some(store_config),
        Err(StoreError::Config(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let store = lock_store(store_config, config.single_replica).await?;

    let cache = DistributedCache::new(store.clone());
    let coordinator = SchedulerCoordinator::new(Some(store), config.replica_id.clone());
    let mut scheduler = Scheduler::new(coordinator);

    scheduler.register(Arc::new(TrialExpirationJob::new(
        pool.clone(),
        cache,
        config.trial_expiration_interval(),
        config.trial_expiration_lock_ttl(),
    )))?;
    scheduler.register(Arc::new(RetentionJob::new(
        PgGrantRepository::new(pool.clone()),
        PgAuditSink::new(pool.clone()),
        config.retention_days,
        config.retention_interval(),
        config.retention_lock_ttl(),
    )))?;

    let shutdown = scheduler.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, finishing running jobs...");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    tracing::info!(replica_id = %config.replica_id, jobs = ?scheduler.job_names(), "Worker ready");
    scheduler.run().await;

    tracing::info!("Worker stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tenantgate_worker=debug,tenantgate_shared=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
