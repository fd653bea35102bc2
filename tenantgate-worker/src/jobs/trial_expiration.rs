/// Trial expiration job
///
/// Every hour, one replica deactivates tenants whose trial ended and marks
/// them `expired`. Tenant rows and partitions are kept. The cached standing
/// of each deactivated tenant is dropped so API replicas refuse it on the
/// next request. Counts of running and soon-ending trials are logged after
/// each run.

use crate::scheduler::PeriodicJob;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tenantgate_shared::cache::DistributedCache;
use tenantgate_shared::models::Tenant;
use tenantgate_shared::tenancy::status::tenant_status_key;

pub const JOB_NAME: &str = "trial_expiration";

pub struct TrialExpirationJob {
    db: PgPool,
    cache: DistributedCache,
    interval: Duration,
    lock_ttl: Duration,
}

impl TrialExpirationJob {
    pub fn new(db: PgPool, cache: DistributedCache, interval: Duration, lock_ttl: Duration) -> Self {
        Self {
            db,
            cache,
            interval,
            lock_ttl,
        }
    }
}

#[async_trait]
impl PeriodicJob for TrialExpirationJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    async fn run(&self) -> anyhow::Result<()> {
        let now = Utc::now();

        let expired = Tenant::deactivate_expired_trials(&self.db, now).await?;
        for tenant_id in &expired {
            self.cache.invalidate_key(&tenant_status_key(*tenant_id)).await;
            tracing::info!(tenant_id = %tenant_id, "Trial expired, tenant deactivated");
        }

        let stats = Tenant::trial_stats(&self.db, now).await?;
        tracing::info!(
            deactivated = expired.len(),
            active_trials = stats.active,
            expiring_soon = stats.expiring_soon,
            expired_total = stats.expired,
            "Trial expiration sweep finished"
        );

        Ok(())
    }
}
