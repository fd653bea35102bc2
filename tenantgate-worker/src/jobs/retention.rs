/// Retention sweep
///
/// Once a day, one replica:
///
/// 1. deletes grant rows replaced more than `retention_days` ago
/// 2. counts audit records older than `retention_days`
///
/// Audit records are append-only and are never deleted here; the count is
/// logged so an operator can decide on archiving.

use crate::scheduler::PeriodicJob;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tenantgate_shared::audit::PgAuditSink;
use tenantgate_shared::authz::PgGrantRepository;

pub const JOB_NAME: &str = "retention";

pub struct RetentionJob {
    grants: PgGrantRepository,
    audit: PgAuditSink,
    retention_days: i64,
    interval: Duration,
    lock_ttl: Duration,
}

impl RetentionJob {
    pub fn new(
        grants: PgGrantRepository,
        audit: PgAuditSink,
        retention_days: i64,
        interval: Duration,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            grants,
            audit,
            retention_days,
            interval,
            lock_ttl,
        }
    }
}

/// `now` minus `days`, or an error when the result is out of range
pub fn retention_cutoff(now: DateTime<Utc>, days: i64) -> anyhow::Result<DateTime<Utc>> {
    chrono::Duration::try_days(days)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| anyhow::anyhow!("retention of {} days is out of range", days))
}

#[async_trait]
impl PeriodicJob for RetentionJob {
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
        let cutoff = retention_cutoff(Utc::now(), self.retention_days)?;

        let purged = self.grants.purge_replaced(cutoff).await?;
        let aged = self.audit.count_before(cutoff).await?;

        tracing::info!(
            cutoff = %cutoff,
            purged_grants = purged,
            aged_audit_records = aged,
            "Retention sweep finished"
        );

        if aged > 0 {
            tracing::warn!(
                aged_audit_records = aged,
                retention_days = self.retention_days,
                "Audit records past retention are awaiting archive"
            );
        }

        Ok(())
    }
}
