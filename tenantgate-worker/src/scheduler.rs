/// Periodic job scheduler
///
/// Every replica registers the same jobs and runs one ticker per job. Before
/// each run the replica asks the [`SchedulerCoordinator`] for the job's lock;
/// the winner runs the job and the other replicas skip that tick.
///
/// ```text
/// tick ──> try_acquire(job.name(), job.lock_ttl())
///            ├─ true  ──> job.run()
///            └─ false ──> skip
/// ```
///
/// Locks are never released. A job's `lock_ttl` must be shorter than its
/// `interval`; [`Scheduler::register`] rejects anything else. Shutdown is
/// observed between ticks only, so a run in progress always completes.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tenantgate_shared::lock::SchedulerCoordinator;
/// use tenantgate_worker::jobs::RetentionJob;
/// use tenantgate_worker::scheduler::Scheduler;
///
/// # async fn example(job: RetentionJob, coordinator: SchedulerCoordinator) -> anyhow::Result<()> {
/// let mut scheduler = Scheduler::new(coordinator);
/// scheduler.register(Arc::new(job))?;
///
/// let shutdown = scheduler.shutdown_token();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.cancel();
/// });
///
/// scheduler.run().await;
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tenantgate_shared::lock::SchedulerCoordinator;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A job run on a fixed interval by at most one replica at a time
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    /// Unique name, also used as the lock name
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// How long a run holds the job; must be shorter than [`Self::interval`]
    fn lock_ttl(&self) -> Duration;

    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Job {name}: lock TTL {lock_ttl:?} must be shorter than interval {interval:?}")]
    LockOutlivesInterval {
        name: String,
        lock_ttl: Duration,
        interval: Duration,
    },

    #[error("Job {0}: lock TTL must be non-zero")]
    ZeroLockTtl(String),

    #[error("Job {0} is already registered")]
    DuplicateJob(String),
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Lock taken and the job succeeded
    Completed,
    /// Lock taken but the job returned an error
    Failed,
    /// Another replica holds the lock, or the store could not confirm it
    Skipped,
}

pub struct Scheduler {
    coordinator: SchedulerCoordinator,
    jobs: Vec<Arc<dyn PeriodicJob>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(coordinator: SchedulerCoordinator) -> Self {
        Self {
            coordinator,
            jobs: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Adds a job after checking its timing
    ///
    /// # Errors
    ///
    /// Rejects a zero lock TTL, a lock TTL not shorter than the interval, and
    /// a second job with the same name.
    pub fn register(&mut self, job: Arc<dyn PeriodicJob>) -> Result<(), SchedulerError> {
        let name = job.name().to_string();

        if job.lock_ttl().is_zero() {
            return Err(SchedulerError::ZeroLockTtl(name));
        }
        if job.lock_ttl() >= job.interval() {
            return Err(SchedulerError::LockOutlivesInterval {
                name,
                lock_ttl: job.lock_ttl(),
                interval: job.interval(),
            });
        }
        if self.jobs.iter().any(|j| j.name() == name) {
            return Err(SchedulerError::DuplicateJob(name));
        }

        tracing::info!(
            job = %name,
            interval_secs = job.interval().as_secs(),
            lock_ttl_secs = job.lock_ttl().as_secs(),
            "Job registered"
        );
        self.jobs.push(job);
        Ok(())
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Cancelling the token stops every ticker after its current run
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns one ticker per job
    ///
    /// Each job runs immediately, then every interval.
    pub fn start(self) -> Vec<JoinHandle<()>> {
        tracing::info!(
            replica_id = %self.coordinator.replica_id(),
            jobs = self.jobs.len(),
            "Scheduler starting"
        );

        self.jobs
            .into_iter()
            .map(|job| {
                let coordinator = self.coordinator.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(ticker(coordinator, job, shutdown))
            })
            .collect()
    }

    /// Runs every ticker until shutdown
    pub async fn run(self) {
        let handles = self.start();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Job ticker panicked");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn ticker(
    coordinator: SchedulerCoordinator,
    job: Arc<dyn PeriodicJob>,
    shutdown: CancellationToken,
) {
    let mut ticks = interval(job.interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => {}
        }

        run_once(&coordinator, job.as_ref()).await;
    }

    tracing::debug!(job = %job.name(), "Ticker stopped");
}

/// Runs a single tick of `job` if this replica wins its lock
pub async fn run_once(coordinator: &SchedulerCoordinator, job: &dyn PeriodicJob) -> TickOutcome {
    if !coordinator.try_acquire(job.name(), job.lock_ttl()).await {
        tracing::debug!(job = %job.name(), "Lock held elsewhere, skipping tick");
        return TickOutcome::Skipped;
    }

    let started = Instant::now();
    tracing::info!(job = %job.name(), replica_id = %coordinator.replica_id(), "Job started");

    match job.run().await {
        Ok(()) => {
            tracing::info!(
                job = %job.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job completed"
            );
            TickOutcome::Completed
        }
        Err(e) => {
            tracing::error!(
                job = %job.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "Job failed"
            );
            TickOutcome::Failed
        }
    }
}
