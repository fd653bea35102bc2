/// Scheduler coordination across replicas
///
/// Every replica runs the same tickers; before a periodic job runs, the
/// replica takes `lock:{job}` with set-if-absent and a TTL. Exactly one
/// replica per interval wins and the rest skip that tick. The lock is never
/// released explicitly: it expires, so a replica that crashes mid-run frees
/// the job for the next interval.
///
/// The TTL must be shorter than the job interval (e.g. 55 minutes for an
/// hourly job), otherwise the previous holder's lock can still be live at the
/// next tick.
///
/// # Fail-closed
///
/// When the store is missing or returns an error, `try_acquire` returns
/// `false`. Skipping a run is preferred over running a job twice.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tenantgate_shared::lock::SchedulerCoordinator;
/// use tenantgate_shared::store::MemoryStore;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = Arc::new(MemoryStore::new());
/// let a = SchedulerCoordinator::new(Some(store.clone()), "replica-a");
/// let b = SchedulerCoordinator::new(Some(store), "replica-b");
///
/// let ttl = Duration::from_secs(55 * 60);
/// assert!(a.try_acquire("trial_expiration", ttl).await);
/// assert!(!b.try_acquire("trial_expiration", ttl).await);
/// # });
/// ```

use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Value stored under a lock key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub replica_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Store-backed mutual exclusion for periodic jobs
#[derive(Clone)]
pub struct SchedulerCoordinator {
    store: Option<Arc<dyn SharedStore>>,
    replica_id: String,
}

impl SchedulerCoordinator {
    pub fn new(store: Option<Arc<dyn SharedStore>>, replica_id: impl Into<String>) -> Self {
        Self {
            store,
            replica_id: replica_id.into(),
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn lock_key(name: &str) -> String {
        format!("lock:{}", name)
    }

    /// Attempts to take `name` for `ttl`
    ///
    /// Returns `true` iff this call created the lock entry.
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> bool {
        let Some(store) = &self.store else {
            tracing::warn!(lock = %name, "No shared store configured, skipping locked job");
            return false;
        };

        let holder = LockHolder {
            replica_id: self.replica_id.clone(),
            acquired_at: Utc::now(),
        };
        let value = match serde_json::to_vec(&holder) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(lock = %name, error = %e, "Failed to encode lock holder");
                return false;
            }
        };

        match store.set_nx_ex(&Self::lock_key(name), &value, ttl).await {
            Ok(acquired) => {
                tracing::debug!(
                    lock = %name,
                    replica_id = %self.replica_id,
                    acquired,
                    ttl_secs = ttl.as_secs(),
                    "Lock attempt"
                );
                acquired
            }
            Err(e) => {
                tracing::warn!(
                    lock = %name,
                    replica_id = %self.replica_id,
                    error = %e,
                    "Lock store error, not acquiring"
                );
                false
            }
        }
    }

    /// Current holder of `name`, for diagnostics
    ///
    /// `None` when the lock is free, unreadable, or the store is down.
    pub async fn holder(&self, name: &str) -> Option<LockHolder> {
        let store = self.store.as_ref()?;
        match store.get(&Self::lock_key(name)).await {
            Ok(Some(raw)) => serde_json::from_slice(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(lock = %name, error = %e, "Failed to read lock holder");
                None
            }
        }
    }
}

impl std::fmt::Debug for SchedulerCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerCoordinator")
            .field("replica_id", &self.replica_id)
            .field("store", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const TTL: Duration = Duration::from_secs(55 * 60);

    #[tokio::test(start_paused = true)]
    async fn test_holder_records_winner() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = SchedulerCoordinator::new(Some(store), "replica-1");

        assert!(coordinator.holder("retention").await.is_none());
        assert!(coordinator.try_acquire("retention", TTL).await);

        let holder = coordinator.holder("retention").await.unwrap();
        assert_eq!(holder.replica_id, "replica-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_replica_cannot_reacquire_before_expiry() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = SchedulerCoordinator::new(Some(store), "replica-1");

        assert!(coordinator.try_acquire("job", TTL).await);
        assert!(!coordinator.try_acquire("job", TTL).await);

        tokio::time::advance(TTL).await;
        assert!(coordinator.try_acquire("job", TTL).await);
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let coordinator = SchedulerCoordinator::new(Some(store), "replica-1");

        assert!(!coordinator.try_acquire("job", TTL).await);
        assert!(coordinator.holder("job").await.is_none());
    }

    #[tokio::test]
    async fn test_no_store_fails_closed() {
        let coordinator = SchedulerCoordinator::new(None, "replica-1");
        assert!(!coordinator.try_acquire("job", TTL).await);
    }

    #[test]
    fn test_lock_key() {
        assert_eq!(SchedulerCoordinator::lock_key("trial_expiration"), "lock:trial_expiration");
    }
}
