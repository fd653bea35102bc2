/// Read-through distributed cache
///
/// Values are computed from the authoritative source on a miss and written
/// back to the shared store in the background. The cache is an optimization
/// only:
///
/// - store unreachable (at startup or per call): compute directly
/// - stored value undecodable or from another schema version: miss
/// - write-back failure or full write queue: logged and dropped
///
/// Concurrent misses for the same key are not coalesced; each caller runs
/// its own `compute`.
///
/// # Keys
///
/// Keys are `prefix:qualifier:qualifier...`, built by [`CacheKey`] in the
/// order the qualifiers are added. Invalidating `prefix` removes the bare key
/// and every key under `prefix:`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenantgate_shared::cache::{CacheKey, Cacheable, DistributedCache, TTL_SHORT};
/// use tenantgate_shared::store::MemoryStore;
/// use serde::{Deserialize, Serialize};
/// use uuid::Uuid;
///
/// #[derive(Serialize, Deserialize)]
/// struct DashboardStats { patients: u64 }
///
/// impl Cacheable for DashboardStats {
///     const SCHEMA_VERSION: u32 = 1;
/// }
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let cache = DistributedCache::new(Arc::new(MemoryStore::new()));
/// let key = CacheKey::tenant("dashboard", Uuid::new_v4()).part("2025-01");
///
/// let stats = cache
///     .get_or_compute(&key, TTL_SHORT, || async { Ok::<_, std::io::Error>(DashboardStats { patients: 42 }) })
///     .await
///     .unwrap();
/// assert_eq!(stats.patients, 42);
/// # });
/// ```

use crate::store::SharedStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Frequently changing data (dashboards, counters)
pub const TTL_SHORT: Duration = Duration::from_secs(5 * 60);

/// Moderately changing data (lists, permission sets)
pub const TTL_MEDIUM: Duration = Duration::from_secs(30 * 60);

/// Rarely changing data (module catalogue, settings)
pub const TTL_LONG: Duration = Duration::from_secs(24 * 60 * 60);

/// Background write-back workers
pub const WRITE_WORKERS: usize = 10;

/// Pending write-backs before new ones are dropped
pub const WRITE_QUEUE_CAPACITY: usize = 100;

/// Serialization contract for cached values
///
/// Bump `SCHEMA_VERSION` whenever the serialized shape changes; entries
/// written under another version are treated as misses.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {
    const SCHEMA_VERSION: u32;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    v: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    v: u32,
    data: T,
}

fn encode<T: Cacheable>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&EnvelopeRef {
        v: T::SCHEMA_VERSION,
        data: value,
    })
}

fn decode<T: Cacheable>(bytes: &[u8]) -> Option<T> {
    let envelope: Envelope<T> = serde_json::from_slice(bytes).ok()?;
    (envelope.v == T::SCHEMA_VERSION).then_some(envelope.data)
}

/// Deterministic composite cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
}

impl CacheKey {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            key: prefix.as_ref().to_string(),
        }
    }

    /// `prefix:tenant_id`
    pub fn tenant(prefix: impl AsRef<str>, tenant_id: Uuid) -> Self {
        Self::new(prefix).part(tenant_id)
    }

    /// Appends a qualifier
    pub fn part(mut self, qualifier: impl fmt::Display) -> Self {
        self.key.push(':');
        self.key.push_str(&qualifier.to_string());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

/// Hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    dropped_writes: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub dropped_writes: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
        }
    }
}

struct WriteJob {
    key: String,
    value: Vec<u8>,
    ttl: Duration,
}

/// Read-through cache over a [`SharedStore`]
///
/// Cheap to clone; clones share the store handle, write queue and stats.
#[derive(Clone)]
pub struct DistributedCache {
    store: Option<Arc<dyn SharedStore>>,
    writes: Option<mpsc::Sender<WriteJob>>,
    stats: Arc<CacheStats>,
}

impl DistributedCache {
    /// Creates a cache and starts its write-back workers
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        let (tx, rx) = mpsc::channel::<WriteJob>(WRITE_QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..WRITE_WORKERS {
            let rx = Arc::clone(&rx);
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };

                    if let Err(e) = store.set_ex(&job.key, &job.value, job.ttl).await {
                        tracing::debug!(worker, key = %job.key, error = %e, "Cache write-back failed");
                    }
                }
            });
        }

        Self {
            store: Some(store),
            writes: Some(tx),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Cache that always computes directly
    pub fn disabled() -> Self {
        Self {
            store: None,
            writes: None,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Probes the store once and disables caching if it is unreachable
    pub async fn connect(store: Option<Arc<dyn SharedStore>>) -> Self {
        let Some(store) = store else {
            tracing::warn!("Shared store not configured, cache disabled");
            return Self::disabled();
        };

        match store.ping().await {
            Ok(()) => Self::new(store),
            Err(e) => {
                tracing::warn!(error = %e, "Shared store unreachable, cache disabled");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the cached value for `key`, or computes, returns and caches it
    ///
    /// Only errors from `compute` are returned.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(store) = &self.store else {
            return compute().await;
        };

        match store.get(key.as_str()).await {
            Ok(Some(bytes)) => match decode::<T>(&bytes) {
                Some(value) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                None => tracing::debug!(key = %key, "Cached value undecodable, treating as miss"),
            },
            Ok(None) => {}
            Err(e) => tracing::debug!(key = %key, error = %e, "Cache read failed, computing directly"),
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute().await?;
        self.write_behind(key, &value, ttl);
        Ok(value)
    }

    /// Queues a write without waiting for it
    fn write_behind<T: Cacheable>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        let Some(writes) = &self.writes else { return };

        let bytes = match encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize cache value");
                return;
            }
        };

        let job = WriteJob {
            key: key.to_string(),
            value: bytes,
            ttl,
        };

        if let Err(mpsc::error::TrySendError::Full(job)) = writes.try_send(job) {
            self.stats.dropped_writes.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %job.key, "Cache write queue full, dropping write");
        }
    }

    /// Deletes `prefix` and every key under it
    ///
    /// Returns the number of keys removed; store failures are logged and
    /// reported as zero.
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        let Some(store) = &self.store else { return 0 };

        match store.delete_prefix(prefix).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(prefix = %prefix, error = %e, "Cache prefix invalidation failed");
                0
            }
        }
    }

    /// Deletes one key
    pub async fn invalidate_key(&self, key: &CacheKey) -> bool {
        let Some(store) = &self.store else { return false };

        match store.del(key.as_str()).await {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache key invalidation failed");
                false
            }
        }
    }

    /// Deletes `prefix:tenant_id` and everything under it, for each prefix
    pub async fn invalidate_tenant(&self, tenant_id: Uuid, prefixes: &[&str]) -> u64 {
        let mut removed = 0;
        for prefix in prefixes {
            removed += self
                .invalidate_prefix(CacheKey::tenant(prefix, tenant_id).as_str())
                .await;
        }
        removed
    }

    /// Fire-and-forget prefix invalidation for write paths
    ///
    /// Readers that need strict freshness right after a write should read the
    /// authoritative source rather than rely on this having completed.
    pub fn spawn_invalidate_prefix(&self, prefix: impl Into<String>) {
        if self.store.is_none() {
            return;
        }

        let cache = self.clone();
        let prefix = prefix.into();
        tokio::spawn(async move {
            cache.invalidate_prefix(&prefix).await;
        });
    }
}

impl fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedCache")
            .field("enabled", &self.is_enabled())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u32,
    }

    impl Cacheable for Counter {
        const SCHEMA_VERSION: u32 = 2;
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let tenant_id = Uuid::nil();
        let a = CacheKey::tenant("appointments", tenant_id).part("2025-01-01").part("2025-01-31");
        let b = CacheKey::tenant("appointments", tenant_id).part("2025-01-01").part("2025-01-31");
        assert_eq!(a, b);
        assert_eq!(
            a.as_str(),
            "appointments:00000000-0000-0000-0000-000000000000:2025-01-01:2025-01-31"
        );
    }

    #[test]
    fn test_decode_rejects_other_version() {
        let bytes = br#"{"v":1,"data":{"n":5}}"#;
        assert!(decode::<Counter>(bytes).is_none());

        let bytes = br#"{"v":2,"data":{"n":5}}"#;
        assert_eq!(decode::<Counter>(bytes), Some(Counter { n: 5 }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode::<Counter>(b"not json").is_none());
        assert!(decode::<Counter>(br#"{"n":5}"#).is_none());
    }

    #[tokio::test]
    async fn test_disabled_always_computes() {
        let cache = DistributedCache::disabled();
        let key = CacheKey::new("k");
        for _ in 0..2 {
            let v = cache
                .get_or_compute(&key, TTL_SHORT, || async { Ok::<_, ()>(Counter { n: 1 }) })
                .await
                .unwrap();
            assert_eq!(v.n, 1);
        }
        assert_eq!(cache.stats(), CacheStatsSnapshot::default());
        assert_eq!(cache.invalidate_prefix("k").await, 0);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store.set_ex("k", b"garbage", TTL_SHORT).await.unwrap();
        let cache = DistributedCache::new(store);

        let v = cache
            .get_or_compute(&CacheKey::new("k"), TTL_SHORT, || async {
                Ok::<_, ()>(Counter { n: 9 })
            })
            .await
            .unwrap();
        assert_eq!(v.n, 9);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_compute_error_is_returned_and_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let cache = DistributedCache::new(store.clone());

        let result = cache
            .get_or_compute(&CacheKey::new("k"), TTL_SHORT, || async {
                Err::<Counter, _>("db down")
            })
            .await;
        assert_eq!(result.unwrap_err(), "db down");

        tokio::task::yield_now().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_connect_without_store_is_disabled() {
        assert!(!DistributedCache::connect(None).await.is_enabled());

        let store = MemoryStore::new();
        store.set_available(false);
        let cache = DistributedCache::connect(Some(Arc::new(store))).await;
        assert!(!cache.is_enabled());
    }
}
