/// Shared key-value store used for coordination between replicas
///
/// Every stateless replica talks to the same external store for three
/// purposes:
///
/// - cache entries: `prefix:tenant_id[:qualifiers]`
/// - rate-limit counters and block markers: `ratelimit:{bucket}:{id}`,
///   `ratelimit:blocked:{bucket}:{id}`
/// - scheduler locks: `lock:{job}`
///
/// All keys carry an explicit TTL. Losing the store must never lose
/// correctness, only performance, so each consumer decides how it degrades
/// when a call returns [`StoreError`].
///
/// # Implementations
///
/// - [`RedisStore`]: production implementation on a Redis-compatible server
/// - [`MemoryStore`]: in-process implementation for a single replica and tests,
///   with a switch to simulate an outage
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tenantgate_shared::store::{MemoryStore, SharedStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// let created = store.set_nx_ex("lock:demo", b"me", Duration::from_secs(5)).await.unwrap();
/// assert!(created);
/// # });
/// ```

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, StoreConfig};

/// Shared store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store cannot be reached (connection refused, not configured, outage)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Command did not complete within the configured timeout
    #[error("Store command timed out after {0:?}")]
    Timeout(Duration),

    /// Store rejected the command
    #[error("Store command error: {0}")]
    Command(String),

    /// Invalid store configuration
    #[error("Store configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether the failure means the store could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal set of primitives the coordination layer needs from the store
///
/// Implementations must be safe to share across tasks; every method may block
/// on network I/O and must honour a short timeout.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Checks that the store is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Reads a raw value, `None` when absent or expired
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes a value with a TTL, overwriting any previous value
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Writes a value with a TTL only if the key is absent
    ///
    /// Returns `true` iff this call created the entry.
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool>;

    /// Deletes a key, returning whether it existed
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Deletes `prefix` and every key under `prefix:`
    ///
    /// Returns the number of keys removed.
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64>;

    /// Atomically increments a counter, setting `ttl` only when the counter
    /// was created by this increment
    ///
    /// Returns the counter value after the increment.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<i64>;

    /// Remaining time to live of a key, `None` when absent or without expiry
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;
}
