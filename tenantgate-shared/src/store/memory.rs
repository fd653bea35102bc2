/// In-process [`SharedStore`]
///
/// Keeps entries in a mutex-guarded map with `tokio::time::Instant` expiries,
/// so tests running with a paused clock can advance past TTLs
/// deterministically. Only coordinates tasks inside one process; use it for
/// single-replica development and tests.
///
/// [`MemoryStore::set_available`] switches the store into outage mode, where
/// every call fails with [`StoreError::Unavailable`].

use super::{SharedStore, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory store shared by clones
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty, available store
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles outage simulation
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Runs `f` on the map after evicting `key` if it has expired
    fn with_key<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        f(&mut entries)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.with_key(key, |entries| entries.get(key).map(|e| e.value.clone())))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.check()?;
        let entry = Entry {
            value: value.to_vec(),
            expires_at: Some(Instant::now() + ttl),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        let expires_at = Some(Instant::now() + ttl);
        Ok(self.with_key(key, |entries| {
            if entries.contains_key(key) {
                false
            } else {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_vec(),
                        expires_at,
                    },
                );
                true
            }
        }))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self.with_key(key, |entries| entries.remove(key).is_some()))
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        self.check()?;
        let now = Instant::now();
        let nested = format!("{}:", prefix);
        let mut entries = self.entries.lock();
        let before = entries.len();
        let mut expired = 0;
        entries.retain(|key, entry| {
            let matches = key == prefix || key.starts_with(&nested);
            if matches && !entry.is_live(now) {
                expired += 1;
            }
            !matches
        });
        Ok((before - entries.len() - expired) as u64)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        self.check()?;
        let now = Instant::now();
        self.with_key(key, |entries| -> StoreResult<i64> {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: b"0".to_vec(),
                expires_at: None,
            });

            let current: i64 = std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    StoreError::Command("value is not an integer or out of range".to_string())
                })?;
            let next = current + 1;

            entry.value = next.to_string().into_bytes();
            if next == 1 {
                entry.expires_at = Some(now + ttl);
            }
            Ok(next)
        })
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.check()?;
        let now = Instant::now();
        Ok(self.with_key(key, |entries| {
            entries
                .get(key)
                .and_then(|e| e.expires_at)
                .map(|at| at.saturating_duration_since(now))
        }))
    }
}
