/// Distributed rate limiting
///
/// Per `(bucket, identifier)` state machine:
///
/// ```text
///            > limit requests within window
/// Unblocked ───────────────────────────────▶ Blocked
///     ▲                                         │
///     └──────── cooldown elapsed, counter reset ┘
/// ```
///
/// The counter lives at `ratelimit:{bucket}:{identifier}` and is created by
/// an atomic increment-with-expiry, so every replica sees the same count.
/// Crossing the limit writes `ratelimit:blocked:{bucket}:{identifier}` with
/// the cooldown as TTL and deletes the counter.
///
/// # Degraded mode
///
/// Any store error hands the decision for that call to a
/// [`LocalRateLimiter`] with the same limit, window and cooldown. Traffic
/// stays bounded, per replica instead of cluster-wide, and a slow store
/// never hangs the request.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenantgate_shared::ratelimit::{DistributedRateLimiter, RateLimitPolicy};
/// use tenantgate_shared::store::MemoryStore;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let limiter = DistributedRateLimiter::new(Some(Arc::new(MemoryStore::new())), RateLimitPolicy::login());
///
/// for _ in 0..5 {
///     assert!(limiter.check("203.0.113.7").await.is_allowed());
/// }
/// assert!(limiter.check("203.0.113.7").await.is_blocked());
/// # });
/// ```

use crate::store::{SharedStore, StoreResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub mod local;

pub use local::LocalRateLimiter;

/// Block length applied by every preset
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15 * 60);

const MINUTE: Duration = Duration::from_secs(60);

/// Limit, window and cooldown for one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitPolicy {
    /// Namespace in store keys (`login`, `api`, ...)
    pub bucket: String,
    /// Requests allowed per window
    pub limit: u32,
    /// Counting window
    pub window: Duration,
    /// Block length once the limit is exceeded, independent of `window`
    pub cooldown: Duration,
}

impl RateLimitPolicy {
    pub fn new(bucket: impl Into<String>, limit: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            bucket: bucket.into(),
            limit,
            window,
            cooldown,
        }
    }

    /// 5 per minute
    pub fn login() -> Self {
        Self::new("login", 5, MINUTE, DEFAULT_COOLDOWN)
    }

    /// 100 per minute
    pub fn api() -> Self {
        Self::new("api", 100, MINUTE, DEFAULT_COOLDOWN)
    }

    /// 200 per minute, for bot integrations using API keys
    pub fn integration() -> Self {
        Self::new("integration", 200, MINUTE, DEFAULT_COOLDOWN)
    }

    /// 3 per 15 minutes
    pub fn forgot_password() -> Self {
        Self::new("forgot_password", 3, 15 * MINUTE, DEFAULT_COOLDOWN)
    }

    /// 5 per minute
    pub fn two_factor() -> Self {
        Self::new("two_factor", 5, MINUTE, DEFAULT_COOLDOWN)
    }

    /// 3 per hour
    pub fn tenant_registration() -> Self {
        Self::new("tenant_registration", 3, 60 * MINUTE, DEFAULT_COOLDOWN)
    }

    /// 10 rejected credentials per minute, counted per client IP
    pub fn failed_auth() -> Self {
        Self::new("failed_auth", 10, MINUTE, DEFAULT_COOLDOWN)
    }

    pub fn counter_key(&self, identifier: &str) -> String {
        format!("ratelimit:{}:{}", self.bucket, identifier)
    }

    pub fn block_key(&self, identifier: &str) -> String {
        format!("ratelimit:blocked:{}:{}", self.bucket, identifier)
    }
}

/// Outcome of one rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// `remaining` is advisory
    Allowed { limit: u32, remaining: u32 },
    Blocked { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, RateLimitDecision::Blocked { .. })
    }

    pub fn remaining(&self) -> Option<u32> {
        match self {
            RateLimitDecision::Allowed { remaining, .. } => Some(*remaining),
            RateLimitDecision::Blocked { .. } => None,
        }
    }
}

/// Rate limiter shared by all replicas through the store
#[derive(Clone)]
pub struct DistributedRateLimiter {
    store: Option<Arc<dyn SharedStore>>,
    policy: RateLimitPolicy,
    fallback: LocalRateLimiter,
}

impl DistributedRateLimiter {
    /// Creates a limiter; with no store every call uses the local fallback
    pub fn new(store: Option<Arc<dyn SharedStore>>, policy: RateLimitPolicy) -> Self {
        Self {
            fallback: LocalRateLimiter::new(policy.clone()),
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn fallback(&self) -> &LocalRateLimiter {
        &self.fallback
    }

    /// Counts one request from `identifier`
    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        let Some(store) = &self.store else {
            return self.fallback.check(identifier);
        };

        match self.check_shared(store.as_ref(), identifier).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    bucket = %self.policy.bucket,
                    identifier = %identifier,
                    error = %e,
                    "Rate limiter store error, using local fallback"
                );
                self.fallback.check(identifier)
            }
        }
    }

    async fn check_shared(
        &self,
        store: &dyn SharedStore,
        identifier: &str,
    ) -> StoreResult<RateLimitDecision> {
        let block_key = self.policy.block_key(identifier);
        if let Some(retry_after) = store.ttl(&block_key).await? {
            return Ok(RateLimitDecision::Blocked { retry_after });
        }

        let counter_key = self.policy.counter_key(identifier);
        let count = store
            .incr_with_expiry(&counter_key, self.policy.window)
            .await?;
        let limit = self.policy.limit;

        if count > i64::from(limit) {
            store.set_ex(&block_key, b"1", self.policy.cooldown).await?;
            store.del(&counter_key).await?;

            tracing::warn!(
                bucket = %self.policy.bucket,
                identifier = %identifier,
                count,
                limit,
                cooldown_secs = self.policy.cooldown.as_secs(),
                "Rate limit exceeded, blocking"
            );
            return Ok(RateLimitDecision::Blocked {
                retry_after: self.policy.cooldown,
            });
        }

        Ok(RateLimitDecision::Allowed {
            limit,
            remaining: limit.saturating_sub(count.max(0) as u32),
        })
    }

    /// Remaining block for `identifier`, without counting a request
    ///
    /// Store errors fall back to the local limiter's view.
    pub async fn blocked_for(&self, identifier: &str) -> Option<Duration> {
        let Some(store) = &self.store else {
            return self.fallback.blocked_for(identifier);
        };

        match store.ttl(&self.policy.block_key(identifier)).await {
            Ok(remaining) => remaining,
            Err(e) => {
                tracing::warn!(
                    bucket = %self.policy.bucket,
                    identifier = %identifier,
                    error = %e,
                    "Rate limiter store error, using local fallback"
                );
                self.fallback.blocked_for(identifier)
            }
        }
    }

    /// Clears counter and block state for `identifier` (shared and local)
    pub async fn reset(&self, identifier: &str) {
        self.fallback.reset(identifier);

        let Some(store) = &self.store else { return };
        for key in [
            self.policy.counter_key(identifier),
            self.policy.block_key(identifier),
        ] {
            if let Err(e) = store.del(&key).await {
                tracing::warn!(bucket = %self.policy.bucket, key = %key, error = %e, "Failed to reset rate limit");
            }
        }
    }
}
