/// Per-replica fallback limiter
///
/// Same limit, window and cooldown as the distributed limiter, counted in
/// process memory. Used while the shared store is unreachable, so it only
/// bounds traffic per replica.

use super::{RateLimitDecision, RateLimitPolicy};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    started_at: Instant,
    blocked_until: Option<Instant>,
    last_seen: Instant,
}

impl Window {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            started_at: now,
            blocked_until: None,
            last_seen: now,
        }
    }
}

/// In-process fixed-window limiter with a block state
#[derive(Debug, Clone)]
pub struct LocalRateLimiter {
    policy: RateLimitPolicy,
    windows: Arc<DashMap<String, Window>>,
}

impl LocalRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Counts one request from `identifier`
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let now = Instant::now();
        let limit = self.policy.limit;
        let mut entry = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| Window::fresh(now));
        let window = entry.value_mut();
        window.last_seen = now;

        if let Some(until) = window.blocked_until {
            if until > now {
                return RateLimitDecision::Blocked {
                    retry_after: until - now,
                };
            }
            // Cooldown over: unblocked with a reset counter
            *window = Window::fresh(now);
        }

        if now.duration_since(window.started_at) >= self.policy.window {
            window.count = 0;
            window.started_at = now;
        }

        window.count += 1;
        if window.count > limit {
            window.blocked_until = Some(now + self.policy.cooldown);
            window.count = 0;
            return RateLimitDecision::Blocked {
                retry_after: self.policy.cooldown,
            };
        }

        RateLimitDecision::Allowed {
            limit,
            remaining: limit - window.count,
        }
    }

    /// Remaining block for `identifier`, without counting a request
    pub fn blocked_for(&self, identifier: &str) -> Option<Duration> {
        let now = Instant::now();
        self.windows
            .get(identifier)
            .and_then(|w| w.blocked_until)
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Forgets an identifier (e.g. after a successful login)
    pub fn reset(&self, identifier: &str) {
        self.windows.remove(identifier);
    }

    /// Drops unblocked entries idle for more than two windows
    ///
    /// Returns the number of entries removed.
    pub fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let idle_limit = self.policy.window * 2;
        let before = self.windows.len();

        self.windows.retain(|_, w| {
            let blocked = w.blocked_until.is_some_and(|until| until > now);
            blocked || now.duration_since(w.last_seen) <= idle_limit
        });

        before.saturating_sub(self.windows.len())
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Spawns a task purging stale entries every `period`
    pub fn spawn_purger(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.purge_stale();
                if removed > 0 {
                    tracing::debug!(bucket = %limiter.policy.bucket, removed, "Purged idle rate-limit windows");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy::new("test", 3, Duration::from_secs(60), Duration::from_secs(900))
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_after_limit_then_resets() {
        let limiter = LocalRateLimiter::new(policy());

        for expected_remaining in [2, 1, 0] {
            assert_eq!(
                limiter.check("1.2.3.4"),
                RateLimitDecision::Allowed {
                    limit: 3,
                    remaining: expected_remaining
                }
            );
        }
        assert!(limiter.check("1.2.3.4").is_blocked());

        // Still blocked after the window, before the cooldown
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(limiter.check("1.2.3.4").is_blocked());

        tokio::time::advance(Duration::from_secs(900)).await;
        assert_eq!(
            limiter.check("1.2.3.4"),
            RateLimitDecision::Allowed {
                limit: 3,
                remaining: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rolls_over() {
        let limiter = LocalRateLimiter::new(policy());
        for _ in 0..3 {
            assert!(limiter.check("a").is_allowed());
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.check("a").remaining(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identifiers_are_independent() {
        let limiter = LocalRateLimiter::new(policy());
        for _ in 0..4 {
            limiter.check("a");
        }
        assert!(limiter.check("a").is_blocked());
        assert!(limiter.check("b").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_stale_keeps_blocked() {
        let limiter = LocalRateLimiter::new(policy());
        limiter.check("idle");
        for _ in 0..4 {
            limiter.check("blocked");
        }

        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(limiter.purge_stale(), 1);
        assert_eq!(limiter.tracked(), 1);
        assert!(limiter.check("blocked").is_blocked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forgets_identifier() {
        let limiter = LocalRateLimiter::new(policy());
        for _ in 0..4 {
            limiter.check("a");
        }
        limiter.reset("a");
        assert!(limiter.check("a").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_for_reports_without_counting() {
        let limiter = LocalRateLimiter::new(policy());
        assert_eq!(limiter.blocked_for("a"), None);
        assert_eq!(limiter.tracked(), 0);

        for _ in 0..4 {
            limiter.check("a");
        }
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(limiter.blocked_for("a"), Some(Duration::from_secs(800)));

        tokio::time::advance(Duration::from_secs(800)).await;
        assert_eq!(limiter.blocked_for("a"), None);
    }
}
