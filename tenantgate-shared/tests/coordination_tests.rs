/// Cross-replica coordination properties, run against the in-memory store
///
/// Each "replica" is a separate component instance sharing one store, the
/// way independent processes share one Redis.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenantgate_shared::cache::{CacheKey, Cacheable, DistributedCache, TTL_SHORT};
use tenantgate_shared::lock::SchedulerCoordinator;
use tenantgate_shared::ratelimit::{DistributedRateLimiter, RateLimitDecision, RateLimitPolicy};
use tenantgate_shared::store::{MemoryStore, SharedStore};
use tokio::sync::Barrier;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PatientCount {
    total: u64,
}

impl Cacheable for PatientCount {
    const SCHEMA_VERSION: u32 = 1;
}

async fn wait_for_key(store: &MemoryStore, key: &str) {
    for _ in 0..200 {
        if store.get(key).await.unwrap().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("write-back never reached the store for {}", key);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lock_attempts_have_one_winner() {
    let store = Arc::new(MemoryStore::new());
    let replicas = 8;
    let barrier = Arc::new(Barrier::new(replicas));

    let handles: Vec<_> = (0..replicas)
        .map(|i| {
            let coordinator =
                SchedulerCoordinator::new(Some(store.clone()), format!("replica-{}", i));
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                coordinator
                    .try_acquire("trial_expiration", Duration::from_secs(55 * 60))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_expires_after_holder_crash() {
    let store = Arc::new(MemoryStore::new());
    let ttl = Duration::from_secs(23 * 60 * 60);

    let crashed = SchedulerCoordinator::new(Some(store.clone()), "replica-a");
    assert!(crashed.try_acquire("retention", ttl).await);
    drop(crashed);

    let survivor = SchedulerCoordinator::new(Some(store), "replica-b");
    assert!(!survivor.try_acquire("retention", ttl).await);

    tokio::time::advance(ttl).await;
    assert!(survivor.try_acquire("retention", ttl).await);
    assert_eq!(survivor.holder("retention").await.unwrap().replica_id, "replica-b");
}

#[tokio::test]
async fn test_invalidate_forces_recompute() {
    let store = Arc::new(MemoryStore::new());
    let cache = DistributedCache::new(store.clone());
    let tenant_id = Uuid::new_v4();
    let key = CacheKey::tenant("patients", tenant_id).part("count");
    let counter = AtomicUsize::new(0);
    let computes = &counter;

    let compute = move || async move {
        computes.fetch_add(1, Ordering::SeqCst);
        Ok::<_, std::io::Error>(PatientCount { total: 7 })
    };

    cache.get_or_compute(&key, TTL_SHORT, compute).await.unwrap();
    assert_eq!(computes.load(Ordering::SeqCst), 1);

    wait_for_key(&store, key.as_str()).await;
    cache.get_or_compute(&key, TTL_SHORT, compute).await.unwrap();
    assert_eq!(computes.load(Ordering::SeqCst), 1, "second read should hit");

    let removed = cache.invalidate_tenant(tenant_id, &["patients"]).await;
    assert_eq!(removed, 1);

    cache.get_or_compute(&key, TTL_SHORT, compute).await.unwrap();
    assert_eq!(computes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_misses_each_compute() {
    let store = Arc::new(MemoryStore::new());
    let cache = DistributedCache::new(store);
    let key = CacheKey::new("dashboard").part("global");
    let computes = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(2));

    // Both computes wait on the barrier, so neither result can be cached
    // before the other caller has already missed.
    let run = |cache: DistributedCache, computes: Arc<AtomicUsize>, barrier: Arc<Barrier>| {
        let key = key.clone();
        async move {
            cache
                .get_or_compute(&key, TTL_SHORT, move || async move {
                    computes.fetch_add(1, Ordering::SeqCst);
                    barrier.wait().await;
                    Ok::<_, std::io::Error>(PatientCount { total: 1 })
                })
                .await
                .unwrap()
        }
    };

    let (a, b) = tokio::join!(
        run(cache.clone(), computes.clone(), barrier.clone()),
        run(cache.clone(), computes.clone(), barrier.clone()),
    );

    assert_eq!(a, b);
    assert_eq!(computes.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sixth_login_is_blocked_across_replicas() {
    let store = Arc::new(MemoryStore::new());
    let replica_a = DistributedRateLimiter::new(Some(store.clone()), RateLimitPolicy::login());
    let replica_b = DistributedRateLimiter::new(Some(store.clone()), RateLimitPolicy::login());

    for i in 0..5 {
        let limiter = if i % 2 == 0 { &replica_a } else { &replica_b };
        assert!(limiter.check("198.51.100.9").await.is_allowed());
    }
    assert!(replica_a.check("198.51.100.9").await.is_blocked());
    assert!(replica_b.check("198.51.100.9").await.is_blocked());

    // Past the window but inside the cooldown
    tokio::time::advance(Duration::from_secs(5 * 60)).await;
    assert!(replica_b.check("198.51.100.9").await.is_blocked());

    tokio::time::advance(Duration::from_secs(10 * 60)).await;
    assert_eq!(
        replica_a.check("198.51.100.9").await,
        RateLimitDecision::Allowed {
            limit: 5,
            remaining: 4
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_falls_back_to_local_bound() {
    let store = Arc::new(MemoryStore::new());
    let limiter = DistributedRateLimiter::new(Some(store.clone()), RateLimitPolicy::login());
    store.set_available(false);

    let decisions = tokio::time::timeout(Duration::from_secs(1), async {
        let mut out = Vec::new();
        for _ in 0..6 {
            out.push(limiter.check("203.0.113.1").await);
        }
        out
    })
    .await
    .expect("limiter must not hang on a dead store");

    assert!(decisions[..5].iter().all(RateLimitDecision::is_allowed));
    assert!(decisions[5].is_blocked());

    tokio::time::advance(Duration::from_secs(15 * 60)).await;
    assert!(limiter.check("203.0.113.1").await.is_allowed());
}

#[tokio::test]
async fn test_cache_survives_store_outage() {
    let store = Arc::new(MemoryStore::new());
    let cache = DistributedCache::new(store.clone());
    store.set_available(false);

    let key = CacheKey::new("modules");
    let value = cache
        .get_or_compute(&key, TTL_SHORT, || async {
            Ok::<_, std::io::Error>(PatientCount { total: 3 })
        })
        .await
        .unwrap();
    assert_eq!(value.total, 3);
    assert_eq!(cache.invalidate_prefix("modules").await, 0);
}
