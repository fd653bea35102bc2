/// Prometheus metrics for one API replica
///
/// Exposed at `GET /metrics` in the text exposition format:
///
/// - `tenantgate_http_requests_total{method, status}`
/// - `tenantgate_rate_limited_total{bucket}`: requests answered with 429
/// - `tenantgate_auth_failures_total`: rejected credentials
/// - `tenantgate_tenant_rejections_total{reason}`: lapsed or unknown tenants
/// - `tenantgate_cache_events{kind}`: cache hits, misses and dropped writes,
///   copied from [`CacheStatsSnapshot`] at scrape time
///
/// Each [`ApiMetrics`] owns its registry, so several app instances (tests)
/// never collide on metric names.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tenantgate_shared::cache::CacheStatsSnapshot;

/// Content type of [`ApiMetrics::render`] output
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
pub struct ApiMetrics {
    registry: Registry,
    requests: IntCounterVec,
    rate_limited: IntCounterVec,
    auth_failures: IntCounter,
    tenant_rejections: IntCounterVec,
    cache: IntGaugeVec,
}

impl ApiMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("tenantgate".to_string()), None)?;

        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "status"],
        )?;
        let rate_limited = IntCounterVec::new(
            Opts::new("rate_limited_total", "Requests rejected by a rate limit"),
            &["bucket"],
        )?;
        let auth_failures = IntCounter::new("auth_failures_total", "Rejected credentials")?;
        let tenant_rejections = IntCounterVec::new(
            Opts::new("tenant_rejections_total", "Requests refused for tenant standing"),
            &["reason"],
        )?;
        let cache = IntGaugeVec::new(
            Opts::new("cache_events", "Cache events since startup"),
            &["kind"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(auth_failures.clone()))?;
        registry.register(Box::new(tenant_rejections.clone()))?;
        registry.register(Box::new(cache.clone()))?;

        Ok(Self {
            registry,
            requests,
            rate_limited,
            auth_failures,
            tenant_rejections,
            cache,
        })
    }

    pub fn record_request(&self, method: &str, status: u16) {
        self.requests
            .with_label_values(&[method, status.to_string().as_str()])
            .inc();
    }

    pub fn record_rate_limited(&self, bucket: &str) {
        self.rate_limited.with_label_values(&[bucket]).inc();
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.inc();
    }

    pub fn record_tenant_rejection(&self, reason: &str) {
        self.tenant_rejections.with_label_values(&[reason]).inc();
    }

    /// Encodes every metric, refreshing the cache gauges from `cache` first
    pub fn render(&self, cache: CacheStatsSnapshot) -> prometheus::Result<String> {
        for (kind, value) in [
            ("hit", cache.hits),
            ("miss", cache.misses),
            ("dropped_write", cache.dropped_writes),
        ] {
            self.cache
                .with_label_values(&[kind])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
