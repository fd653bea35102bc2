/// Application state and router builder
///
/// [`AppState`] holds one handle per core component, built once at startup
/// and cloned into every handler. Nothing is global: tests build the same
/// state over in-memory collaborators.
///
/// # Example
///
/// ```no_run
/// use tenantgate_api::{app::AppState, config::Config};
/// use tenantgate_shared::db::create_pool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = create_pool(config.database.clone()).await?;
/// let state = AppState::connect(pool, config).await?;
/// let app = tenantgate_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{config::Config, metrics::ApiMetrics, middleware, routes};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::get,
    Router,
};
use sqlx::PgPool;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenantgate_shared::audit::{AuditRecorder, AuditSink, PgAuditSink};
use tenantgate_shared::auth::TokenRevocation;
use tenantgate_shared::authz::{GrantRepository, PermissionEngine, PgGrantRepository};
use tenantgate_shared::cache::DistributedCache;
use tenantgate_shared::ratelimit::{DistributedRateLimiter, RateLimitPolicy};
use tenantgate_shared::store::{RedisStore, SharedStore};
use tenantgate_shared::tenancy::{AccessGuard, PartitionResolver, PgTenantDirectory, TenantDirectory};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// How often idle local rate-limit windows are purged
const LIMITER_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    /// `None` when running without a shared store
    pub store: Option<Arc<dyn SharedStore>>,
    pub resolver: PartitionResolver,
    pub permissions: PermissionEngine,
    /// Tenant and principal standing
    pub access: AccessGuard,
    pub cache: DistributedCache,
    pub api_limiter: DistributedRateLimiter,
    pub integration_limiter: DistributedRateLimiter,
    /// Rejected credentials per client IP
    pub failed_auth_limiter: DistributedRateLimiter,
    pub revocation: TokenRevocation,
    pub audit: AuditRecorder,
    pub metrics: ApiMetrics,
    /// Requests served by this replica since startup
    pub requests: Arc<AtomicU64>,
}

impl AppState {
    /// Wires the components over the given collaborators
    ///
    /// Must be called inside a Tokio runtime; it starts the cache write-back
    /// workers, the audit drain and the limiter purgers.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics registry cannot be built.
    pub fn new(
        db: PgPool,
        config: Config,
        store: Option<Arc<dyn SharedStore>>,
        grants: Arc<dyn GrantRepository>,
        tenants: Arc<dyn TenantDirectory>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        let cache = match &store {
            Some(store) => DistributedCache::new(store.clone()),
            None => DistributedCache::disabled(),
        };

        let api_limiter = DistributedRateLimiter::new(store.clone(), RateLimitPolicy::api());
        let integration_limiter =
            DistributedRateLimiter::new(store.clone(), RateLimitPolicy::integration());
        let failed_auth_limiter =
            DistributedRateLimiter::new(store.clone(), RateLimitPolicy::failed_auth());
        for limiter in [&api_limiter, &integration_limiter, &failed_auth_limiter] {
            limiter.fallback().spawn_purger(LIMITER_PURGE_INTERVAL);
        }

        let (audit, _drain) = AuditRecorder::spawn(audit_sink);

        Ok(Self {
            permissions: PermissionEngine::new(grants.clone(), cache.clone()),
            access: AccessGuard::new(tenants, grants, cache.clone()),
            revocation: TokenRevocation::new(store.clone()),
            resolver: PartitionResolver::default(),
            metrics: ApiMetrics::new()?,
            db,
            config: Arc::new(config),
            store,
            cache,
            api_limiter,
            integration_limiter,
            failed_auth_limiter,
            audit,
            requests: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Production wiring: PostgreSQL repositories and Redis when configured
    ///
    /// An unreachable store is logged and the server starts degraded: cache
    /// computes directly and rate limiting falls back to per-replica counts.
    pub async fn connect(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let store: Option<Arc<dyn SharedStore>> = match config.store.clone() {
            None => {
                tracing::warn!("REDIS_URL not set, running without shared store");
                None
            }
            Some(store_config) => match RedisStore::connect(store_config).await {
                Ok(store) => match store.ping().await {
                    Ok(()) => Some(Arc::new(store) as Arc<dyn SharedStore>),
                    Err(e) => {
                        tracing::warn!(error = %e, "Shared store ping failed, running degraded");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Shared store unreachable, running degraded");
                    None
                }
            },
        };

        let grants = Arc::new(PgGrantRepository::new(db.clone()));
        let tenants = Arc::new(PgTenantDirectory::new(db.clone()));
        let audit_sink = Arc::new(PgAuditSink::new(db.clone()));
        Self::new(db, config, store, grants, tenants, audit_sink)
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.config.api.trusted_proxies
    }

    pub fn requests_served(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET /health                               # public
/// ├── GET /metrics                              # public, Prometheus text
/// └── /v1/                                      # auth → rate limit → context
///     ├── GET /permissions/me
///     ├── GET /modules
///     ├── GET /principals/:id/permissions       # users:view
///     └── PUT /principals/:id/permissions       # users:edit
/// ```
pub fn build_router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/permissions/me", get(routes::permissions::my_permissions))
        .route("/modules", get(routes::permissions::list_modules))
        .route(
            "/principals/:id/permissions",
            get(routes::permissions::get_principal_permissions)
                .put(routes::permissions::replace_principal_permissions),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::context::context_layer,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_layer,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::auth::auth_layer));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics))
        .nest("/v1", v1_routes)
        .layer(from_fn_with_state(state.clone(), count_requests))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer(&state.config))
        .layer(middleware::security::SecurityHeadersLayer::new(
            state.config.api.production,
        ))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.api.cors_origins.iter().any(|o| o == "*") {
        if config.api.production {
            tracing::warn!("Permissive CORS enabled in production");
        }
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .api
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
        .max_age(Duration::from_secs(3600))
}

async fn count_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    state.requests.fetch_add(1, Ordering::Relaxed);
    let method = req.method().clone();
    let response = next.run(req).await;
    state
        .metrics
        .record_request(method.as_str(), response.status().as_u16());
    response
}
