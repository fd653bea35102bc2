/// Health check endpoint
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "store": "connected",
///   "requests_served": 1042,
///   "cache": { "hits": 900, "misses": 120, "dropped_writes": 0 }
/// }
/// ```
///
/// `status` is `degraded` when the database is unreachable. A missing or
/// failing shared store is reported but does not degrade the status; the
/// core keeps working without it.

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tenantgate_shared::cache::CacheStatsSnapshot;
use tenantgate_shared::db::health_check as database_health;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    /// `connected`, `disconnected` or `not_configured`
    pub store: String,
    pub requests_served: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub dropped_writes: u64,
}

impl From<CacheStatsSnapshot> for CacheStats {
    fn from(s: CacheStatsSnapshot) -> Self {
        Self {
            hits: s.hits,
            misses: s.misses,
            dropped_writes: s.dropped_writes,
        }
    }
}

pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let database = match database_health(&state.db).await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "disconnected"
        }
    };

    let store = match &state.store {
        None => "not_configured",
        Some(store) => match store.ping().await {
            Ok(()) => "connected",
            Err(_) => "disconnected",
        },
    };

    Ok(Json(HealthResponse {
        status: if database == "connected" { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        store: store.to_string(),
        requests_served: state.requests_served(),
        cache: state.cache.stats().into(),
    }))
}
