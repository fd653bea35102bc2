/// Prometheus scrape endpoint
///
/// ```text
/// GET /metrics
/// ```
///
/// Counters are per replica; aggregate across replicas in Prometheus.

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::metrics::METRICS_CONTENT_TYPE;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let body = state
        .metrics
        .render(state.cache.stats())
        .map_err(|e| ApiError::InternalError(format!("Failed to encode metrics: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body).into_response())
}
