/// Rate limiting middleware
///
/// Runs after authentication, so the identifier is never a value the caller
/// can rotate freely. Each request is counted against a
/// [`DistributedRateLimiter`] shared by all replicas:
///
/// - verified API keys use the `integration` policy (200/min), keyed by the
///   key id
/// - access tokens use the `api` policy (100/min), keyed by client IP as
///   resolved through the trusted proxies
///
/// Rejected credentials never reach this layer; [`super::auth`] limits them
/// per IP. Exceeding a limit blocks the identifier for the policy cooldown.
///
/// # Headers
///
/// - `X-RateLimit-Limit`: requests allowed per window
/// - `X-RateLimit-Remaining`: requests left in the current window
/// - `Retry-After`: seconds until the block lifts (429 responses only)
///
/// [`DistributedRateLimiter`]: tenantgate_shared::ratelimit::DistributedRateLimiter

use super::auth::Authenticated;
use super::client_key;
use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Duration;
use tenantgate_shared::ratelimit::{DistributedRateLimiter, RateLimitDecision};

pub async fn rate_limit_layer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (limiter, identifier) = select(&state, &request)?;

    match limiter.check(&identifier).await {
        RateLimitDecision::Blocked { retry_after } => {
            state.metrics.record_rate_limited(&limiter.policy().bucket);
            Err(too_many_requests(retry_after))
        }
        RateLimitDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
            Ok(response)
        }
    }
}

/// 429 with `Retry-After` rounded up to whole seconds
pub fn too_many_requests(retry_after: Duration) -> ApiError {
    // Round up so clients never retry a moment too early
    let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    ApiError::RateLimitExceeded {
        retry_after: seconds,
        message: format!("Rate limit exceeded. Try again in {} seconds", seconds),
    }
}

fn select<'a>(
    state: &'a AppState,
    request: &Request,
) -> Result<(&'a DistributedRateLimiter, String), ApiError> {
    match request.extensions().get::<Authenticated>() {
        Some(Authenticated::ApiKey(key)) => {
            Ok((&state.integration_limiter, format!("key:{}", key.id)))
        }
        Some(Authenticated::Token(_)) => Ok((
            &state.api_limiter,
            format!("ip:{}", client_key(request, state.trusted_proxies())),
        )),
        None => Err(ApiError::Unauthorized("Not authenticated".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        let err = too_many_requests(Duration::from_millis(899_001));
        assert!(matches!(err, ApiError::RateLimitExceeded { retry_after: 900, .. }));

        let err = too_many_requests(Duration::from_secs(900));
        assert!(matches!(err, ApiError::RateLimitExceeded { retry_after: 900, .. }));
    }
}
