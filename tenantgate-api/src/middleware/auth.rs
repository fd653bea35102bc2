/// Authentication middleware
///
/// Accepts either credential:
///
/// - `Authorization: Bearer <jwt>`: access token, checked against the
///   revocation lists
/// - `X-Api-Key: tg_...`: integration key, looked up by hash
///
/// On success an [`Authenticated`] extension is inserted for the next
/// layers. Missing or invalid credentials return 401, are audited as
/// `auth.failed` and count against the client IP's `failed_auth` limit.
/// Once that limit is exceeded the IP gets 429 before any credential is
/// looked at, valid or not, until the cooldown ends.

use super::rate_limit::too_many_requests;
use super::{client_info, client_key, API_KEY_HEADER};
use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tenantgate_shared::auth::jwt::{validate_access_token, Claims};
use tenantgate_shared::models::ApiKey;
use tenantgate_shared::ratelimit::RateLimitDecision;

/// Verified credential of the current request
#[derive(Debug, Clone)]
pub enum Authenticated {
    Token(Claims),
    ApiKey(ApiKey),
}

pub async fn auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_key(&req, state.trusted_proxies());

    if let Some(retry_after) = state.failed_auth_limiter.blocked_for(&client).await {
        state
            .metrics
            .record_rate_limited(&state.failed_auth_limiter.policy().bucket);
        return Err(too_many_requests(retry_after));
    }

    let result = authenticate(&state, req.headers()).await;
    match result {
        Ok(authenticated) => {
            req.extensions_mut().insert(authenticated);
            Ok(next.run(req).await)
        }
        Err(ApiError::Unauthorized(reason)) => {
            state.metrics.record_auth_failure();
            state
                .audit
                .record_auth_failure(client_info(&req, state.trusted_proxies()), &reason);

            if let RateLimitDecision::Blocked { retry_after } =
                state.failed_auth_limiter.check(&client).await
            {
                tracing::warn!(
                    client = %client,
                    block_secs = retry_after.as_secs(),
                    "Too many rejected credentials, blocking client"
                );
            }
            Err(ApiError::Unauthorized(reason))
        }
        Err(e) => Err(e),
    }
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Authenticated, ApiError> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        let api_key = ApiKey::validate(&state.db, key)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Invalid API key".to_string()))?;

        tracing::debug!(api_key_id = %api_key.id, tenant_id = %api_key.tenant_id, "API key authenticated");
        return Ok(Authenticated::ApiKey(api_key));
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Expected Bearer token".to_string()))?;

    let claims = validate_access_token(token, state.jwt_secret())?;

    if state.revocation.is_revoked(token, &claims).await {
        tracing::info!(principal_id = %claims.sub, "Rejected revoked token");
        return Err(ApiError::Unauthorized("Token has been revoked".to_string()));
    }

    Ok(Authenticated::Token(claims))
}
