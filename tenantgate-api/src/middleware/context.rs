/// Builds the per-request [`RequestContext`]
///
/// Runs after authentication. Refuses tenants that are no longer in good
/// standing, resolves the tenant's partition, captures client metadata and
/// attaches the permission snapshot carried by the token, then inserts the
/// context as a request extension. Handlers extract it with
/// `Extension<RequestContext>`.
///
/// # Standing checks
///
/// | Condition | Response |
/// |-----------|----------|
/// | tenant deactivated (trial or subscription lapsed) | 402 |
/// | tenant unknown | 401 |
/// | superuser or snapshot token of an inactive principal | 401 |
/// | lookup failed | 503 |
///
/// Other tokens reach the permission engine, which checks the principal
/// itself.

use super::auth::Authenticated;
use super::client_info;
use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tenantgate_shared::context::{ClientInfo, PrincipalRef, RequestContext};
use tenantgate_shared::tenancy::TenantStanding;
use uuid::Uuid;

/// Request id header, honoured when it carries a UUID and echoed back
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn context_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authenticated = req
        .extensions()
        .get::<Authenticated>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    check_standing(&state, &authenticated).await?;

    let client = client_info(&req, state.trusted_proxies());
    let incoming_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok());

    let mut ctx = build_context(&state, authenticated, client);
    if let Some(id) = incoming_id {
        ctx = ctx.with_request_id(id);
    }
    let request_id = ctx.request_id();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Ok(value) = request_id.to_string().parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

async fn check_standing(state: &AppState, authenticated: &Authenticated) -> Result<(), ApiError> {
    let tenant_id = match authenticated {
        Authenticated::Token(claims) => claims.tenant_id,
        Authenticated::ApiKey(key) => key.tenant_id,
    };

    match state.access.tenant_standing(tenant_id).await? {
        TenantStanding::Active => {}
        TenantStanding::Lapsed(status) => {
            tracing::info!(tenant_id = %tenant_id, status = %status, "Refused request for lapsed tenant");
            state.metrics.record_tenant_rejection("lapsed");
            return Err(ApiError::PaymentRequired(format!(
                "Tenant subscription is {}",
                status
            )));
        }
        TenantStanding::Unknown => {
            tracing::warn!(tenant_id = %tenant_id, "Credential names an unknown tenant");
            state.metrics.record_tenant_rejection("unknown");
            return Err(ApiError::Unauthorized("Unknown tenant".to_string()));
        }
    }

    if let Authenticated::Token(claims) = authenticated {
        let bypasses_engine = claims.super_admin || claims.permissions.is_some();
        if bypasses_engine && !state.access.principal_active(claims.sub).await? {
            tracing::info!(principal_id = %claims.sub, "Refused token of inactive principal");
            return Err(ApiError::Unauthorized("Principal is inactive".to_string()));
        }
    }

    Ok(())
}

fn build_context(state: &AppState, authenticated: Authenticated, client: ClientInfo) -> RequestContext {
    let (principal, tenant_id, snapshot) = match authenticated {
        Authenticated::Token(claims) => {
            let principal = claims.principal();
            (principal, claims.tenant_id, claims.permissions)
        }
        Authenticated::ApiKey(key) => (PrincipalRef::api_key(key.id, key.scopes), key.tenant_id, None),
    };

    let partition = state.resolver.resolve(tenant_id);
    let ctx = RequestContext::new(principal, tenant_id, partition, client);

    match snapshot {
        Some(permissions) => ctx.with_permissions(permissions),
        None => ctx,
    }
}
