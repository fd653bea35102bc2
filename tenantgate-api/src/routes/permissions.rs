/// Permission endpoints
///
/// ```text
/// GET /v1/permissions/me                    # caller's effective grants
/// GET /v1/modules                           # active module catalogue
/// GET /v1/principals/:id/permissions        # requires users:view
/// PUT /v1/principals/:id/permissions        # requires users:edit
/// ```
///
/// Principals of another tenant are reported as not found; only
/// superusers cross tenant boundaries.

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::permission::require;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tenantgate_shared::audit::AuditEvent;
use tenantgate_shared::auth::api_key::has_scope;
use tenantgate_shared::authz::{Action, ModuleInfo, PermissionSet};
use tenantgate_shared::context::{PrincipalRef, RequestContext};
use tenantgate_shared::models::Principal;
use uuid::Uuid;

/// Module guarding principal administration
pub const USERS_MODULE: &str = "users";

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionsResponse {
    pub principal_id: Uuid,
    pub permissions: PermissionSet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplacePermissionsRequest {
    pub permissions: PermissionSet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplacePermissionsResponse {
    pub principal_id: Uuid,
    pub granted: u64,
}

/// Effective grants of the caller
///
/// API keys report what their scopes cover over the active modules.
pub async fn my_permissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<PermissionsResponse>> {
    let permissions = match ctx.principal() {
        PrincipalRef::ApiKey { scopes, .. } => {
            let modules = state.permissions.active_modules().await?;
            scoped_permissions(&modules, scopes)
        }
        PrincipalRef::User { id, .. } => state.permissions.all_grants(*id).await?,
    };

    Ok(Json(PermissionsResponse {
        principal_id: ctx.principal_id(),
        permissions,
    }))
}

pub async fn list_modules(
    State(state): State<AppState>,
    Extension(_ctx): Extension<RequestContext>,
) -> ApiResult<Json<Vec<ModuleInfo>>> {
    Ok(Json(state.permissions.active_modules().await?))
}

pub async fn get_principal_permissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(principal_id): Path<Uuid>,
) -> ApiResult<Json<PermissionsResponse>> {
    require(&state, &ctx, USERS_MODULE, Action::View.as_str()).await?;
    ensure_same_tenant(&state, &ctx, principal_id).await?;

    Ok(Json(PermissionsResponse {
        principal_id,
        permissions: state.permissions.all_grants(principal_id).await?,
    }))
}

pub async fn replace_principal_permissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(principal_id): Path<Uuid>,
    Json(body): Json<ReplacePermissionsRequest>,
) -> ApiResult<Json<ReplacePermissionsResponse>> {
    require(&state, &ctx, USERS_MODULE, Action::Edit.as_str()).await?;
    let target = ensure_same_tenant(&state, &ctx, principal_id).await?;

    if target.is_super_admin && !ctx.is_super_admin() {
        return Err(ApiError::Forbidden(
            "Only superusers can change a superuser's grants".to_string(),
        ));
    }

    let granted_by = match ctx.principal() {
        PrincipalRef::User { id, .. } => Some(*id),
        PrincipalRef::ApiKey { .. } => None,
    };

    let result = state
        .permissions
        .replace_grants(principal_id, &body.permissions, granted_by)
        .await;

    state.audit.record(
        &ctx,
        AuditEvent::new("permissions.replace", "principal")
            .resource_id(principal_id)
            .success(result.is_ok())
            .details(serde_json::json!({ "requested": body.permissions.granted_pairs().len() })),
    );

    Ok(Json(ReplacePermissionsResponse {
        principal_id,
        granted: result?,
    }))
}

async fn ensure_same_tenant(
    state: &AppState,
    ctx: &RequestContext,
    principal_id: Uuid,
) -> ApiResult<Principal> {
    let principal = state
        .permissions
        .find_principal(principal_id)
        .await?
        .filter(|p| ctx.is_super_admin() || p.belongs_to(ctx.tenant_id()))
        .ok_or_else(|| ApiError::NotFound(format!("Principal {} not found", principal_id)))?;
    Ok(principal)
}

fn scoped_permissions(modules: &[ModuleInfo], scopes: &[String]) -> PermissionSet {
    let mut set = PermissionSet::new();
    for module in modules {
        set.seed_module(module.name.as_str(), false);
        for action in Action::ALL {
            if has_scope(scopes, &module.name, action.as_str()) {
                set.grant(module.name.as_str(), action.as_str());
            }
        }
    }
    set
}
