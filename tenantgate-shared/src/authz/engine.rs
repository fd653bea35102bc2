/// Permission evaluation
///
/// # Policy
///
/// - Superusers (`is_super_admin`) are authorized for everything; grants are
///   not consulted.
/// - Everyone else needs a live grant on an active module.
/// - Inactive or unknown principals are denied.
/// - Evaluation failures deny: [`PermissionEngine::authorize`] never turns an
///   error into an allow.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tenantgate_shared::authz::{PermissionEngine, PgGrantRepository};
/// use tenantgate_shared::cache::DistributedCache;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, principal_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let engine = PermissionEngine::new(
///     Arc::new(PgGrantRepository::new(pool)),
///     DistributedCache::disabled(),
/// );
///
/// if engine.has_permission(principal_id, "patients", "delete").await? {
///     println!("allowed");
/// }
/// # Ok(())
/// # }
/// ```

use super::{GrantRepository, ModuleInfo, PermissionSet};
use crate::auth::api_key::has_scope;
use crate::cache::{CacheKey, DistributedCache, TTL_LONG, TTL_MEDIUM};
use crate::context::{PrincipalRef, RequestContext};
use crate::error::{CoreError, CoreResult};
use crate::models::Principal;
use std::sync::Arc;
use uuid::Uuid;

/// Cache prefix for per-principal permission sets
pub const PERMISSIONS_CACHE_PREFIX: &str = "permissions";

/// Cache key for the active module catalogue
pub const MODULES_CACHE_KEY: &str = "modules:active";

#[derive(Clone)]
pub struct PermissionEngine {
    repo: Arc<dyn GrantRepository>,
    cache: DistributedCache,
}

impl PermissionEngine {
    pub fn new(repo: Arc<dyn GrantRepository>, cache: DistributedCache) -> Self {
        Self { repo, cache }
    }

    /// Whether the principal may perform `action` on `module`
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the principal does not exist
    /// - [`CoreError::Infrastructure`] if the grant store fails
    pub async fn has_permission(
        &self,
        principal_id: Uuid,
        module: &str,
        action: &str,
    ) -> CoreResult<bool> {
        let principal = self
            .repo
            .find_principal(principal_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Principal {}", principal_id)))?;

        if !principal.active {
            return Ok(false);
        }
        if principal.is_super_admin {
            return Ok(true);
        }

        let count = self
            .repo
            .count_matching_grants(principal_id, module, action)
            .await?;
        Ok(count > 0)
    }

    /// Every active module with every standard action, overlaid with the
    /// principal's grants
    ///
    /// Absent grants read as explicit `false`. Superusers get `true` for every
    /// standard action. Results are cached under `permissions:{principal}`.
    pub async fn all_grants(&self, principal_id: Uuid) -> CoreResult<PermissionSet> {
        let key = CacheKey::new(PERMISSIONS_CACHE_PREFIX).part(principal_id);
        self.cache
            .get_or_compute(&key, TTL_MEDIUM, || self.compute_grants(principal_id))
            .await
    }

    async fn compute_grants(&self, principal_id: Uuid) -> CoreResult<PermissionSet> {
        let principal = self
            .repo
            .find_principal(principal_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Principal {}", principal_id)))?;

        let modules = self.repo.active_modules().await?;
        let superuser = principal.active && principal.is_super_admin;

        let mut set = PermissionSet::new();
        for module in &modules {
            set.seed_module(module.name.as_str(), superuser);
        }

        if principal.active && !superuser {
            for (module, action) in self.repo.granted_pairs(principal_id).await? {
                // Only overlay modules that are still in the active catalogue
                if set.contains_module(&module) {
                    set.grant(module, action);
                }
            }
        }

        Ok(set)
    }

    /// Active modules, cached for a day
    pub async fn active_modules(&self) -> CoreResult<Vec<ModuleInfo>> {
        let key = CacheKey::new(MODULES_CACHE_KEY);
        self.cache
            .get_or_compute(&key, TTL_LONG, || self.repo.active_modules())
            .await
    }

    /// Looks up a principal for tenant-boundary checks
    pub async fn find_principal(&self, principal_id: Uuid) -> CoreResult<Option<Principal>> {
        self.repo.find_principal(principal_id).await
    }

    /// Gate executed before a business operation
    ///
    /// Order of evaluation:
    ///
    /// 1. superuser: allow
    /// 2. API key: allow iff its scopes cover `(module, action)`
    /// 3. permission snapshot carried by the token: evaluate it alone
    /// 4. otherwise: [`Self::has_permission`]
    ///
    /// # Errors
    ///
    /// - [`CoreError::Authorization`] when denied
    /// - [`CoreError::Infrastructure`] when evaluation failed; never an allow
    pub async fn authorize(&self, ctx: &RequestContext, module: &str, action: &str) -> CoreResult<()> {
        let principal_id = ctx.principal_id();

        let allowed = match ctx.principal() {
            PrincipalRef::User { super_admin: true, .. } => true,
            PrincipalRef::ApiKey { scopes, .. } => has_scope(scopes, module, action),
            PrincipalRef::User { .. } => match ctx.permissions() {
                Some(snapshot) => snapshot.allows(module, action),
                None => match self.has_permission(principal_id, module, action).await {
                    Ok(allowed) => allowed,
                    Err(CoreError::NotFound(_)) => false,
                    Err(e) => {
                        tracing::error!(
                            request_id = %ctx.request_id(),
                            principal_id = %principal_id,
                            tenant_id = %ctx.tenant_id(),
                            module = %module,
                            action = %action,
                            error = %e,
                            "Permission evaluation failed, denying"
                        );
                        return Err(CoreError::Infrastructure(format!(
                            "Permission evaluation failed: {}",
                            e
                        )));
                    }
                },
            },
        };

        if allowed {
            Ok(())
        } else {
            tracing::info!(
                request_id = %ctx.request_id(),
                principal_id = %principal_id,
                tenant_id = %ctx.tenant_id(),
                module = %module,
                action = %action,
                "Permission denied"
            );
            Err(CoreError::denied(module, action))
        }
    }

    /// Replaces a principal's grants and drops their cached permission set
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the principal does not exist.
    pub async fn replace_grants(
        &self,
        principal_id: Uuid,
        permissions: &PermissionSet,
        granted_by: Option<Uuid>,
    ) -> CoreResult<u64> {
        if self.repo.find_principal(principal_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("Principal {}", principal_id)));
        }

        let granted = self
            .repo
            .replace_grants(principal_id, permissions, granted_by)
            .await?;

        let prefix = CacheKey::new(PERMISSIONS_CACHE_PREFIX).part(principal_id);
        self.cache.invalidate_prefix(prefix.as_str()).await;

        tracing::info!(
            principal_id = %principal_id,
            granted_by = ?granted_by,
            granted,
            "Permissions replaced"
        );
        Ok(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ClientInfo;
    use crate::tenancy::PartitionResolver;
    use crate::testutil::MemoryGrantRepository;

    fn engine(repo: &MemoryGrantRepository) -> PermissionEngine {
        PermissionEngine::new(Arc::new(repo.clone()), DistributedCache::disabled())
    }

    fn ctx(principal: PrincipalRef, tenant_id: Uuid) -> RequestContext {
        RequestContext::new(
            principal,
            tenant_id,
            PartitionResolver::default().resolve(tenant_id),
            ClientInfo::default(),
        )
    }

    #[tokio::test]
    async fn test_superuser_skips_grant_lookup() {
        let repo = MemoryGrantRepository::with_standard_modules(&["patients", "payments"]);
        let tenant_id = Uuid::new_v4();
        let root = repo.add_principal(tenant_id, "admin", true);

        let engine = engine(&repo);
        for (module, action) in [("patients", "delete"), ("unknown", "anything")] {
            assert!(engine.has_permission(root, module, action).await.unwrap());
        }
        assert_eq!(repo.grant_queries(), 0);
    }

    #[tokio::test]
    async fn test_unknown_principal_is_not_found() {
        let repo = MemoryGrantRepository::new();
        let err = engine(&repo)
            .has_permission(Uuid::new_v4(), "patients", "view")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_inactive_principal_is_denied() {
        let repo = MemoryGrantRepository::with_standard_modules(&["patients"]);
        let id = repo.add_principal(Uuid::new_v4(), "user", false);
        repo.grant(id, "patients", "view");
        repo.set_active(id, false);

        assert!(!engine(&repo).has_permission(id, "patients", "view").await.unwrap());
    }

    #[tokio::test]
    async fn test_inactive_module_grants_are_ignored() {
        let repo = MemoryGrantRepository::with_standard_modules(&["patients", "legacy"]);
        let id = repo.add_principal(Uuid::new_v4(), "user", false);
        repo.grant(id, "legacy", "view");
        repo.set_module_active("legacy", false);

        let engine = engine(&repo);
        assert!(!engine.has_permission(id, "legacy", "view").await.unwrap());
        assert!(!engine.all_grants(id).await.unwrap().contains_module("legacy"));
    }

    #[tokio::test]
    async fn test_all_grants_superuser_all_true() {
        let repo = MemoryGrantRepository::with_standard_modules(&["patients", "payments"]);
        let root = repo.add_principal(Uuid::new_v4(), "admin", true);

        let set = engine(&repo).all_grants(root).await.unwrap();
        for module in ["patients", "payments"] {
            for action in ["view", "create", "edit", "delete"] {
                assert!(set.allows(module, action));
            }
        }
    }

    #[tokio::test]
    async fn test_authorize_uses_snapshot_only() {
        let repo = MemoryGrantRepository::with_standard_modules(&["patients"]);
        let tenant_id = Uuid::new_v4();
        let id = repo.add_principal(tenant_id, "user", false);
        repo.grant(id, "patients", "delete");

        let mut snapshot = PermissionSet::new();
        snapshot.grant("patients", "view");
        let ctx = ctx(PrincipalRef::user(id, "user", false), tenant_id).with_permissions(snapshot);

        let engine = engine(&repo);
        assert!(engine.authorize(&ctx, "patients", "view").await.is_ok());
        assert!(matches!(
            engine.authorize(&ctx, "patients", "delete").await,
            Err(CoreError::Authorization { .. })
        ));
        assert_eq!(repo.grant_queries(), 0);
    }

    #[tokio::test]
    async fn test_authorize_api_key_scopes() {
        let repo = MemoryGrantRepository::new();
        let ctx = ctx(
            PrincipalRef::api_key(Uuid::new_v4(), vec!["appointments:view".into()]),
            Uuid::new_v4(),
        );

        let engine = engine(&repo);
        assert!(engine.authorize(&ctx, "appointments", "view").await.is_ok());
        assert!(engine.authorize(&ctx, "appointments", "create").await.is_err());
        assert!(engine.authorize(&ctx, "patients", "view").await.is_err());
    }

    #[tokio::test]
    async fn test_authorize_fails_closed_on_store_error() {
        let repo = MemoryGrantRepository::with_standard_modules(&["patients"]);
        let tenant_id = Uuid::new_v4();
        let id = repo.add_principal(tenant_id, "user", false);
        repo.grant(id, "patients", "view");
        repo.set_failing(true);

        let err = engine(&repo)
            .authorize(&ctx(PrincipalRef::user(id, "user", false), tenant_id), "patients", "view")
            .await
            .unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn test_replace_grants_unknown_principal() {
        let repo = MemoryGrantRepository::with_standard_modules(&["patients"]);
        let result = engine(&repo)
            .replace_grants(Uuid::new_v4(), &PermissionSet::new(), None)
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_admin_role_without_grant_then_granted() {
        let repo = MemoryGrantRepository::with_standard_modules(&["patients"]);
        let tenant_id = Uuid::new_v4();
        let admin = repo.add_principal(tenant_id, "admin", false);

        let engine = engine(&repo);
        assert!(!engine.has_permission(admin, "patients", "delete").await.unwrap());

        repo.grant(admin, "patients", "delete");
        assert!(engine.has_permission(admin, "patients", "delete").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_grants_invalidates_cached_set() {
        use crate::store::{MemoryStore, SharedStore};
        use std::time::Duration;

        let store = Arc::new(MemoryStore::new());
        let repo = MemoryGrantRepository::with_standard_modules(&["patients"]);
        let admin = repo.add_principal(Uuid::new_v4(), "admin", false);
        let engine = PermissionEngine::new(
            Arc::new(repo.clone()),
            DistributedCache::new(store.clone()),
        );

        assert!(!engine.all_grants(admin).await.unwrap().allows("patients", "view"));

        let key = format!("{}:{}", PERMISSIONS_CACHE_PREFIX, admin);
        for _ in 0..100 {
            if store.get(&key).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.get(&key).await.unwrap().is_some());

        let mut set = PermissionSet::new();
        set.grant("patients", "view");
        assert_eq!(engine.replace_grants(admin, &set, None).await.unwrap(), 1);

        assert!(engine.all_grants(admin).await.unwrap().allows("patients", "view"));
    }
}
