/// Tenant and principal standing
///
/// Tokens and API keys stay valid until they expire, while the tenant behind
/// them can lapse (the trial expiration job clears `tenants.active`) and a
/// principal can be deactivated. [`AccessGuard`] re-checks both on every
/// request through the [`DistributedCache`], so the common case costs one
/// store read.
///
/// Whoever deactivates a tenant calls [`AccessGuard::invalidate_tenant`] (or
/// deletes [`tenant_status_key`] directly); otherwise the change is seen once
/// the cached entry expires after [`TTL_SHORT`].
///
/// Lookup failures are returned as errors. Callers refuse the request.

use crate::authz::GrantRepository;
use crate::cache::{CacheKey, Cacheable, DistributedCache, TTL_SHORT};
use crate::error::CoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Cache prefix for tenant standing
pub const TENANT_STATUS_CACHE_PREFIX: &str = "tenant_status";

/// Cache prefix for principal standing
pub const PRINCIPAL_STATUS_CACHE_PREFIX: &str = "principal_status";

/// `tenant_status:{tenant_id}`
pub fn tenant_status_key(tenant_id: Uuid) -> CacheKey {
    CacheKey::tenant(TENANT_STATUS_CACHE_PREFIX, tenant_id)
}

fn principal_status_key(principal_id: Uuid) -> CacheKey {
    CacheKey::new(PRINCIPAL_STATUS_CACHE_PREFIX).part(principal_id)
}

/// Columns of `public.tenants` that decide access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantStatus {
    pub active: bool,
    pub subscription_status: String,
}

impl Cacheable for Option<TenantStatus> {
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PrincipalStatus {
    active: bool,
}

impl Cacheable for Option<PrincipalStatus> {
    const SCHEMA_VERSION: u32 = 1;
}

/// Outcome of a tenant check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantStanding {
    Active,
    /// Deactivated; carries the subscription status (`expired`, `canceled`, ...)
    Lapsed(String),
    Unknown,
}

/// Source of tenant rows
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tenant_status(&self, tenant_id: Uuid) -> CoreResult<Option<TenantStatus>>;
}

/// [`TenantDirectory`] over `public.tenants`
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn tenant_status(&self, tenant_id: Uuid) -> CoreResult<Option<TenantStatus>> {
        let status = sqlx::query_as::<_, TenantStatus>(
            "SELECT active, subscription_status FROM public.tenants WHERE id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }
}

/// Cached tenant and principal checks for the request path
#[derive(Clone)]
pub struct AccessGuard {
    tenants: Arc<dyn TenantDirectory>,
    grants: Arc<dyn GrantRepository>,
    cache: DistributedCache,
}

impl AccessGuard {
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        grants: Arc<dyn GrantRepository>,
        cache: DistributedCache,
    ) -> Self {
        Self {
            tenants,
            grants,
            cache,
        }
    }

    pub async fn tenant_standing(&self, tenant_id: Uuid) -> CoreResult<TenantStanding> {
        let status: Option<TenantStatus> = self
            .cache
            .get_or_compute(&tenant_status_key(tenant_id), TTL_SHORT, || {
                self.tenants.tenant_status(tenant_id)
            })
            .await?;

        Ok(match status {
            None => TenantStanding::Unknown,
            Some(status) if status.active => TenantStanding::Active,
            Some(status) => TenantStanding::Lapsed(status.subscription_status),
        })
    }

    /// Whether the principal exists and is active
    pub async fn principal_active(&self, principal_id: Uuid) -> CoreResult<bool> {
        let status: Option<PrincipalStatus> = self
            .cache
            .get_or_compute(&principal_status_key(principal_id), TTL_SHORT, || async {
                let principal = self.grants.find_principal(principal_id).await?;
                CoreResult::Ok(principal.map(|p| PrincipalStatus { active: p.active }))
            })
            .await?;

        Ok(status.is_some_and(|s| s.active))
    }

    /// Drops the cached standing of a tenant
    pub async fn invalidate_tenant(&self, tenant_id: Uuid) -> bool {
        self.cache.invalidate_key(&tenant_status_key(tenant_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SharedStore};
    use crate::testutil::{MemoryGrantRepository, MemoryTenantDirectory};
    use std::time::Duration;

    fn guard(tenants: &MemoryTenantDirectory, grants: &MemoryGrantRepository) -> AccessGuard {
        AccessGuard::new(
            Arc::new(tenants.clone()),
            Arc::new(grants.clone()),
            DistributedCache::disabled(),
        )
    }

    #[tokio::test]
    async fn test_tenant_standing() {
        let tenants = MemoryTenantDirectory::new();
        let guard = guard(&tenants, &MemoryGrantRepository::new());
        let tenant_id = tenants.add_tenant();

        assert_eq!(guard.tenant_standing(tenant_id).await.unwrap(), TenantStanding::Active);

        tenants.set_active(tenant_id, false);
        assert_eq!(
            guard.tenant_standing(tenant_id).await.unwrap(),
            TenantStanding::Lapsed("expired".to_string())
        );
        assert_eq!(
            guard.tenant_standing(Uuid::new_v4()).await.unwrap(),
            TenantStanding::Unknown
        );
    }

    #[tokio::test]
    async fn test_directory_failure_is_an_error() {
        let tenants = MemoryTenantDirectory::new();
        let guard = guard(&tenants, &MemoryGrantRepository::new());
        let tenant_id = tenants.add_tenant();
        tenants.set_failing(true);

        assert!(guard.tenant_standing(tenant_id).await.is_err());
    }

    #[tokio::test]
    async fn test_principal_active() {
        let grants = MemoryGrantRepository::new();
        let guard = guard(&MemoryTenantDirectory::new(), &grants);
        let principal = grants.add_principal(Uuid::new_v4(), "admin", true);

        assert!(guard.principal_active(principal).await.unwrap());
        grants.set_active(principal, false);
        assert!(!guard.principal_active(principal).await.unwrap());
        assert!(!guard.principal_active(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_cached_standing_until_invalidated() {
        let store = Arc::new(MemoryStore::new());
        let tenants = MemoryTenantDirectory::new();
        let guard = AccessGuard::new(
            Arc::new(tenants.clone()),
            Arc::new(MemoryGrantRepository::new()),
            DistributedCache::new(store.clone()),
        );
        let tenant_id = tenants.add_tenant();
        let key = tenant_status_key(tenant_id);

        assert_eq!(guard.tenant_standing(tenant_id).await.unwrap(), TenantStanding::Active);
        for _ in 0..50 {
            if store.get(key.as_str()).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tenants.set_active(tenant_id, false);
        assert_eq!(guard.tenant_standing(tenant_id).await.unwrap(), TenantStanding::Active);
        assert_eq!(tenants.lookups(), 1);

        assert!(guard.invalidate_tenant(tenant_id).await);
        assert!(matches!(
            guard.tenant_standing(tenant_id).await.unwrap(),
            TenantStanding::Lapsed(_)
        ));
        assert_eq!(tenants.lookups(), 2);
    }
}
