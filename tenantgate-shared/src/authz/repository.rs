/// Storage seam for grants
///
/// [`PermissionEngine`](super::PermissionEngine) only talks to grants through
/// this trait so it can be exercised against an in-memory repository.

use crate::error::CoreResult;
use crate::models::Principal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PermissionSet;

/// Active module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModuleInfo {
    /// Stable module code (`patients`)
    pub name: String,
    pub display_name: String,
    pub sort_order: i32,
}

impl crate::cache::Cacheable for Vec<ModuleInfo> {
    const SCHEMA_VERSION: u32 = 1;
}

#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Principal that has not been soft-deleted
    async fn find_principal(&self, principal_id: Uuid) -> CoreResult<Option<Principal>>;

    /// Live grants matching `(module, action)` on an active module
    async fn count_matching_grants(
        &self,
        principal_id: Uuid,
        module: &str,
        action: &str,
    ) -> CoreResult<i64>;

    /// Every active, non-deleted module
    async fn active_modules(&self) -> CoreResult<Vec<ModuleInfo>>;

    /// Live `(module, action)` grants on active modules
    async fn granted_pairs(&self, principal_id: Uuid) -> CoreResult<Vec<(String, String)>>;

    /// Replaces every live grant of a principal in one transaction
    ///
    /// Entries set to `false`, unknown modules and unknown actions are
    /// skipped. Returns the number of grants written.
    async fn replace_grants(
        &self,
        principal_id: Uuid,
        permissions: &PermissionSet,
        granted_by: Option<Uuid>,
    ) -> CoreResult<u64>;
}
