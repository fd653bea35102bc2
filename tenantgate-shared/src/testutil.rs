//! In-memory collaborators for tests
//!
//! Available inside this crate's tests and, with the `testutil` feature, to
//! downstream crates' tests.

use crate::audit::{AuditRecord, AuditSink};
use crate::authz::{Action, GrantRepository, ModuleInfo, PermissionSet};
use crate::error::{CoreError, CoreResult};
use crate::models::Principal;
use crate::tenancy::{TenantDirectory, TenantStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct GrantState {
    principals: HashMap<Uuid, Principal>,
    modules: BTreeMap<String, (ModuleInfo, bool)>,
    grants: Vec<(Uuid, String, String)>,
}

/// [`GrantRepository`] over in-process maps
///
/// Clones share state. Counts grant lookups so tests can assert that a path
/// never consulted grants.
#[derive(Clone, Default)]
pub struct MemoryGrantRepository {
    state: Arc<Mutex<GrantState>>,
    failing: Arc<AtomicBool>,
    grant_queries: Arc<AtomicUsize>,
}

impl MemoryGrantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository with the given active modules
    pub fn with_standard_modules(modules: &[&str]) -> Self {
        let repo = Self::new();
        for module in modules {
            repo.add_module(module);
        }
        repo
    }

    pub fn add_module(&self, name: &str) {
        let mut state = self.state.lock();
        let sort_order = state.modules.len() as i32;
        state.modules.insert(
            name.to_string(),
            (
                ModuleInfo {
                    name: name.to_string(),
                    display_name: name.to_string(),
                    sort_order,
                },
                true,
            ),
        );
    }

    pub fn set_module_active(&self, name: &str, active: bool) {
        if let Some((_, flag)) = self.state.lock().modules.get_mut(name) {
            *flag = active;
        }
    }

    /// Adds an active principal, returning its id
    pub fn add_principal(&self, tenant_id: Uuid, role: &str, super_admin: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().principals.insert(
            id,
            Principal {
                id,
                tenant_id,
                email: format!("{}@example.com", id.simple()),
                role: role.to_string(),
                is_super_admin: super_admin,
                active: true,
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn set_active(&self, principal_id: Uuid, active: bool) {
        if let Some(p) = self.state.lock().principals.get_mut(&principal_id) {
            p.active = active;
        }
    }

    /// Inserts one grant row
    pub fn grant(&self, principal_id: Uuid, module: &str, action: &str) {
        self.state
            .lock()
            .grants
            .push((principal_id, module.to_string(), action.to_string()));
    }

    /// Makes every call fail with an infrastructure error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of grant lookups served so far
    pub fn grant_queries(&self) -> usize {
        self.grant_queries.load(Ordering::SeqCst)
    }

    fn check(&self) -> CoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CoreError::Infrastructure("grant repository unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GrantRepository for MemoryGrantRepository {
    async fn find_principal(&self, principal_id: Uuid) -> CoreResult<Option<Principal>> {
        self.check()?;
        Ok(self.state.lock().principals.get(&principal_id).cloned())
    }

    async fn count_matching_grants(
        &self,
        principal_id: Uuid,
        module: &str,
        action: &str,
    ) -> CoreResult<i64> {
        self.check()?;
        self.grant_queries.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock();
        let module_active = state.modules.get(module).is_some_and(|(_, active)| *active);
        if !module_active {
            return Ok(0);
        }

        let count = state
            .grants
            .iter()
            .filter(|(p, m, a)| *p == principal_id && m == module && a == action)
            .count();
        Ok(count as i64)
    }

    async fn active_modules(&self) -> CoreResult<Vec<ModuleInfo>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .modules
            .values()
            .filter(|(_, active)| *active)
            .map(|(info, _)| info.clone())
            .collect())
    }

    async fn granted_pairs(&self, principal_id: Uuid) -> CoreResult<Vec<(String, String)>> {
        self.check()?;
        self.grant_queries.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock();
        Ok(state
            .grants
            .iter()
            .filter(|(p, m, _)| {
                *p == principal_id && state.modules.get(m).is_some_and(|(_, active)| *active)
            })
            .map(|(_, m, a)| (m.clone(), a.clone()))
            .collect())
    }

    async fn replace_grants(
        &self,
        principal_id: Uuid,
        permissions: &PermissionSet,
        _granted_by: Option<Uuid>,
    ) -> CoreResult<u64> {
        self.check()?;

        let mut state = self.state.lock();
        state.grants.retain(|(p, _, _)| *p != principal_id);

        let mut granted = 0;
        for (module, action) in permissions.granted_pairs() {
            if !state.modules.contains_key(&module) || action.parse::<Action>().is_err() {
                continue;
            }
            state.grants.push((principal_id, module, action));
            granted += 1;
        }
        Ok(granted)
    }
}

/// [`TenantDirectory`] over an in-process map
///
/// Clones share state. Counts lookups so tests can see cache hits.
#[derive(Clone, Default)]
pub struct MemoryTenantDirectory {
    tenants: Arc<Mutex<HashMap<Uuid, TenantStatus>>>,
    failing: Arc<AtomicBool>,
    lookups: Arc<AtomicUsize>,
}

impl MemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active tenant, returning its id
    pub fn add_tenant(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.tenants.lock().insert(
            id,
            TenantStatus {
                active: true,
                subscription_status: "active".to_string(),
            },
        );
        id
    }

    /// Deactivating marks the subscription `expired`, as the trial job does
    pub fn set_active(&self, tenant_id: Uuid, active: bool) {
        if let Some(status) = self.tenants.lock().get_mut(&tenant_id) {
            status.active = active;
            status.subscription_status = if active { "active" } else { "expired" }.to_string();
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn tenant_status(&self, tenant_id: Uuid) -> CoreResult<Option<TenantStatus>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Infrastructure("tenant directory unavailable".to_string()));
        }
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tenants.lock().get(&tenant_id).cloned())
    }
}

/// [`AuditSink`] collecting records in memory
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> CoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Infrastructure("audit sink unavailable".to_string()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}
