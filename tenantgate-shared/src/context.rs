/// Per-request context
///
/// [`RequestContext`] is built once, after authentication and partition
/// resolution, and then passed explicitly to every component that needs the
/// caller's identity, tenant or partition. Fields are private and there are
/// no setters; a handler holding a context cannot change who it acts for.
///
/// # Example
///
/// ```
/// use tenantgate_shared::context::{ClientInfo, PrincipalRef, RequestContext};
/// use tenantgate_shared::tenancy::PartitionResolver;
/// use uuid::Uuid;
///
/// let tenant_id = Uuid::new_v4();
/// let partition = PartitionResolver::default().resolve(tenant_id);
/// let ctx = RequestContext::new(
///     PrincipalRef::user(Uuid::new_v4(), "admin", false),
///     tenant_id,
///     partition,
///     ClientInfo::default(),
/// );
///
/// assert_eq!(ctx.tenant_id(), tenant_id);
/// assert!(!ctx.is_super_admin());
/// ```

use crate::authz::PermissionSet;
use crate::tenancy::PartitionHandle;
use serde::Serialize;
use uuid::Uuid;

/// Authenticated actor behind a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrincipalRef {
    /// A user bound to one tenant
    User {
        id: Uuid,
        role: String,
        super_admin: bool,
    },
    /// An integration key; tenant-scoped, not bound to a user
    ApiKey { id: Uuid, scopes: Vec<String> },
}

impl PrincipalRef {
    pub fn user(id: Uuid, role: impl Into<String>, super_admin: bool) -> Self {
        PrincipalRef::User {
            id,
            role: role.into(),
            super_admin,
        }
    }

    pub fn api_key(id: Uuid, scopes: Vec<String>) -> Self {
        PrincipalRef::ApiKey { id, scopes }
    }

    /// User or key identifier
    pub fn id(&self) -> Uuid {
        match self {
            PrincipalRef::User { id, .. } | PrincipalRef::ApiKey { id, .. } => *id,
        }
    }

    /// Role name; API keys report `api_key`
    pub fn role(&self) -> &str {
        match self {
            PrincipalRef::User { role, .. } => role,
            PrincipalRef::ApiKey { .. } => "api_key",
        }
    }

    pub fn is_super_admin(&self) -> bool {
        matches!(self, PrincipalRef::User { super_admin: true, .. })
    }
}

/// Request metadata used for audit and rate limiting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
}

/// Immutable per-request context
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    principal: PrincipalRef,
    tenant_id: Uuid,
    partition: PartitionHandle,
    permissions: Option<PermissionSet>,
    client: ClientInfo,
}

impl RequestContext {
    pub fn new(
        principal: PrincipalRef,
        tenant_id: Uuid,
        partition: PartitionHandle,
        client: ClientInfo,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            principal,
            tenant_id,
            partition,
            permissions: None,
            client,
        }
    }

    /// Attaches the permission snapshot carried by the access token
    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Overrides the generated request id (e.g. from an `X-Request-Id` header)
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn principal(&self) -> &PrincipalRef {
        &self.principal
    }

    pub fn principal_id(&self) -> Uuid {
        self.principal.id()
    }

    pub fn is_super_admin(&self) -> bool {
        self.principal.is_super_admin()
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn partition(&self) -> &PartitionHandle {
        &self.partition
    }

    pub fn permissions(&self) -> Option<&PermissionSet> {
        self.permissions.as_ref()
    }

    pub fn client(&self) -> &ClientInfo {
        &self.client
    }
}
