/// Tenant partition resolution
///
/// Each tenant's business data lives in its own PostgreSQL schema (a
/// *partition*); shared tables (tenants, principals, permissions, audit log)
/// live in `public`. This module turns a trusted tenant identifier into a
/// [`PartitionHandle`] and applies that handle to one database session at a
/// time. Nothing here mutates process-wide state.
///
/// Partition names are the only identifiers this crate splices into SQL, so
/// they can only be constructed through [`PartitionName::parse`], which
/// accepts `^[A-Za-z0-9_]+$` up to 63 bytes.
///
/// # Example
///
/// ```
/// use tenantgate_shared::tenancy::PartitionResolver;
/// use uuid::Uuid;
///
/// let resolver = PartitionResolver::default();
/// let tenant_id = Uuid::parse_str("8d6f0a51-3c1e-4b8e-9a55-6a1f2f7f7c10").unwrap();
/// let handle = resolver.resolve(tenant_id);
///
/// assert_eq!(handle.name().as_str(), "tenant_8d6f0a51_3c1e_4b8e_9a55_6a1f2f7f7c10");
/// assert!(!handle.is_fallback());
/// ```

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::Postgres;
use std::fmt;
use std::ops::{Deref, DerefMut};
use uuid::Uuid;

pub mod status;

pub use status::{AccessGuard, PgTenantDirectory, TenantDirectory, TenantStanding, TenantStatus};

/// PostgreSQL identifier length limit (NAMEDATALEN - 1)
pub const MAX_PARTITION_NAME_LEN: usize = 63;

/// Prefix of derived tenant partition names
pub const DEFAULT_PARTITION_PREFIX: &str = "tenant_";

/// Shared partition
pub const DEFAULT_PARTITION: &str = "public";

/// A validated partition (schema) name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PartitionName(String);

impl PartitionName {
    /// Validates a partition name
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the name is empty, longer than 63
    /// bytes, or contains anything other than ASCII letters, digits and `_`.
    pub fn parse(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(CoreError::Validation("Partition name is empty".to_string()));
        }
        if name.len() > MAX_PARTITION_NAME_LEN {
            return Err(CoreError::Validation(format!(
                "Partition name exceeds {} bytes",
                MAX_PARTITION_NAME_LEN
            )));
        }
        if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(CoreError::Validation(
                "Partition name must match ^[A-Za-z0-9_]+$".to_string(),
            ));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted identifier for SQL
    fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl<'de> Deserialize<'de> for PartitionName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        PartitionName::parse(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PartitionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolved partition for one request or job
///
/// Carries the partition to use and whether the resolver had to fall back to
/// the default partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionHandle {
    tenant_id: Option<Uuid>,
    name: PartitionName,
    fallback: bool,
}

impl PartitionHandle {
    /// Handle for the shared partition, with no tenant attached
    pub fn shared() -> Self {
        Self {
            tenant_id: None,
            name: PartitionName(DEFAULT_PARTITION.to_string()),
            fallback: false,
        }
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.tenant_id
    }

    pub fn name(&self) -> &PartitionName {
        &self.name
    }

    /// Whether resolution failed validation and the default partition was used
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    fn search_path_sql(&self) -> String {
        if self.name.as_str() == DEFAULT_PARTITION {
            format!("SET search_path TO {}", self.name.quoted())
        } else {
            format!("SET search_path TO {}, public", self.name.quoted())
        }
    }

    /// Points one session at this partition
    ///
    /// The setting lasts for the session. Pools created by
    /// [`crate::db::create_pool`] reset it when the connection is returned.
    pub async fn apply(&self, conn: &mut PgConnection) -> CoreResult<()> {
        sqlx::query(&self.search_path_sql()).execute(&mut *conn).await?;
        Ok(())
    }

    /// Acquires a pooled connection with this partition applied
    pub async fn acquire(&self, pool: &PgPool) -> CoreResult<TenantConnection> {
        let mut conn = pool.acquire().await?;
        self.apply(&mut conn).await?;
        Ok(TenantConnection {
            conn,
            partition: self.clone(),
        })
    }
}

/// Pooled connection bound to a partition
pub struct TenantConnection {
    conn: PoolConnection<Postgres>,
    partition: PartitionHandle,
}

impl TenantConnection {
    pub fn partition(&self) -> &PartitionHandle {
        &self.partition
    }
}

impl Deref for TenantConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for TenantConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Maps tenant identifiers to partitions
#[derive(Debug, Clone)]
pub struct PartitionResolver {
    prefix: String,
    default: PartitionName,
}

impl Default for PartitionResolver {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PARTITION_PREFIX.to_string(),
            default: PartitionName(DEFAULT_PARTITION.to_string()),
        }
    }
}

impl PartitionResolver {
    /// Creates a resolver with a custom prefix and default partition
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the default partition name is
    /// invalid.
    pub fn new(prefix: impl Into<String>, default: impl Into<String>) -> CoreResult<Self> {
        Ok(Self {
            prefix: prefix.into(),
            default: PartitionName::parse(default)?,
        })
    }

    /// Partition name derived for a tenant, before validation
    pub fn derive_name(&self, tenant_id: Uuid) -> String {
        format!("{}{}", self.prefix, tenant_id.to_string().replace('-', "_"))
    }

    /// Resolves a trusted tenant identifier to its partition
    ///
    /// A derived name that fails validation is never used: the resolver logs
    /// a security warning and returns the default partition instead.
    pub fn resolve(&self, tenant_id: Uuid) -> PartitionHandle {
        self.resolve_name(tenant_id, self.derive_name(tenant_id))
    }

    /// Resolves a partition name stored for a tenant (e.g. `tenants.partition_name`)
    pub fn resolve_name(&self, tenant_id: Uuid, candidate: impl Into<String>) -> PartitionHandle {
        let candidate = candidate.into();
        match PartitionName::parse(candidate.as_str()) {
            Ok(name) => PartitionHandle {
                tenant_id: Some(tenant_id),
                name,
                fallback: false,
            },
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    candidate_len = candidate.len(),
                    default = %self.default,
                    error = %e,
                    "SECURITY: invalid partition name, using default partition"
                );
                PartitionHandle {
                    tenant_id: Some(tenant_id),
                    name: self.default.clone(),
                    fallback: true,
                }
            }
        }
    }
}

/// Creates a tenant partition if it does not exist
///
/// Called once at tenant signup.
pub async fn create_partition(pool: &PgPool, name: &PartitionName) -> CoreResult<()> {
    let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", name.quoted());
    sqlx::query(&sql).execute(pool).await?;
    tracing::info!(partition = %name, "Tenant partition created");
    Ok(())
}

/// Validates a raw name, then creates the partition
///
/// Invalid names are rejected before anything is sent to the database.
pub async fn create_partition_named(pool: &PgPool, raw: &str) -> CoreResult<PartitionName> {
    let name = PartitionName::parse(raw)?;
    create_partition(pool, &name).await?;
    Ok(name)
}
