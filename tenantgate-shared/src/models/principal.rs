/// Principal model
///
/// A principal is a user bound to exactly one tenant. Its role is
/// informational for the permission model; only `is_super_admin` bypasses
/// grant evaluation.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE public.principals (
///     id UUID PRIMARY KEY,
///     tenant_id UUID NOT NULL REFERENCES public.tenants(id),
///     email VARCHAR(255) NOT NULL UNIQUE,
///     role VARCHAR(32) NOT NULL DEFAULT 'user',
///     is_super_admin BOOLEAN NOT NULL DEFAULT FALSE,
///     active BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     deleted_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Principal row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Principal {
    pub id: Uuid,

    /// Owning tenant
    pub tenant_id: Uuid,

    pub email: String,

    /// Role name (`admin`, `user`, ...)
    pub role: String,

    /// Bypasses grant evaluation entirely
    pub is_super_admin: bool,

    /// Inactive principals are denied everything
    pub active: bool,

    pub created_at: DateTime<Utc>,
}

/// Input for creating a principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrincipal {
    pub tenant_id: Uuid,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub is_super_admin: bool,
}

fn default_role() -> String {
    "user".to_string()
}

const PRINCIPAL_COLUMNS: &str = "id, tenant_id, email, role, is_super_admin, active, created_at";

impl Principal {
    /// Creates a principal
    pub async fn create(pool: &PgPool, data: CreatePrincipal) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "INSERT INTO public.principals (id, tenant_id, email, role, is_super_admin)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            PRINCIPAL_COLUMNS
        );

        sqlx::query_as::<_, Principal>(&sql)
            .bind(Uuid::new_v4())
            .bind(data.tenant_id)
            .bind(data.email.to_lowercase())
            .bind(data.role)
            .bind(data.is_super_admin)
            .fetch_one(pool)
            .await
    }

    /// Finds a principal that has not been soft-deleted
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM public.principals WHERE id = $1 AND deleted_at IS NULL",
            PRINCIPAL_COLUMNS
        );

        sqlx::query_as::<_, Principal>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lists a tenant's principals
    pub async fn list_by_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM public.principals
             WHERE tenant_id = $1 AND deleted_at IS NULL
             ORDER BY created_at",
            PRINCIPAL_COLUMNS
        );

        sqlx::query_as::<_, Principal>(&sql)
            .bind(tenant_id)
            .fetch_all(pool)
            .await
    }

    /// Whether the principal may act for `tenant_id`
    pub fn belongs_to(&self, tenant_id: Uuid) -> bool {
        self.tenant_id == tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_principal_defaults() {
        let data: CreatePrincipal = serde_json::from_value(serde_json::json!({
            "tenant_id": Uuid::nil(),
            "email": "a@example.com"
        }))
        .unwrap();
        assert_eq!(data.role, "user");
        assert!(!data.is_super_admin);
    }

    #[test]
    fn test_belongs_to() {
        let tenant_id = Uuid::new_v4();
        let principal = Principal {
            id: Uuid::new_v4(),
            tenant_id,
            email: "a@example.com".into(),
            role: "admin".into(),
            is_super_admin: false,
            active: true,
            created_at: Utc::now(),
        };
        assert!(principal.belongs_to(tenant_id));
        assert!(!principal.belongs_to(Uuid::new_v4()));
    }
}
