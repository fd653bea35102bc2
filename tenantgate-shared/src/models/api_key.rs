/// API key model
///
/// An API key maps directly to one tenant and carries a scope list. The
/// plaintext key is returned once by [`ApiKey::create`]; only its SHA-256
/// digest is stored.
///
/// # Example
///
/// ```no_run
/// use tenantgate_shared::models::api_key::{ApiKey, CreateApiKey};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, tenant_id: Uuid) -> Result<(), sqlx::Error> {
/// let (key, plaintext) = ApiKey::create(&pool, CreateApiKey {
///     tenant_id,
///     name: "WhatsApp bot".to_string(),
///     scopes: vec!["appointments:view".to_string()],
///     expires_at: None,
/// }).await?;
///
/// let found = ApiKey::validate(&pool, &plaintext).await?;
/// assert_eq!(found.map(|k| k.id), Some(key.id));
/// # Ok(())
/// # }
/// ```

use crate::auth::api_key::{generate_api_key, has_scope, hash_api_key, validate_api_key_format};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// API key row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,

    /// Tenant the key acts for
    pub tenant_id: Uuid,

    pub name: String,

    /// SHA-256 hex digest of the plaintext key
    #[serde(skip_serializing)]
    pub key_hash: String,

    pub scopes: Vec<String>,

    pub created_at: DateTime<Utc>,

    pub last_used_at: Option<DateTime<Utc>>,

    pub expires_at: Option<DateTime<Utc>>,

    pub revoked: bool,
}

/// Input for creating an API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApiKey {
    pub tenant_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

const API_KEY_COLUMNS: &str =
    "id, tenant_id, name, key_hash, scopes, created_at, last_used_at, expires_at, revoked";

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the key's scopes allow `action` on `module`
    pub fn allows(&self, module: &str, action: &str) -> bool {
        has_scope(&self.scopes, module, action)
    }

    /// Creates a key, returning the row and the plaintext key
    pub async fn create(pool: &PgPool, data: CreateApiKey) -> Result<(Self, String), sqlx::Error> {
        let (plaintext, key_hash) = generate_api_key();
        let sql = format!(
            "INSERT INTO public.api_keys (id, tenant_id, name, key_hash, scopes, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            API_KEY_COLUMNS
        );

        let key = sqlx::query_as::<_, ApiKey>(&sql)
            .bind(Uuid::new_v4())
            .bind(data.tenant_id)
            .bind(data.name)
            .bind(key_hash)
            .bind(&data.scopes)
            .bind(data.expires_at)
            .fetch_one(pool)
            .await?;

        Ok((key, plaintext))
    }

    /// Looks up a usable key by its plaintext and records the use
    ///
    /// Malformed, revoked and expired keys all return `None`.
    pub async fn validate(pool: &PgPool, plaintext: &str) -> Result<Option<Self>, sqlx::Error> {
        if !validate_api_key_format(plaintext) {
            return Ok(None);
        }

        let sql = format!(
            "UPDATE public.api_keys
             SET last_used_at = NOW()
             WHERE key_hash = $1
               AND revoked = FALSE
               AND (expires_at IS NULL OR expires_at > NOW())
             RETURNING {}",
            API_KEY_COLUMNS
        );

        sqlx::query_as::<_, ApiKey>(&sql)
            .bind(hash_api_key(plaintext))
            .fetch_optional(pool)
            .await
    }

    /// Revokes a key owned by `tenant_id`
    pub async fn revoke(pool: &PgPool, id: Uuid, tenant_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE public.api_keys SET revoked = TRUE WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_by_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM public.api_keys WHERE tenant_id = $1 ORDER BY created_at DESC",
            API_KEY_COLUMNS
        );

        sqlx::query_as::<_, ApiKey>(&sql)
            .bind(tenant_id)
            .fetch_all(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(scopes: &[&str], expires_at: Option<DateTime<Utc>>) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "test".into(),
            key_hash: hash_api_key("tg_x"),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now(),
            last_used_at: None,
            expires_at,
            revoked: false,
        }
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        assert!(!key(&[], None).is_expired(now));
        assert!(key(&[], Some(now - Duration::seconds(1))).is_expired(now));
        assert!(!key(&[], Some(now + Duration::hours(1))).is_expired(now));
    }

    #[test]
    fn test_allows_uses_scopes() {
        let k = key(&["appointments:view"], None);
        assert!(k.allows("appointments", "view"));
        assert!(!k.allows("appointments", "delete"));
    }

    #[test]
    fn test_hash_not_serialized() {
        let json = serde_json::to_value(key(&[], None)).unwrap();
        assert!(json.get("key_hash").is_none());
    }
}
