/// Token revocation over the shared store
///
/// Two mechanisms, both checked on every authenticated request:
///
/// - single token: `token_blacklist:{sha256(token)}` until the token's own
///   expiry (logout)
/// - all tokens of a principal: `user_tokens:revoked_at:{id}` holding a Unix
///   timestamp; tokens issued before it are rejected (password change,
///   deactivation). Kept for the refresh token lifetime.
///
/// Checks fail open: with the store missing or failing, tokens are treated
/// as not revoked and the error is logged. Writes report the error so the
/// caller can tell the user revocation did not happen.

use super::jwt::Claims;
use crate::store::{SharedStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How long a principal-wide revocation is remembered
pub const PRINCIPAL_REVOCATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Store key for a single revoked token
pub fn token_key(token: &str) -> String {
    format!("token_blacklist:{}", hex::encode(Sha256::digest(token.as_bytes())))
}

/// Store key for a principal-wide revocation timestamp
pub fn principal_key(principal_id: Uuid) -> String {
    format!("user_tokens:revoked_at:{}", principal_id)
}

#[derive(Clone)]
pub struct TokenRevocation {
    store: Option<Arc<dyn SharedStore>>,
}

impl TokenRevocation {
    pub fn new(store: Option<Arc<dyn SharedStore>>) -> Self {
        Self { store }
    }

    fn store(&self) -> StoreResult<&Arc<dyn SharedStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("no shared store configured".to_string()))
    }

    /// Revokes one token until `expires_at`
    ///
    /// Already expired tokens are ignored.
    pub async fn revoke_token(&self, token: &str, expires_at: DateTime<Utc>) -> StoreResult<()> {
        let remaining = expires_at - Utc::now();
        let Ok(ttl) = remaining.to_std() else {
            return Ok(());
        };
        if ttl.is_zero() {
            return Ok(());
        }

        self.store()?.set_ex(&token_key(token), b"revoked", ttl).await
    }

    /// Revokes every token issued to `principal_id` up to now
    pub async fn revoke_all_for_principal(&self, principal_id: Uuid) -> StoreResult<()> {
        let now = Utc::now().timestamp().to_string();
        self.store()?
            .set_ex(
                &principal_key(principal_id),
                now.as_bytes(),
                PRINCIPAL_REVOCATION_TTL,
            )
            .await?;

        tracing::info!(principal_id = %principal_id, "Revoked all tokens for principal");
        Ok(())
    }

    /// Whether `token` was revoked individually
    pub async fn is_token_revoked(&self, token: &str) -> bool {
        let Some(store) = &self.store else { return false };
        match store.get(&token_key(token)).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!(error = %e, "Token blacklist check failed, allowing token");
                false
            }
        }
    }

    /// Unix timestamp of the last principal-wide revocation
    pub async fn revoked_at(&self, principal_id: Uuid) -> Option<i64> {
        let store = self.store.as_ref()?;
        match store.get(&principal_key(principal_id)).await {
            Ok(Some(raw)) => std::str::from_utf8(&raw).ok()?.parse().ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(principal_id = %principal_id, error = %e, "Revocation time lookup failed");
                None
            }
        }
    }

    /// Both checks for a validated token
    pub async fn is_revoked(&self, token: &str, claims: &Claims) -> bool {
        if self.is_token_revoked(token).await {
            return true;
        }
        matches!(self.revoked_at(claims.sub).await, Some(at) if claims.iat < at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenType;
    use crate::store::MemoryStore;

    fn claims_issued(iat: i64) -> Claims {
        let mut claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), "staff", false, TokenType::Access);
        claims.iat = iat;
        claims
    }

    #[tokio::test]
    async fn test_revoke_single_token() {
        let revocation = TokenRevocation::new(Some(Arc::new(MemoryStore::new())));
        let claims = claims_issued(Utc::now().timestamp());

        assert!(!revocation.is_revoked("tok", &claims).await);
        revocation
            .revoke_token("tok", Utc::now() + chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert!(revocation.is_revoked("tok", &claims).await);
        assert!(!revocation.is_revoked("other", &claims).await);
    }

    #[tokio::test]
    async fn test_expired_token_is_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let revocation = TokenRevocation::new(Some(store.clone()));

        revocation
            .revoke_token("tok", Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_principal_wide_revocation_rejects_older_tokens() {
        let revocation = TokenRevocation::new(Some(Arc::new(MemoryStore::new())));
        let old = claims_issued(Utc::now().timestamp() - 60);
        let mut newer = claims_issued(Utc::now().timestamp() + 60);
        newer.sub = old.sub;

        revocation.revoke_all_for_principal(old.sub).await.unwrap();

        assert!(revocation.is_revoked("a", &old).await);
        assert!(!revocation.is_revoked("b", &newer).await);
    }

    #[tokio::test]
    async fn test_checks_fail_open() {
        let store = Arc::new(MemoryStore::new());
        let revocation = TokenRevocation::new(Some(store.clone()));
        let claims = claims_issued(0);
        revocation.revoke_all_for_principal(claims.sub).await.unwrap();

        store.set_available(false);
        assert!(!revocation.is_revoked("tok", &claims).await);
        assert!(revocation.revoke_all_for_principal(claims.sub).await.is_err());

        let without_store = TokenRevocation::new(None);
        assert!(!without_store.is_revoked("tok", &claims).await);
    }

    #[test]
    fn test_token_key_hides_token() {
        let key = token_key("secret.jwt.value");
        assert!(key.starts_with("token_blacklist:"));
        assert!(!key.contains("secret"));
        assert_eq!(key.len(), "token_blacklist:".len() + 64);
    }
}
