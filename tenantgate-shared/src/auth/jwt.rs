/// JWT issuance and validation
///
/// Tokens are signed with HS256 and identify the principal, its tenant and
/// its role. Access tokens may carry a snapshot of the principal's grants so
/// the permission gate can decide without a database round trip; the
/// snapshot is only as fresh as the token, which is why access tokens are
/// short-lived.
///
/// # Token Types
///
/// - **Access Token**: 15 minutes, used for API authentication
/// - **Refresh Token**: 7 days, exchanged for a new access token
///
/// # Example
///
/// ```
/// use tenantgate_shared::auth::jwt::{create_token, validate_access_token, Claims, TokenType};
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let secret = "your-secret-key-at-least-32-bytes-long";
/// let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), "admin", false, TokenType::Access);
/// let token = create_token(&claims, secret)?;
///
/// let validated = validate_access_token(&token, secret)?;
/// assert_eq!(validated.role, "admin");
/// # Ok(())
/// # }
/// ```

use crate::authz::PermissionSet;
use crate::context::PrincipalRef;
use crate::models::Principal;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issuer claim on every token
pub const ISSUER: &str = "tenantgate";

/// Error type for JWT operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to create token
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// Signature, issuer or format rejected
    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Access token presented where a refresh token is required, or vice versa
    #[error("Wrong token type: expected {expected}")]
    WrongType { expected: &'static str },
}

/// Token type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn default_expiration(&self) -> Duration {
        match self {
            TokenType::Access => Duration::minutes(15),
            TokenType::Refresh => Duration::days(7),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims
///
/// `sub` is the principal id. `permissions` is only present on access
/// tokens issued with a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub tenant_id: Uuid,
    pub role: String,
    #[serde(default)]
    pub super_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSet>,
    pub token_type: TokenType,
}

impl Claims {
    /// Claims with the default expiration for `token_type`
    pub fn new(
        principal_id: Uuid,
        tenant_id: Uuid,
        role: impl Into<String>,
        super_admin: bool,
        token_type: TokenType,
    ) -> Self {
        let now = Utc::now();

        Self {
            sub: principal_id,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + token_type.default_expiration()).timestamp(),
            nbf: now.timestamp(),
            tenant_id,
            role: role.into(),
            super_admin,
            permissions: None,
            token_type,
        }
    }

    pub fn for_principal(principal: &Principal, token_type: TokenType) -> Self {
        Self::new(
            principal.id,
            principal.tenant_id,
            principal.role.clone(),
            principal.is_super_admin,
            token_type,
        )
    }

    /// Overrides the expiration, counted from `iat`
    pub fn with_expiration(mut self, expires_in: Duration) -> Self {
        self.exp = self.iat + expires_in.num_seconds();
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.iat, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn principal(&self) -> PrincipalRef {
        PrincipalRef::user(self.sub, self.role.clone(), self.super_admin)
    }
}

/// Signs `claims` with HS256
///
/// # Errors
///
/// Returns `JwtError::CreateError` if encoding fails
pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret.as_bytes());

    encode(&header, claims, &key)
        .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
}

/// Validates signature, expiry, `nbf` and issuer
///
/// # Errors
///
/// `JwtError::Expired` for expired tokens, `JwtError::ValidationError` for
/// everything else
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.validate_nbf = true;

    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::ValidationError(format!("Token validation failed: {}", e)),
    })?;

    Ok(token_data.claims)
}

pub fn validate_access_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let claims = validate_token(token, secret)?;
    if claims.token_type != TokenType::Access {
        return Err(JwtError::WrongType { expected: "access" });
    }
    Ok(claims)
}

pub fn validate_refresh_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let claims = validate_token(token, secret)?;
    if claims.token_type != TokenType::Refresh {
        return Err(JwtError::WrongType { expected: "refresh" });
    }
    Ok(claims)
}

/// Issues a new access token from a refresh token
///
/// The new token carries `permissions` when given; refresh tokens never
/// carry a snapshot themselves.
pub fn refresh_access_token(
    refresh_token: &str,
    secret: &str,
    permissions: Option<PermissionSet>,
) -> Result<String, JwtError> {
    let refresh = validate_refresh_token(refresh_token, secret)?;

    let mut access = Claims::new(
        refresh.sub,
        refresh.tenant_id,
        refresh.role,
        refresh.super_admin,
        TokenType::Access,
    );
    access.permissions = permissions;

    create_token(&access, secret)
}
