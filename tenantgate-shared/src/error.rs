/// Error taxonomy for the tenant-isolation and coordination core
///
/// Every component in this crate reports failures through [`CoreError`] at its
/// public boundary. The variants map one-to-one onto the categories callers
/// need to react to differently:
///
/// | Variant | Meaning | Typical HTTP mapping |
/// |---------|---------|----------------------|
/// | `Validation` | Malformed input, rejected before anything is applied | 400 |
/// | `NotFound` | Resource or principal absent | 404 |
/// | `Authorization` | Permission denied (always fail-closed) | 403 |
/// | `Infrastructure` | Database or shared store unreachable / timed out | 503 / 500 |
/// | `Conflict` | Concurrent mutation conflict, caller may retry | 409 |
///
/// Infrastructure failures in optimization layers (cache, rate limiter) are
/// absorbed inside those components and never reach this type. Failures in
/// integrity-critical layers (permission evaluation, scheduler locks) are
/// either surfaced as `Infrastructure` or translated to a safe default.

use thiserror::Error;

/// Result alias used across the core
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// Input failed validation (bad partition name, malformed identifiers)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Resource or principal does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Principal is not allowed to perform `action` on `module`
    #[error("Permission denied: {action} on {module}")]
    Authorization { module: String, action: String },

    /// Database or shared store failure
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// Concurrent modification conflict
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    /// Builds an authorization error for a module/action pair
    pub fn denied(module: impl Into<String>, action: impl Into<String>) -> Self {
        CoreError::Authorization {
            module: module.into(),
            action: action.into(),
        }
    }

    /// Whether the error came from an unreachable or failing dependency
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, CoreError::Infrastructure(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    return CoreError::Conflict(format!("Constraint violation: {}", constraint));
                }
                // 40001 = serialization_failure, 40P01 = deadlock_detected
                match db_err.code().as_deref() {
                    Some("40001") | Some("40P01") => {
                        CoreError::Conflict(format!("Concurrent update: {}", db_err))
                    }
                    _ => CoreError::Infrastructure(format!("Database error: {}", db_err)),
                }
            }
            other => CoreError::Infrastructure(format!("Database error: {}", other)),
        }
    }
}

impl From<crate::store::StoreError> for CoreError {
    fn from(err: crate::store::StoreError) -> Self {
        CoreError::Infrastructure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_display() {
        let err = CoreError::denied("patients", "delete");
        assert_eq!(err.to_string(), "Permission denied: delete on patients");
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_pool_timeout_maps_to_infrastructure() {
        let err: CoreError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_infrastructure());
    }
}
