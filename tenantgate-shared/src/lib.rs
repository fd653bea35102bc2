//! # TenantGate Shared Library
//!
//! Tenant isolation and cross-replica coordination for a multi-tenant
//! service running as several stateless replicas behind a load balancer.
//!
//! ## Module Organization
//!
//! - `store`: shared key-value store abstraction (Redis and in-memory)
//! - `tenancy`: tenant to partition resolution and per-session `search_path`
//! - `context`: strongly typed per-request context
//! - `authz`: module/action permission engine and fail-closed gate
//! - `cache`: distributed read-through cache with write-behind
//! - `ratelimit`: distributed rate limiter with a per-replica fallback
//! - `lock`: scheduler coordination locks
//! - `audit`: non-blocking audit trail
//! - `auth`: JWT, API keys and token revocation
//! - `models`: tenant, principal and API key records
//! - `db`: connection pool and migrations
//! - `error`: error taxonomy

pub mod audit;
pub mod auth;
pub mod authz;
pub mod cache;
pub mod context;
pub mod db;
pub mod error;
pub mod lock;
pub mod models;
pub mod ratelimit;
pub mod store;
pub mod tenancy;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::{CoreError, CoreResult};

/// Current version of the TenantGate shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
