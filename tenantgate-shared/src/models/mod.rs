/// Rows owned by the shared (public) partition
///
/// - `tenant`: tenants, their partition and trial/subscription state
/// - `principal`: users bound to one tenant
/// - `api_key`: tenant-scoped integration keys
///
/// Grants live behind [`crate::authz::GrantRepository`]; audit rows behind
/// [`crate::audit::AuditSink`].

pub mod api_key;
pub mod principal;
pub mod tenant;

pub use api_key::{ApiKey, CreateApiKey};
pub use principal::{CreatePrincipal, Principal};
pub use tenant::{CreateTenant, SubscriptionStatus, Tenant, TrialStats};
