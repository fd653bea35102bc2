/// API route handlers
///
/// - `health`: liveness, dependency status and request counter
/// - `metrics`: Prometheus scrape endpoint
/// - `permissions`: permission introspection and grant management

pub mod health;
pub mod metrics;
pub mod permissions;
