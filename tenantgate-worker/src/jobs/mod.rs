/// Periodic jobs run by the worker
///
/// - [`TrialExpirationJob`]: deactivates tenants whose trial has ended
/// - [`RetentionJob`]: purges replaced grants and reports aged audit records

pub mod retention;
pub mod trial_expiration;

pub use retention::RetentionJob;
pub use trial_expiration::TrialExpirationJob;
