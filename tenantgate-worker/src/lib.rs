//! # TenantGate Worker Library
//!
//! Periodic background jobs coordinated across replicas through the shared
//! store.
//!
//! ## Modules
//!
//! - `config`: scheduler configuration
//! - `coordination`: choice of the store behind scheduler locks
//! - `scheduler`: [`scheduler::PeriodicJob`] and the lock-guarded runner
//! - `jobs`: trial expiration and retention sweeps

pub mod config;
pub mod coordination;
pub mod jobs;
pub mod scheduler;
