/// Database layer
///
/// - `pool`: PostgreSQL connection pool with health checks
/// - `migrations`: migration runner for the shared partition
///
/// Row types live in [`crate::models`].

pub mod migrations;
pub mod pool;

pub use pool::{create_lazy_pool, create_pool, health_check, DatabaseConfig};
