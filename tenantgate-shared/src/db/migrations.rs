/// Migration runner for the shared (public) partition
///
/// Migrations under `migrations/` create the tables every replica shares:
/// tenants, principals, modules, permissions, principal grants, API keys and
/// the audit log. Tenant partitions are created at signup by
/// [`crate::tenancy::create_partition`], not by migrations.

use sqlx::postgres::PgPool;
use tracing::{debug, info, warn};

/// Migration status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Number of migrations that have been applied
    pub applied_migrations: usize,

    /// Latest applied migration version
    pub latest_version: Option<i64>,

    /// Whether every embedded migration has been applied
    pub is_up_to_date: bool,
}

/// Runs all pending migrations
///
/// # Errors
///
/// Returns an error if a migration fails or the connection is lost. A failed
/// migration is rolled back.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Starting database migrations");

    match sqlx::migrate!("./migrations").run(pool).await {
        Ok(()) => {
            info!("All database migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Migration failed");
            Err(e)
        }
    }
}

/// Reports which embedded migrations have been applied
pub async fn get_migration_status(pool: &PgPool) -> Result<MigrationStatus, sqlx::Error> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_name = '_sqlx_migrations'
        )",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        debug!("Migrations table does not exist yet");
        return Ok(MigrationStatus {
            applied_migrations: 0,
            latest_version: None,
            is_up_to_date: false,
        });
    }

    let (count, latest_version): (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), MAX(version)
         FROM _sqlx_migrations
         WHERE success = true",
    )
    .fetch_one(pool)
    .await?;

    let embedded = sqlx::migrate!("./migrations").iter().count();
    let status = summarize(count as usize, latest_version, embedded);

    debug!(
        applied_migrations = status.applied_migrations,
        latest_version = ?status.latest_version,
        embedded,
        "Migration status retrieved"
    );

    Ok(status)
}

fn summarize(applied: usize, latest_version: Option<i64>, embedded: usize) -> MigrationStatus {
    MigrationStatus {
        applied_migrations: applied,
        latest_version,
        is_up_to_date: applied >= embedded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_pending() {
        let status = summarize(2, Some(20250102000000), 4);
        assert!(!status.is_up_to_date);
        assert_eq!(status.applied_migrations, 2);
    }

    #[test]
    fn test_summarize_up_to_date() {
        assert!(summarize(4, Some(20250104000000), 4).is_up_to_date);
    }

    #[test]
    fn test_embedded_migrations_present() {
        assert!(sqlx::migrate!("./migrations").iter().count() >= 1);
    }
}
