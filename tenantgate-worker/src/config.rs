/// Worker configuration
///
/// Loaded through the `config` crate from an optional `worker.toml` and
/// `WORKER__*` environment variables, e.g. `WORKER__REPLICA_ID=worker-2` or
/// `WORKER__RETENTION_DAYS=365`. Intervals and lock TTLs are in seconds.
///
/// Database and shared store settings come from the same variables the API
/// uses (`DATABASE_URL`, `REDIS_URL`, ...). Without `REDIS_URL` the worker
/// only starts when `WORKER__SINGLE_REPLICA=true`.

use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

/// Audit records older than this are reported by the retention sweep
pub const DEFAULT_RETENTION_DAYS: i64 = 1825;

/// Upper bound accepted for `retention_days` (100 years)
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Name written into lock entries; defaults to `$HOSTNAME`
    #[serde(default = "default_replica_id")]
    pub replica_id: String,

    #[serde(default = "default_trial_interval")]
    pub trial_expiration_interval_secs: u64,

    #[serde(default = "default_trial_lock_ttl")]
    pub trial_expiration_lock_ttl_secs: u64,

    #[serde(default = "default_retention_interval")]
    pub retention_interval_secs: u64,

    #[serde(default = "default_retention_lock_ttl")]
    pub retention_lock_ttl_secs: u64,

    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Allows coordinating through an in-process store when `REDIS_URL` is
    /// unset. Only correct when exactly one worker runs.
    #[serde(default)]
    pub single_replica: bool,
}

fn default_replica_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4().simple()))
}

fn default_trial_interval() -> u64 {
    60 * 60
}

fn default_trial_lock_ttl() -> u64 {
    55 * 60
}

fn default_retention_interval() -> u64 {
    24 * 60 * 60
}

fn default_retention_lock_ttl() -> u64 {
    23 * 60 * 60
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            replica_id: default_replica_id(),
            trial_expiration_interval_secs: default_trial_interval(),
            trial_expiration_lock_ttl_secs: default_trial_lock_ttl(),
            retention_interval_secs: default_retention_interval(),
            retention_lock_ttl_secs: default_retention_lock_ttl(),
            retention_days: default_retention_days(),
            single_replica: false,
        }
    }
}

impl SchedulerConfig {
    /// Loads the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a source is present but holds values of the
    /// wrong type, or if a value is out of range.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let config: Self = config::Config::builder()
            .add_source(config::File::with_name("worker").required(false))
            .add_source(
                config::Environment::with_prefix("WORKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(config::ConfigError::Message(format!(
                "retention_days must be between 1 and {}, got {}",
                MAX_RETENTION_DAYS, self.retention_days
            )));
        }
        Ok(())
    }

    pub fn trial_expiration_interval(&self) -> Duration {
        Duration::from_secs(self.trial_expiration_interval_secs)
    }

    pub fn trial_expiration_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.trial_expiration_lock_ttl_secs)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }

    pub fn retention_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.retention_lock_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_keep_lock_shorter_than_interval() {
        let config = SchedulerConfig::default();
        assert_eq!(config.trial_expiration_interval(), Duration::from_secs(3600));
        assert_eq!(config.trial_expiration_lock_ttl(), Duration::from_secs(3300));
        assert!(config.retention_lock_ttl() < config.retention_interval());
        assert_eq!(config.retention_days, 1825);
        assert!(!config.replica_id.is_empty());
        assert!(!config.single_replica);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retention_days_out_of_range() {
        for days in [0, -1, MAX_RETENTION_DAYS + 1, i64::MAX] {
            let config = SchedulerConfig {
                retention_days: days,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{} days accepted", days);
        }
    }

    #[test]
    fn test_deserialize_fills_missing_fields() {
        let config: SchedulerConfig = config::Config::builder()
            .set_override("replica_id", "worker-7")
            .unwrap()
            .set_override("retention_days", 30)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.replica_id, "worker-7");
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.trial_expiration_interval_secs, 3600);
    }
}
