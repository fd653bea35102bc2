/// Redis-backed [`SharedStore`]
///
/// Wraps `redis::aio::ConnectionManager`, which reconnects automatically after
/// a dropped connection. Every command is bounded by
/// [`StoreConfig::command_timeout_secs`] so a slow store degrades latency
/// instead of hanging the request.
///
/// # Example
///
/// ```no_run
/// use tenantgate_shared::store::{RedisStore, SharedStore, StoreConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = StoreConfig::from_env()?;
/// let store = RedisStore::connect(config).await?;
/// store.ping().await?;
/// # Ok(())
/// # }
/// ```

use super::{SharedStore, StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Increment, and set the expiry only when the counter was just created.
///
/// Runs as a single script so concurrent replicas never observe a counter
/// without an expiry.
const INCR_WITH_EXPIRY_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Keys deleted per `DEL` during prefix invalidation
const SCAN_BATCH: usize = 100;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            StoreError::Unavailable(err.to_string())
        } else if err.is_timeout() {
            StoreError::Timeout(Duration::ZERO)
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    ///
    /// Format: redis://[username:password@]host:port[/db]
    pub url: String,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Per-command timeout in seconds
    pub command_timeout_secs: u64,
}

impl StoreConfig {
    /// Loads the configuration from environment variables
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: connection URL (required)
    /// - `REDIS_CONNECTION_TIMEOUT_SECS`: connection timeout (default: 5)
    /// - `REDIS_COMMAND_TIMEOUT_SECS`: command timeout (default: 3)
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if `REDIS_URL` is not set.
    pub fn from_env() -> Result<Self, StoreError> {
        dotenvy::dotenv().ok();

        let url = env::var("REDIS_URL").map_err(|_| {
            StoreError::Config("REDIS_URL environment variable is required".to_string())
        })?;

        Ok(Self {
            url,
            connection_timeout_secs: parse_env("REDIS_CONNECTION_TIMEOUT_SECS", 5),
            command_timeout_secs: parse_env("REDIS_COMMAND_TIMEOUT_SECS", 3),
        })
    }

    /// Builds a configuration for a URL with default timeouts
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout_secs: 5,
            command_timeout_secs: 3,
        }
    }
}

fn parse_env(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Redis implementation of [`SharedStore`]
///
/// Cheap to clone; clones share the underlying connection manager.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    config: Arc<StoreConfig>,
    incr_script: Arc<Script>,
}

impl RedisStore {
    /// Connects to Redis
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection fails
    /// within `connection_timeout_secs`.
    pub async fn connect(config: StoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Config(format!("Invalid Redis URL: {}", e)))?;

        let connect_timeout = Duration::from_secs(config.connection_timeout_secs);
        let manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))?
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(url = %sanitize_url(&config.url), "Shared store connected");

        Ok(Self {
            manager,
            config: Arc::new(config),
            incr_script: Arc::new(Script::new(INCR_WITH_EXPIRY_SCRIPT)),
        })
    }

    /// Gets the store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    /// Runs a command future under the configured timeout
    async fn bounded<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        let limit = self.command_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let pong: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Command(format!("Unexpected PING reply: {}", pong)))
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = self.bounded(conn.get(key)).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let millis = ttl_millis(ttl);
        self.bounded(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis)
                .query_async::<_, ()>(&mut conn),
        )
        .await
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let millis = ttl_millis(ttl);
        // SET NX replies OK when the key was created and nil otherwise
        let reply: Option<String> = self
            .bounded(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(millis)
                    .query_async(&mut conn),
            )
            .await?;

        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = self.bounded(conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}:*", escape_glob(prefix));
        let mut removed: u64 = 0;
        let mut cursor: u64 = 0;

        if self.del(prefix).await? {
            removed += 1;
        }

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let count: i64 = self.bounded(conn.del(&keys)).await?;
                removed += count.max(0) as u64;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(prefix = %prefix, removed, "Deleted keys by prefix");
        Ok(removed)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let mut conn = self.manager.clone();
        let mut invocation = self.incr_script.key(key);
        invocation.arg(ttl_millis(ttl));
        self.bounded(invocation.invoke_async(&mut conn)).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.manager.clone();
        // PTTL: -2 = missing key, -1 = no expiry
        let millis: i64 = self
            .bounded(redis::cmd("PTTL").arg(key).query_async(&mut conn))
            .await?;

        if millis > 0 {
            Ok(Some(Duration::from_millis(millis as u64)))
        } else {
            Ok(None)
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Escapes glob metacharacters so a prefix is matched literally by `SCAN MATCH`
fn escape_glob(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Removes credentials from a Redis URL for logging
fn sanitize_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end + 3];
            let host = &url[at_pos + 1..];
            return format!("{}***:***@{}", scheme, host);
        }
    }
    url.to_string()
}
