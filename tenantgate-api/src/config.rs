/// Configuration management for the API server
///
/// Loads configuration from environment variables (and `.env` in
/// development) into a type-safe struct.
///
/// # Environment Variables
///
/// - `API_HOST`: Host to bind to (default: 0.0.0.0)
/// - `API_PORT`: Port to bind to (default: 8080)
/// - `CORS_ORIGINS`: Comma-separated allowed origins, `*` for any (default: *)
/// - `PRODUCTION`: Enables HSTS and strict CORS (default: false)
/// - `TRUSTED_PROXIES`: Comma-separated proxy IPs whose `X-Forwarded-For` is
///   honoured (default: none, the socket peer is the client)
/// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `DATABASE_MIN_CONNECTIONS`,
///   `DATABASE_ACQUIRE_TIMEOUT_SECS`: connection pool
/// - `JWT_SECRET`: Secret key for JWT signing (required, at least 32 chars)
/// - `REDIS_URL`: Shared store; without it the server runs degraded
/// - `REDIS_CONNECTION_TIMEOUT_SECS`, `REDIS_COMMAND_TIMEOUT_SECS`
///
/// # Example
///
/// ```no_run
/// use tenantgate_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use std::env;
use std::net::IpAddr;
use tenantgate_shared::db::DatabaseConfig;
use tenantgate_shared::store::{StoreConfig, StoreError};

/// Minimum length of `JWT_SECRET`
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    /// `None` when `REDIS_URL` is unset
    pub store: Option<StoreConfig>,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub production: bool,
    /// Peers allowed to report the client address in `X-Forwarded-For`
    pub trusted_proxies: Vec<IpAddr>,
}

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret key for JWT signing
    ///
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig").field("secret", &"<redacted>").finish()
    }
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `DATABASE_URL` or `JWT_SECRET` is missing
    /// - `JWT_SECRET` is shorter than 32 characters
    /// - `API_PORT` is not a valid port
    /// - `TRUSTED_PROXIES` holds something other than IP addresses
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let cors_origins = parse_origins(&env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()));
        let production = env::var("PRODUCTION")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let trusted_proxies = parse_proxies(&env::var("TRUSTED_PROXIES").unwrap_or_default())?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;
        validate_jwt_secret(&jwt_secret)?;

        let store = match StoreConfig::from_env() {
            Ok(config) => Some(config),
            Err(StoreError::Config(_)) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            api: ApiConfig {
                host,
                port,
                cors_origins,
                production,
                trusted_proxies,
            },
            database: DatabaseConfig::from_env()?,
            jwt: JwtConfig { secret: jwt_secret },
            store,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_proxies(raw: &str) -> anyhow::Result<Vec<IpAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpAddr>()
                .map_err(|_| anyhow::anyhow!("TRUSTED_PROXIES entry '{}' is not an IP address", s))
        })
        .collect()
}

fn validate_jwt_secret(secret: &str) -> anyhow::Result<()> {
    if secret.len() < MIN_JWT_SECRET_LEN {
        anyhow::bail!("JWT_SECRET must be at least {} characters long", MIN_JWT_SECRET_LEN);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address() {
        let config = Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                cors_origins: vec!["*".to_string()],
                production: false,
                trusted_proxies: Vec::new(),
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/test".to_string(),
                ..Default::default()
            },
            jwt: JwtConfig {
                secret: "test-secret-key-at-least-32-bytes-long".to_string(),
            },
            store: None,
        };

        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert!(!format!("{:?}", config.jwt).contains("test-secret"));
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins("https://a.example.com, https://b.example.com,"),
            vec!["https://a.example.com", "https://b.example.com"]
        );
        assert_eq!(parse_origins("*"), vec!["*"]);
    }

    #[test]
    fn test_parse_proxies() {
        assert_eq!(parse_proxies("").unwrap(), Vec::<IpAddr>::new());
        assert_eq!(
            parse_proxies("10.0.0.1, ::1").unwrap(),
            vec!["10.0.0.1".parse::<IpAddr>().unwrap(), "::1".parse::<IpAddr>().unwrap()]
        );
        assert!(parse_proxies("10.0.0.0/8").is_err());
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        assert!(validate_jwt_secret("short").is_err());
        assert!(validate_jwt_secret(&"x".repeat(32)).is_ok());
    }
}
