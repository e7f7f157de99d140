//! Server configuration module
//! Handles dynamic configuration parameters for the chat relay

use crate::constants::{
    DEFAULT_ACCESS_TOKEN_MINUTES, DEFAULT_GROUP_MESSAGE_RATE_LIMIT, DEFAULT_HOST,
    DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_MEDIA_DIR, DEFAULT_MESSAGE_RATE_LIMIT, DEFAULT_PORT, DEFAULT_RATE_WINDOW_SECS, DEFAULT_REDIS_URL,
    DEFAULT_REFRESH_TOKEN_DAYS,
};
use crate::error::{Result, RustyRelayError};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which broker and counter store backs cross-instance coordination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    /// Shared Redis pub/sub and INCR counters (multi-instance)
    Redis,
    /// In-process broadcast channel and counters (single instance only)
    Memory,
}

impl BrokerBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(RustyRelayError::ConfigError(format!(
                "Unknown broker backend '{}', expected 'redis' or 'memory'",
                other
            ))),
        }
    }
}

/// Quota for one rate-limited action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub broker_backend: BrokerBackend,
    /// JWT secret for token signing/validation
    pub jwt_secret: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    /// Quota for direct messages
    pub message_rate_limit: RateLimitPolicy,
    /// Quota for group messages, counted separately from direct messages
    pub group_message_rate_limit: RateLimitPolicy,
    /// Where uploaded images are written and served from
    pub media_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// TLS configuration
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub enable_tls: bool,
}

impl ServerConfig {
    /// Create a test configuration - DANGEROUS: Only for testing!
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            broker_backend: BrokerBackend::Memory,
            jwt_secret: "test-jwt-secret-only-for-unit-tests-never-use-in-production".to_string(),
            access_token_ttl: chrono::Duration::minutes(DEFAULT_ACCESS_TOKEN_MINUTES),
            refresh_token_ttl: chrono::Duration::days(DEFAULT_REFRESH_TOKEN_DAYS),
            message_rate_limit: RateLimitPolicy::new(
                DEFAULT_MESSAGE_RATE_LIMIT,
                Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            ),
            group_message_rate_limit: RateLimitPolicy::new(
                DEFAULT_GROUP_MESSAGE_RATE_LIMIT,
                Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            ),
            media_dir: env::temp_dir().join("rusty-relay-media"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            tls_cert_path: None,
            tls_key_path: None,
            enable_tls: false,
        }
    }

    /// Validate that a secret meets security requirements
    fn validate_jwt_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(RustyRelayError::ConfigError(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // Check for insecure default or example values
        let insecure_patterns = ["your-secret-key", "change-this", "changeme", "test-secret", "12345"];
        for pattern in &insecure_patterns {
            if secret.contains(pattern) {
                return Err(RustyRelayError::ConfigError(format!(
                    "JWT secret contains insecure pattern '{}'. Generate one with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        Ok(())
    }

    fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn flag(name: &str) -> bool {
        env::var(name)
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = env::var("RUSTY_RELAY_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = Self::parse_var("RUSTY_RELAY_PORT", DEFAULT_PORT);

        let redis_url = env::var("RUSTY_RELAY_REDIS_URL")
            .or_else(|_| env::var("REDIS_URL"))
            .unwrap_or(DEFAULT_REDIS_URL.to_string());

        let broker_backend = match env::var("RUSTY_RELAY_BROKER") {
            Ok(value) => BrokerBackend::parse(&value)?,
            Err(_) => BrokerBackend::Redis,
        };

        let jwt_secret = env::var("RUSTY_RELAY_JWT_SECRET")
            .or_else(|_| env::var("JWT_SECRET"))
            .map_err(|_| {
                RustyRelayError::ConfigError(
                    "JWT_SECRET environment variable is required. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;

        let access_minutes = Self::parse_var("RUSTY_RELAY_ACCESS_TOKEN_MINUTES", DEFAULT_ACCESS_TOKEN_MINUTES);
        let refresh_days = Self::parse_var("RUSTY_RELAY_REFRESH_TOKEN_DAYS", DEFAULT_REFRESH_TOKEN_DAYS);

        let window = Duration::from_secs(Self::parse_var(
            "RUSTY_RELAY_RATE_WINDOW_SECS",
            DEFAULT_RATE_WINDOW_SECS,
        ));
        let message_limit = Self::parse_var("RUSTY_RELAY_MESSAGE_RATE_LIMIT", DEFAULT_MESSAGE_RATE_LIMIT);
        let group_limit = Self::parse_var(
            "RUSTY_RELAY_GROUP_MESSAGE_RATE_LIMIT",
            DEFAULT_GROUP_MESSAGE_RATE_LIMIT,
        );

        let media_dir = PathBuf::from(
            env::var("RUSTY_RELAY_MEDIA_DIR").unwrap_or(DEFAULT_MEDIA_DIR.to_string()),
        );
        let max_upload_bytes = Self::parse_var("RUSTY_RELAY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES);

        // TLS configuration
        let enable_tls = Self::flag("RUSTY_RELAY_ENABLE_TLS");
        let tls_cert_path = env::var("RUSTY_RELAY_TLS_CERT_PATH").ok();
        let tls_key_path = env::var("RUSTY_RELAY_TLS_KEY_PATH").ok();

        if enable_tls {
            match (&tls_cert_path, &tls_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    if !std::path::Path::new(cert_path).exists() {
                        return Err(RustyRelayError::ConfigError(format!(
                            "TLS certificate file does not exist: {}",
                            cert_path
                        )));
                    }
                    if !std::path::Path::new(key_path).exists() {
                        return Err(RustyRelayError::ConfigError(format!(
                            "TLS private key file does not exist: {}",
                            key_path
                        )));
                    }
                }
                _ => {
                    return Err(RustyRelayError::ConfigError(
                        "TLS is enabled but RUSTY_RELAY_TLS_CERT_PATH or RUSTY_RELAY_TLS_KEY_PATH is not set"
                            .to_string(),
                    ))
                }
            }
        }

        Self::validate_jwt_secret(&jwt_secret)?;

        Ok(Self {
            host,
            port,
            redis_url,
            broker_backend,
            jwt_secret,
            access_token_ttl: chrono::Duration::minutes(access_minutes),
            refresh_token_ttl: chrono::Duration::days(refresh_days),
            message_rate_limit: RateLimitPolicy::new(message_limit, window),
            group_message_rate_limit: RateLimitPolicy::new(group_limit, window),
            media_dir,
            max_upload_bytes,
            tls_cert_path,
            tls_key_path,
            enable_tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_testing_defaults() {
        let config = ServerConfig::for_testing();
        assert_eq!(config.broker_backend, BrokerBackend::Memory);
        assert_eq!(config.message_rate_limit.limit, 20);
        assert_eq!(config.message_rate_limit.window, Duration::from_secs(60));
        assert!(!config.enable_tls);
    }

    #[test]
    fn test_broker_backend_parsing() {
        assert_eq!(BrokerBackend::parse("Redis").unwrap(), BrokerBackend::Redis);
        assert_eq!(BrokerBackend::parse("memory").unwrap(), BrokerBackend::Memory);
        assert!(BrokerBackend::parse("kafka").is_err());
    }

    #[test]
    fn test_weak_secrets_rejected() {
        assert!(ServerConfig::validate_jwt_secret("short").is_err());
        assert!(ServerConfig::validate_jwt_secret("this-is-a-test-secret-that-is-long-enough").is_err());
        assert!(ServerConfig::validate_jwt_secret("Zq8!vB3#kL0@pW7$rT2%yU5^nM9&xC4*").is_ok());
    }

    #[test]
    fn test_from_env_requires_secret() {
        env::remove_var("RUSTY_RELAY_JWT_SECRET");
        env::remove_var("JWT_SECRET");

        let result = ServerConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("JWT_SECRET"));
    }
}
