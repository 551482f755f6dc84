//! Connect auth service configuration.
//!
//! Configuration is loaded from environment variables and validated up front
//! so a bad deployment fails at startup instead of on the first request.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Atlassian's public install-key service.
pub const DEFAULT_INSTALL_KEYS_URL: &str = "https://connect-install-keys.atlassian.com";

/// Default clock leeway applied to `exp`, in seconds.
pub const DEFAULT_JWT_LEEWAY_SECONDS: u64 = 3;

/// Upper bound on the configurable leeway.
pub const MAX_JWT_LEEWAY_SECONDS: u64 = 60;

/// Default install-key cache TTL (10 minutes).
pub const DEFAULT_PUBLIC_KEY_CACHE_TTL_SECONDS: u64 = 600;

pub const MAX_PUBLIC_KEY_CACHE_TTL_SECONDS: u64 = 3600;

pub const DEFAULT_PUBLIC_KEY_CACHE_CAPACITY: usize = 32;

pub const DEFAULT_PUBLIC_KEY_FETCH_TIMEOUT_MS: u64 = 3000;

pub const DEFAULT_PUBLIC_KEY_RETRY_BACKOFF_MS: u64 = 250;

pub const MAX_PUBLIC_KEY_RETRY_BACKOFF_MS: u64 = 5000;

pub const DEFAULT_TENANT_LOOKUP_TIMEOUT_MS: u64 = 2000;

/// Connect auth service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Public base URL of this app, as registered in its Connect descriptor.
    /// Stored without a trailing slash. Lifecycle tokens must list it in `aud`.
    pub app_base_url: String,

    /// Base URL of the Atlassian install-key service (no trailing slash).
    pub install_keys_url: String,

    /// Leeway applied to `exp` checks, in seconds.
    pub jwt_leeway_seconds: u64,

    pub public_key_cache_ttl_seconds: u64,

    pub public_key_cache_capacity: usize,

    /// Per-attempt timeout for an install-key fetch.
    pub public_key_fetch_timeout_ms: u64,

    /// Delay before the single retry of a transient install-key failure.
    pub public_key_retry_backoff_ms: u64,

    pub tenant_lookup_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid JWT leeway configuration: {0}")]
    InvalidLeeway(String),

    #[error("Invalid public key cache configuration: {0}")]
    InvalidKeyCache(String),

    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeout(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let app_base_url = vars
            .get("APP_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("APP_BASE_URL".to_string()))?;
        let app_base_url = validate_http_url("APP_BASE_URL", app_base_url)?;

        let install_keys_url = validate_http_url(
            "CONNECT_INSTALL_KEYS_URL",
            vars.get("CONNECT_INSTALL_KEYS_URL")
                .map(String::as_str)
                .unwrap_or(DEFAULT_INSTALL_KEYS_URL),
        )?;

        let jwt_leeway_seconds = parse_u64(vars, "JWT_LEEWAY_SECONDS", DEFAULT_JWT_LEEWAY_SECONDS)
            .map_err(ConfigError::InvalidLeeway)?;
        if jwt_leeway_seconds > MAX_JWT_LEEWAY_SECONDS {
            return Err(ConfigError::InvalidLeeway(format!(
                "JWT_LEEWAY_SECONDS must not exceed {} seconds, got {}",
                MAX_JWT_LEEWAY_SECONDS, jwt_leeway_seconds
            )));
        }

        let public_key_cache_ttl_seconds = parse_u64(
            vars,
            "PUBLIC_KEY_CACHE_TTL_SECONDS",
            DEFAULT_PUBLIC_KEY_CACHE_TTL_SECONDS,
        )
        .map_err(ConfigError::InvalidKeyCache)?;
        if public_key_cache_ttl_seconds == 0
            || public_key_cache_ttl_seconds > MAX_PUBLIC_KEY_CACHE_TTL_SECONDS
        {
            return Err(ConfigError::InvalidKeyCache(format!(
                "PUBLIC_KEY_CACHE_TTL_SECONDS must be between 1 and {}, got {}",
                MAX_PUBLIC_KEY_CACHE_TTL_SECONDS, public_key_cache_ttl_seconds
            )));
        }

        let public_key_cache_capacity = parse_u64(
            vars,
            "PUBLIC_KEY_CACHE_CAPACITY",
            DEFAULT_PUBLIC_KEY_CACHE_CAPACITY as u64,
        )
        .map_err(ConfigError::InvalidKeyCache)?;
        if public_key_cache_capacity == 0 {
            return Err(ConfigError::InvalidKeyCache(
                "PUBLIC_KEY_CACHE_CAPACITY must be greater than 0".to_string(),
            ));
        }
        let public_key_cache_capacity = usize::try_from(public_key_cache_capacity)
            .map_err(|e| ConfigError::InvalidKeyCache(format!("PUBLIC_KEY_CACHE_CAPACITY: {e}")))?;

        let public_key_fetch_timeout_ms = positive_timeout(
            vars,
            "PUBLIC_KEY_FETCH_TIMEOUT_MS",
            DEFAULT_PUBLIC_KEY_FETCH_TIMEOUT_MS,
        )?;

        let public_key_retry_backoff_ms = parse_u64(
            vars,
            "PUBLIC_KEY_RETRY_BACKOFF_MS",
            DEFAULT_PUBLIC_KEY_RETRY_BACKOFF_MS,
        )
        .map_err(ConfigError::InvalidTimeout)?;
        if public_key_retry_backoff_ms > MAX_PUBLIC_KEY_RETRY_BACKOFF_MS {
            return Err(ConfigError::InvalidTimeout(format!(
                "PUBLIC_KEY_RETRY_BACKOFF_MS must not exceed {}, got {}",
                MAX_PUBLIC_KEY_RETRY_BACKOFF_MS, public_key_retry_backoff_ms
            )));
        }

        let tenant_lookup_timeout_ms = positive_timeout(
            vars,
            "TENANT_LOOKUP_TIMEOUT_MS",
            DEFAULT_TENANT_LOOKUP_TIMEOUT_MS,
        )?;

        Ok(Config {
            bind_address,
            app_base_url,
            install_keys_url,
            jwt_leeway_seconds,
            public_key_cache_ttl_seconds,
            public_key_cache_capacity,
            public_key_fetch_timeout_ms,
            public_key_retry_backoff_ms,
            tenant_lookup_timeout_ms,
        })
    }

    pub fn jwt_leeway(&self) -> Duration {
        Duration::from_secs(self.jwt_leeway_seconds)
    }

    pub fn public_key_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.public_key_cache_ttl_seconds)
    }

    pub fn public_key_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.public_key_fetch_timeout_ms)
    }

    pub fn public_key_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.public_key_retry_backoff_ms)
    }

    pub fn tenant_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.tenant_lookup_timeout_ms)
    }
}

fn parse_u64(vars: &HashMap<String, String>, name: &str, default: u64) -> Result<u64, String> {
    match vars.get(name) {
        Some(value_str) => value_str.parse().map_err(|e| {
            format!(
                "{} must be a valid non-negative integer, got '{}': {}",
                name, value_str, e
            )
        }),
        None => Ok(default),
    }
}

fn positive_timeout(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = parse_u64(vars, name, default).map_err(ConfigError::InvalidTimeout)?;
    if value == 0 {
        return Err(ConfigError::InvalidTimeout(format!(
            "{} must be greater than 0",
            name
        )));
    }
    Ok(value)
}

/// Require an absolute http(s) URL with a host; returns it without a trailing slash.
fn validate_http_url(name: &str, value: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("{} is not a valid URL: {}", name, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must use http or https, got '{}'",
            name,
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!("{} must have a host", name)));
    }

    Ok(value.trim_end_matches('/').to_string())
}
