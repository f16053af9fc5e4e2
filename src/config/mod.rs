//! # Configuration
//!
//! Environment-derived configuration, read and validated once at startup.
//! A `.env` file is loaded automatically when present (dotenvy).
//!
//! ## Environment variables
//!
//! Cache:
//! - `CACHE_BACKEND` - "redis", "memory", or "disabled" (default "memory")
//! - `CACHE_DEFAULT_TTL_SECONDS` - default entry TTL (default 3600)
//! - `CACHE_INVALIDATION_CHANNEL` - pub/sub channel name
//! - `REDIS_URL` - distributed store connection URL
//!
//! Circuit breaker defaults:
//! - `CIRCUIT_BREAKER_FAILURE_THRESHOLD`
//! - `CIRCUIT_BREAKER_RESET_TIMEOUT_MS`
//! - `CIRCUIT_BREAKER_HALF_OPEN_SUCCESS_THRESHOLD`
//! - `CIRCUIT_BREAKER_MAX_RETRIES`
//! - `CIRCUIT_BREAKER_RETRY_DELAY_MS`
//! - `CIRCUIT_BREAKER_TIMEOUT_MS`
//!
//! Per-service overrides, for each service name passed to
//! [`TradenavConfig::from_env`] (name uppercased, non-alphanumerics mapped
//! to `_`):
//! - `<SERVICE>_API_FAILURE_THRESHOLD`
//! - `<SERVICE>_API_RESET_TIMEOUT_MS`
//! - `<SERVICE>_API_MAX_RETRIES`

use crate::resilience::config::{CircuitBreakerConfig, ResilienceConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that failed to parse
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },

    /// A loaded configuration failed validation
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Connection settings for the distributed cache store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL (credentials are redacted in logs)
    pub url: String,
}

/// Cache subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch; false routes everything to the no-op backend
    pub enabled: bool,

    /// Backend selector: "redis" or "memory"
    pub backend: String,

    /// TTL applied when a caller does not specify one
    pub default_ttl: Duration,

    /// Distributed store settings, required for the redis backend
    pub redis: Option<RedisConfig>,

    /// Pub/sub channel for cross-instance invalidation broadcast
    pub invalidation_channel: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: "memory".to_string(),
            default_ttl: Duration::from_secs(3600),
            redis: None,
            invalidation_channel: "tradenav:cache:invalidate".to_string(),
        }
    }
}

impl CacheConfig {
    /// Validate cache configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl.is_zero() {
            return Err("cache default_ttl must be greater than 0".to_string());
        }

        if self.invalidation_channel.is_empty() {
            return Err("invalidation_channel must not be empty".to_string());
        }

        if self.enabled && self.backend == "redis" && self.redis.is_none() {
            // Not fatal: the provider degrades to the in-memory backend,
            // but flag it here so misconfiguration is visible at startup.
            debug!("redis backend selected without REDIS_URL, provider will degrade");
        }

        Ok(())
    }
}

/// Top-level configuration for the invocation core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradenavConfig {
    pub resilience: ResilienceConfig,
    pub cache: CacheConfig,
}

impl TradenavConfig {
    /// Load configuration from the environment, validated
    ///
    /// `services` lists the service names eligible for per-service circuit
    /// breaker overrides (e.g. `["exchange_rates", "comtrade", "shippo"]`).
    pub fn from_env(services: &[&str]) -> Result<Self, ConfigError> {
        // Load .env if present; real environment always wins
        dotenvy::dotenv().ok();

        let config = Self {
            resilience: load_resilience_config(services)?,
            cache: load_cache_config()?,
        };

        config
            .resilience
            .validate()
            .map_err(ConfigError::Validation)?;
        config.cache.validate().map_err(ConfigError::Validation)?;

        Ok(config)
    }
}

fn load_cache_config() -> Result<CacheConfig, ConfigError> {
    let backend =
        std::env::var("CACHE_BACKEND").unwrap_or_else(|_| "memory".to_string());
    let enabled = backend != "disabled";

    let default_ttl = env_u64("CACHE_DEFAULT_TTL_SECONDS")?
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(3600));

    let redis = std::env::var("REDIS_URL")
        .ok()
        .map(|url| RedisConfig { url });

    let invalidation_channel = std::env::var("CACHE_INVALIDATION_CHANNEL")
        .unwrap_or_else(|_| "tradenav:cache:invalidate".to_string());

    Ok(CacheConfig {
        enabled,
        backend: if enabled { backend } else { "memory".to_string() },
        default_ttl,
        redis,
        invalidation_channel,
    })
}

fn load_resilience_config(services: &[&str]) -> Result<ResilienceConfig, ConfigError> {
    let mut default_config = CircuitBreakerConfig::default();

    if let Some(v) = env_u32("CIRCUIT_BREAKER_FAILURE_THRESHOLD")? {
        default_config.failure_threshold = v;
    }
    if let Some(v) = env_u64("CIRCUIT_BREAKER_RESET_TIMEOUT_MS")? {
        default_config.reset_timeout = Duration::from_millis(v);
    }
    if let Some(v) = env_u32("CIRCUIT_BREAKER_HALF_OPEN_SUCCESS_THRESHOLD")? {
        default_config.half_open_success_threshold = v;
    }
    if let Some(v) = env_u32("CIRCUIT_BREAKER_MAX_RETRIES")? {
        default_config.max_retries = v;
    }
    if let Some(v) = env_u64("CIRCUIT_BREAKER_RETRY_DELAY_MS")? {
        default_config.retry_delay = Duration::from_millis(v);
    }
    if let Some(v) = env_u64("CIRCUIT_BREAKER_TIMEOUT_MS")? {
        default_config.timeout = Duration::from_millis(v);
    }

    let mut resilience = ResilienceConfig {
        default_config,
        service_configs: Default::default(),
    };

    for service in services {
        if let Some(config) = load_service_override(service, &resilience.default_config)? {
            debug!(service = service, "Loaded per-service circuit breaker override");
            resilience
                .service_configs
                .insert((*service).to_string(), config);
        }
    }

    Ok(resilience)
}

/// Per-service overrides use the service name as an env prefix:
/// `comtrade` reads `COMTRADE_API_FAILURE_THRESHOLD` and friends.
fn load_service_override(
    service: &str,
    defaults: &CircuitBreakerConfig,
) -> Result<Option<CircuitBreakerConfig>, ConfigError> {
    let prefix = env_prefix(service);

    let failure_threshold = env_u32(&format!("{prefix}_API_FAILURE_THRESHOLD"))?;
    let reset_timeout_ms = env_u64(&format!("{prefix}_API_RESET_TIMEOUT_MS"))?;
    let max_retries = env_u32(&format!("{prefix}_API_MAX_RETRIES"))?;

    if failure_threshold.is_none() && reset_timeout_ms.is_none() && max_retries.is_none() {
        return Ok(None);
    }

    let mut config = defaults.clone();
    if let Some(v) = failure_threshold {
        config.failure_threshold = v;
    }
    if let Some(v) = reset_timeout_ms {
        config.reset_timeout = Duration::from_millis(v);
    }
    if let Some(v) = max_retries {
        config.max_retries = v;
    }

    Ok(Some(config))
}

fn env_prefix(service: &str) -> String {
    service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn env_u32(var: &str) -> Result<Option<u32>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_u64(var: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
