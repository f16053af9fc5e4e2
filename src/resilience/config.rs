//! # Circuit Breaker Configuration
//!
//! Configuration structures and validation for circuit breaker behavior.
//! Defaults match the documented policy for TradeNavigator's external API
//! wrappers; per-service overrides are resolved through [`ResilienceConfig`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a single circuit (one per service name)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed state before opening the circuit
    pub failure_threshold: u32,

    /// Time to wait in Open state before allowing a probe call
    pub reset_timeout: Duration,

    /// Consecutive successes in Half-Open state required to close the circuit
    pub half_open_success_threshold: u32,

    /// Additional attempts after the first failed attempt (total = max_retries + 1)
    pub max_retries: u32,

    /// Fixed delay between retry attempts (no backoff growth)
    pub retry_delay: Duration,

    /// Per-attempt deadline; an attempt exceeding this fails with a timeout
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

impl CircuitBreakerConfig {
    /// Configuration tuned for exchange-rate API calls (fast, frequently polled)
    pub fn for_exchange_rates() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Configuration tuned for trade-data API calls (slow upstream, generous timeout)
    pub fn for_trade_data() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            timeout: Duration::from_secs(15),
            ..Default::default()
        }
    }

    /// Configuration tuned for shipping-rate API calls
    pub fn for_shipping() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(45),
            timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.half_open_success_threshold == 0 {
            return Err("half_open_success_threshold must be greater than 0".to_string());
        }

        if self.half_open_success_threshold > 50 {
            return Err("half_open_success_threshold should not exceed 50".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if self.timeout > Duration::from_secs(300) {
            return Err("timeout should not exceed 300 seconds".to_string());
        }

        if self.max_retries > 20 {
            return Err("max_retries should not exceed 20".to_string());
        }

        Ok(())
    }
}

/// Resolved resilience configuration: one default policy plus per-service overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Policy applied to services without an explicit override
    pub default_config: CircuitBreakerConfig,

    /// Per-service policy overrides, keyed by service name
    pub service_configs: HashMap<String, CircuitBreakerConfig>,
}

impl ResilienceConfig {
    /// Get the effective configuration for a service name
    ///
    /// Qualified names (`service.method`) resolve through the service prefix,
    /// so every method of a wrapped client shares its service's policy while
    /// keeping independent circuit state.
    pub fn config_for_service(&self, service: &str) -> &CircuitBreakerConfig {
        if let Some(config) = self.service_configs.get(service) {
            return config;
        }

        if let Some((prefix, _)) = service.split_once('.') {
            if let Some(config) = self.service_configs.get(prefix) {
                return config;
            }
        }

        &self.default_config
    }

    /// Validate the default policy and every override
    pub fn validate(&self) -> Result<(), String> {
        self.default_config.validate()?;

        for (service, config) in &self.service_configs {
            config
                .validate()
                .map_err(|e| format!("invalid config for service '{service}': {e}"))?;
        }

        Ok(())
    }
}
