//! Crate-level error types
//!
//! Subsystems keep their own focused error enums ([`crate::cache::CacheError`],
//! [`crate::config::ConfigError`], [`crate::resilience::CircuitBreakerError`]);
//! this type aggregates them for callers wiring the whole stack together at
//! startup.

use thiserror::Error;

/// Top-level error for initialization and cross-subsystem call sites
#[derive(Debug, Error)]
pub enum TradenavError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    #[error("circuit breaker for '{service}' rejected the call")]
    CircuitOpen { service: String },

    #[error("operation timed out after {attempts} attempts against '{service}'")]
    Timeout { service: String, attempts: u32 },

    #[error("external operation failed: {0}")]
    Operation(String),
}

/// Convenient Result alias for fallible startup paths
pub type TradenavResult<T> = Result<T, TradenavError>;

impl<E: std::error::Error> From<crate::resilience::CircuitBreakerError<E>> for TradenavError {
    fn from(err: crate::resilience::CircuitBreakerError<E>) -> Self {
        use crate::resilience::CircuitBreakerError;
        match err {
            CircuitBreakerError::CircuitOpen { service } => Self::CircuitOpen { service },
            CircuitBreakerError::Timeout { service, attempts } => {
                Self::Timeout { service, attempts }
            }
            CircuitBreakerError::OperationFailed(e) => Self::Operation(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;

    #[test]
    fn test_error_display() {
        let err = TradenavError::CircuitOpen {
            service: "comtrade".to_string(),
        };
        assert!(err.to_string().contains("comtrade"));
    }

    #[test]
    fn test_from_cache_error() {
        let err: TradenavError = CacheError::ConnectionError("refused".to_string()).into();
        assert!(matches!(err, TradenavError::Cache(_)));
    }
}
