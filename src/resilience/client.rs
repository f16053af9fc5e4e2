//! # Resilient Client Wrapper
//!
//! Routes every method of an external API client through the circuit
//! breaker under a qualified name, so each method carries independent
//! circuit state (`comtrade.get_tariff_data` failing past its threshold
//! does not open `comtrade.get_hs_code_suggestions`).
//!
//! Each API client is an explicit trait, and its resilient counterpart is
//! a wrapper struct implementing the same trait with every method
//! delegated through [`ResilientClient::call`]. The wrapper is
//! behaviorally substitutable for the original: same signatures, same
//! success types, with circuit-open/timeout failures and transparent retry
//! added.
//!
//! ```
//! use std::sync::Arc;
//! use tradenav_core::resilience::{CircuitBreaker, CircuitBreakerError, ResilientClient};
//! use tradenav_core::resilience::config::ResilienceConfig;
//!
//! struct ExchangeRateClient;
//!
//! impl ExchangeRateClient {
//!     async fn get_rate(&self, base: &str, quote: &str) -> Result<f64, String> {
//!         // network call to the exchange-rate API
//!         # let _ = (base, quote);
//!         Ok(1.08)
//!     }
//! }
//!
//! struct ResilientExchangeRateClient {
//!     inner: Arc<ExchangeRateClient>,
//!     resilient: ResilientClient,
//! }
//!
//! impl ResilientExchangeRateClient {
//!     async fn get_rate(&self, base: &str, quote: &str) -> Result<f64, CircuitBreakerError<String>> {
//!         let inner = Arc::clone(&self.inner);
//!         self.resilient
//!             .call("get_rate", move || {
//!                 let inner = Arc::clone(&inner);
//!                 let (base, quote) = (base.to_string(), quote.to_string());
//!                 async move { inner.get_rate(&base, &quote).await }
//!             })
//!             .await
//!     }
//! }
//!
//! # async fn demo() {
//! let breaker = Arc::new(CircuitBreaker::new(ResilienceConfig::default()));
//! let client = ResilientExchangeRateClient {
//!     inner: Arc::new(ExchangeRateClient),
//!     resilient: ResilientClient::new(Arc::clone(&breaker), "exchange_rates"),
//! };
//! let rate = client.get_rate("USD", "EUR").await;
//! # let _ = rate;
//! # }
//! ```

use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
use std::future::Future;
use std::sync::Arc;

/// Circuit-breaker-backed call router for one external service
///
/// Holds the shared breaker registry and a service name; every call is
/// executed under `"{service}.{method}"` so methods fail independently.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    breaker: Arc<CircuitBreaker>,
    service: String,
}

impl ResilientClient {
    /// Create a router for a named service
    pub fn new(breaker: Arc<CircuitBreaker>, service: impl Into<String>) -> Self {
        Self {
            breaker,
            service: service.into(),
        }
    }

    /// The qualified circuit name for a method of this service
    ///
    /// `"{service}.{method}"`, or just `"{method}"` when the service name
    /// is empty.
    pub fn qualified_name(&self, method: &str) -> String {
        if self.service.is_empty() {
            method.to_string()
        } else {
            format!("{}.{}", self.service, method)
        }
    }

    /// Execute one client method through the circuit breaker
    ///
    /// The operation is re-invoked on retry, so it must be a `Fn` closure
    /// capturing clones of whatever it needs.
    pub async fn call<F, Fut, T, E>(
        &self,
        method: &str,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker
            .execute(&self.qualified_name(method), operation)
            .await
    }

    /// Current circuit state for one method of this service
    pub fn method_state(&self, method: &str) -> CircuitState {
        self.breaker.state(&self.qualified_name(method))
    }

    /// The underlying breaker registry
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The service name this router qualifies methods with
    pub fn service(&self) -> &str {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::config::{CircuitBreakerConfig, ResilienceConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::with_defaults(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 1,
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        }))
    }

    #[test]
    fn test_qualified_name() {
        let client = ResilientClient::new(test_breaker(), "comtrade");
        assert_eq!(client.qualified_name("get_tariff_data"), "comtrade.get_tariff_data");

        let unnamed = ResilientClient::new(test_breaker(), "");
        assert_eq!(unnamed.qualified_name("get_tariff_data"), "get_tariff_data");
    }

    #[tokio::test]
    async fn test_call_routes_through_breaker() {
        let client = ResilientClient::new(test_breaker(), "rates");

        let result = client.call("latest", || async { Ok::<_, String>(1.08) }).await;
        assert_eq!(result.unwrap(), 1.08);
        assert_eq!(client.method_state("latest"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_methods_fail_independently() {
        let client = ResilientClient::new(test_breaker(), "comtrade");

        for _ in 0..2 {
            let _ = client
                .call("get_tariff_data", || async { Err::<(), _>("upstream 500") })
                .await;
        }

        assert_eq!(client.method_state("get_tariff_data"), CircuitState::Open);
        assert_eq!(
            client.method_state("get_hs_code_suggestions"),
            CircuitState::Closed
        );

        let result = client
            .call("get_hs_code_suggestions", || async { Ok::<_, String>("8471") })
            .await;
        assert_eq!(result.unwrap(), "8471");
    }

    // Worked wrapper pattern: an API client trait and its resilient
    // counterpart implementing the same trait.
    #[async_trait]
    trait RateSource: Send + Sync {
        async fn latest(&self, base: &str) -> Result<f64, String>;
    }

    struct FlakyRateSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RateSource for FlakyRateSource {
        async fn latest(&self, _base: &str) -> Result<f64, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("connection refused".to_string())
        }
    }

    struct ResilientRateSource<C: RateSource> {
        inner: Arc<C>,
        resilient: ResilientClient,
    }

    #[async_trait]
    impl<C: RateSource + 'static> RateSource for ResilientRateSource<C> {
        async fn latest(&self, base: &str) -> Result<f64, String> {
            let inner = Arc::clone(&self.inner);
            let base = base.to_string();
            self.resilient
                .call("latest", move || {
                    let inner = Arc::clone(&inner);
                    let base = base.clone();
                    async move { inner.latest(&base).await }
                })
                .await
                .map_err(|e| e.to_string())
        }
    }

    #[tokio::test]
    async fn test_trait_wrapper_is_substitutable_and_fast_fails() {
        let flaky = Arc::new(FlakyRateSource {
            calls: AtomicU32::new(0),
        });
        let wrapped = ResilientRateSource {
            inner: Arc::clone(&flaky),
            resilient: ResilientClient::new(test_breaker(), "exchange_rates"),
        };

        // Same trait surface as the raw client
        let source: &dyn RateSource = &wrapped;

        // Two failures open the per-method circuit
        assert!(source.latest("USD").await.is_err());
        assert!(source.latest("USD").await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

        // Third call fast-fails without reaching the inner client
        let err = source.latest("USD").await.unwrap_err();
        assert!(err.contains("circuit breaker is open"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }
}
