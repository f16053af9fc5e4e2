//! # Resilience Module
//!
//! Fault tolerance for TradeNavigator's external API calls: per-service
//! circuit breakers, bounded retry with fixed delay, and per-attempt
//! timeouts.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: one registry, one independent circuit per
//!   qualified service name (`service.method`)
//! - **Retry/Timeout**: every executed call runs through a bounded retry
//!   loop; the circuit observes only the final outcome
//! - **Metrics**: request counters, duration histograms, error
//!   classifications, and a per-service state gauge
//! - **Client Wrapping**: [`ResilientClient`] qualifies method calls so API
//!   wrappers get independent circuits per method
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tradenav_core::resilience::{CircuitBreaker, config::ResilienceConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new(ResilienceConfig::default());
//!
//! let rate: f64 = breaker
//!     .execute("exchange_rates.latest", || async {
//!         // network call here
//!         Ok::<_, std::io::Error>(1.08)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitState, DEFAULT_SERVICE,
};
pub use client::ResilientClient;
pub use config::{CircuitBreakerConfig, ResilienceConfig};
pub use metrics::{CallOutcome, CircuitSnapshot, ErrorClass};
