#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # TradeNavigator Core
//!
//! Resilient external-API invocation core for trade data services: a
//! per-service circuit breaker with timeout-guarded retries, a tiered
//! cache layer with distributed and in-process backends, and a pub/sub
//! invalidation bus keeping caches coherent across process instances.
//!
//! ## Architecture
//!
//! External API calls flow through a [`resilience::ResilientClient`] into
//! the [`resilience::CircuitBreaker`], which tracks one independent state
//! machine (CLOSED, OPEN, HALF_OPEN) per qualified service name. Results
//! worth keeping land in the [`cache::CacheProvider`], and mutations
//! broadcast [`cache::InvalidationEvent`]s over the
//! [`cache::InvalidationBus`] so peer instances drop stale entries.
//!
//! Caching is strictly a performance optimization: every cache failure
//! degrades to calling the origin directly, and a distributed store that
//! is down at startup degrades to an in-process cache.
//!
//! ## Module Organization
//!
//! - [`resilience`] - circuit breaker, retry/timeout engine, resilient
//!   client wrapper, metrics emission
//! - [`cache`] - cache backends, provider facade, invalidation bus
//! - [`config`] - environment-derived configuration
//! - [`errors`] - crate-level error aggregation
//! - [`logging`] - tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tradenav_core::cache::{CacheProvider, InvalidationBus};
//! use tradenav_core::config::TradenavConfig;
//! use tradenav_core::resilience::{CircuitBreaker, ResilientClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! tradenav_core::logging::init_logging();
//!
//! let config = TradenavConfig::from_env(&["exchange_rates", "comtrade"])?;
//! let breaker = Arc::new(CircuitBreaker::new(config.resilience.clone()));
//!
//! let cache =
//!     CacheProvider::from_config_graceful(&config.cache, Some(Arc::clone(&breaker))).await;
//! let bus = InvalidationBus::connect(cache.clone(), &config.cache).await;
//!
//! let rates = ResilientClient::new(Arc::clone(&breaker), "exchange_rates");
//! let rate: Result<f64, _> = rates
//!     .call("latest", || async { Ok::<_, std::io::Error>(1.08) })
//!     .await;
//!
//! bus.publish_key("fx:USD:EUR").await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod errors;
pub mod logging;
pub mod resilience;

pub use cache::{CacheProvider, CacheService, InvalidationBus};
pub use config::TradenavConfig;
pub use errors::{TradenavError, TradenavResult};
pub use resilience::{CircuitBreaker, CircuitBreakerError, CircuitState, ResilientClient};
