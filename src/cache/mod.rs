//! # Tiered Cache Layer
//!
//! Uniform cache operations over interchangeable backends, with circuit
//! breaker protection for distributed stores and cross-instance
//! invalidation broadcast.
//!
//! ## Architecture
//!
//! - [`traits::CacheService`]: the operation contract every backend
//!   implements (get, set, delete, delete_pattern, exists, ttl, clear,
//!   health_check)
//! - [`providers`]: redis (distributed), in-memory (per-process), and
//!   no-op backends
//! - [`provider::CacheProvider`]: enum-dispatch facade with graceful
//!   degradation, optional circuit protection, and typed `get_or_fetch`
//! - [`invalidation::InvalidationBus`]: pub/sub invalidation broadcast
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tradenav_core::cache::{CacheProvider, InvalidationBus};
//! use tradenav_core::config::CacheConfig;
//!
//! # async fn example() {
//! let config = CacheConfig::default();
//! let cache = CacheProvider::from_config_graceful(&config, None).await;
//!
//! let rate: Result<f64, String> = cache
//!     .get_or_fetch("fx:USD:EUR", std::time::Duration::from_secs(300), || async {
//!         Ok(0.92)
//!     })
//!     .await;
//!
//! let bus = InvalidationBus::connect(cache.clone(), &config).await;
//! bus.publish_pattern("fx:*").await.ok();
//! # }
//! ```

pub mod errors;
pub mod invalidation;
pub mod provider;
pub mod providers;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use invalidation::{InvalidationBus, InvalidationEvent, InvalidationScope, ListenerStats};
pub use provider::CacheProvider;
pub use providers::{MemoryCacheService, NoOpCacheService, RedisCacheService};
pub use traits::CacheService;
