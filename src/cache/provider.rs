//! Cache provider with integrated circuit breaker protection
//!
//! Enum dispatch over the concrete backends (no vtable); consumers use
//! [`CacheProvider`] and get automatic resilience for distributed backends
//! plus typed `get_or_fetch` with fetch-function fallback.
//!
//! ## Failure policy
//!
//! Caching is a performance optimization, never a correctness dependency:
//!
//! - Startup never fails because of the cache. A redis backend that cannot
//!   connect degrades to the in-memory backend with a warning.
//! - `get_or_fetch` recovers every cache error by calling the fetch
//!   function directly; cache errors are logged, not surfaced.
//! - For distributed backends an optional circuit breaker fast-fails cache
//!   commands while the store is unhealthy: `get` behaves as a miss,
//!   writes become no-ops.

use super::errors::CacheResult;
use super::providers::{MemoryCacheService, NoOpCacheService, RedisCacheService};
use super::traits::CacheService;
use crate::config::CacheConfig;
use crate::resilience::{CircuitBreaker, CircuitState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit name used for cache backend protection
const CACHE_CIRCUIT: &str = "cache";

/// Internal backend enum for zero-cost dispatch
#[derive(Debug, Clone)]
enum CacheBackend {
    /// Distributed store (boxed to reduce enum size)
    Redis(Box<RedisCacheService>),

    /// In-process store, also the degradation target for redis failures
    Memory(Box<MemoryCacheService>),

    /// Always-miss fallback when caching is disabled
    NoOp(NoOpCacheService),

    /// Backend whose every operation errors, for exercising fallback paths
    #[cfg(test)]
    Failing(tests::FailingCacheService),
}

macro_rules! dispatch {
    ($self:expr, $svc:ident => $call:expr) => {
        match $self {
            CacheBackend::Redis($svc) => $call,
            CacheBackend::Memory($svc) => $call,
            CacheBackend::NoOp($svc) => $call,
            #[cfg(test)]
            CacheBackend::Failing($svc) => $call,
        }
    };
}

impl CacheBackend {
    fn is_distributed(&self) -> bool {
        dispatch!(self, s => s.is_distributed())
    }

    fn provider_name(&self) -> &'static str {
        dispatch!(self, s => s.provider_name())
    }

    fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoOp(_))
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        dispatch!(self, s => s.get(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        dispatch!(self, s => s.set(key, value, ttl).await)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        dispatch!(self, s => s.delete(key).await)
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        dispatch!(self, s => s.delete_pattern(pattern).await)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        dispatch!(self, s => s.exists(key).await)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        dispatch!(self, s => s.ttl(key).await)
    }

    async fn clear(&self) -> CacheResult<u64> {
        dispatch!(self, s => s.clear().await)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        dispatch!(self, s => s.health_check().await)
    }
}

/// Unified cache interface with automatic resilience
///
/// Cloning is cheap and clones share backend state.
#[derive(Clone)]
pub struct CacheProvider {
    backend: CacheBackend,
    default_ttl: Duration,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for CacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProvider")
            .field("backend", &self.backend.provider_name())
            .field("default_ttl", &self.default_ttl)
            .field("circuit_state", &self.circuit_state())
            .finish()
    }
}

impl CacheProvider {
    /// Create a cache provider from configuration with graceful degradation
    ///
    /// A configured redis backend that fails to connect degrades to the
    /// in-memory backend; an unknown backend name degrades to no-op. The
    /// system never fails to start because of cache issues.
    ///
    /// Pass a shared breaker registry to protect distributed backends from
    /// repeated timeout penalties while the store is unreachable.
    pub async fn from_config_graceful(
        config: &CacheConfig,
        breaker: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        let backend = Self::create_backend(config).await;

        // Circuit protection only pays for itself on networked backends
        let circuit_breaker = if backend.is_distributed() && backend.is_enabled() {
            breaker
        } else {
            None
        };

        Self {
            backend,
            default_ttl: config.default_ttl,
            circuit_breaker,
        }
    }

    async fn create_backend(config: &CacheConfig) -> CacheBackend {
        if !config.enabled {
            info!("Cache disabled by configuration");
            return CacheBackend::NoOp(NoOpCacheService::new());
        }

        match config.backend.as_str() {
            "redis" => Self::create_redis_backend(config).await,
            "memory" | "in-memory" => {
                info!(backend = "memory", "In-memory cache provider initialized");
                CacheBackend::Memory(Box::new(MemoryCacheService::new()))
            }
            other => {
                warn!(backend = other, "Unknown cache backend, falling back to NoOp");
                CacheBackend::NoOp(NoOpCacheService::new())
            }
        }
    }

    async fn create_redis_backend(config: &CacheConfig) -> CacheBackend {
        let redis_config = match &config.redis {
            Some(rc) => rc,
            None => {
                warn!("Redis backend selected but REDIS_URL missing, using in-memory cache");
                return CacheBackend::Memory(Box::new(MemoryCacheService::new()));
            }
        };

        match RedisCacheService::from_config(redis_config).await {
            Ok(service) => {
                info!(backend = "redis", "Distributed cache provider initialized");
                CacheBackend::Redis(Box::new(service))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to connect to Redis, degrading to in-memory cache"
                );
                CacheBackend::Memory(Box::new(MemoryCacheService::new()))
            }
        }
    }

    /// Create an in-memory provider (single-instance deployments, tests)
    pub fn memory(default_ttl: Duration) -> Self {
        Self {
            backend: CacheBackend::Memory(Box::new(MemoryCacheService::new())),
            default_ttl,
            circuit_breaker: None,
        }
    }

    /// Create a no-op provider (explicit opt-out)
    pub fn noop() -> Self {
        Self {
            backend: CacheBackend::NoOp(NoOpCacheService::new()),
            default_ttl: Duration::from_secs(3600),
            circuit_breaker: None,
        }
    }

    /// Check if caching is actually enabled (not no-op)
    pub fn is_enabled(&self) -> bool {
        self.backend.is_enabled()
    }

    /// Whether the backend shares state across process instances
    pub fn is_distributed(&self) -> bool {
        self.backend.is_distributed()
    }

    /// Get the backend name ("redis", "memory", "noop")
    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    /// TTL applied when callers do not specify one
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Current cache circuit state, if protection is configured
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker
            .as_ref()
            .map(|cb| cb.state(CACHE_CIRCUIT))
    }

    /// Run one cache command under circuit protection
    ///
    /// `open_value` is returned without touching the backend while the
    /// circuit is open (miss semantics for reads, no-op for writes).
    async fn protected<T, Fut>(
        &self,
        open_value: impl FnOnce() -> T,
        command: Fut,
    ) -> CacheResult<T>
    where
        Fut: Future<Output = CacheResult<T>>,
    {
        let Some(cb) = self.circuit_breaker.as_ref() else {
            return command.await;
        };

        if !cb.should_allow(CACHE_CIRCUIT) {
            debug!("Cache circuit open, short-circuiting command");
            return Ok(open_value());
        }

        let start = Instant::now();
        let result = command.await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => cb.record_success_manual(CACHE_CIRCUIT, duration),
            Err(_) => cb.record_failure_manual(CACHE_CIRCUIT, duration),
        }

        result
    }

    /// Get a raw value; circuit-open behaves as a miss
    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.protected(|| None, self.backend.get(key)).await
    }

    /// Set a raw value with TTL; circuit-open is a no-op
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.protected(|| (), self.backend.set(key, value, ttl))
            .await
    }

    /// Delete a specific key; circuit-open is a no-op
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.protected(|| (), self.backend.delete(key)).await
    }

    /// Delete keys matching a glob pattern; circuit-open is a no-op
    ///
    /// Namespace invalidation needs the trailing wildcard: `product:*`,
    /// not `product:`.
    pub async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.protected(|| 0, self.backend.delete_pattern(pattern))
            .await
    }

    /// Check key existence; circuit-open behaves as absent
    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.protected(|| false, self.backend.exists(key)).await
    }

    /// Remaining TTL for a key; circuit-open behaves as absent
    pub async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.protected(|| None, self.backend.ttl(key)).await
    }

    /// Remove every entry; circuit-open is a no-op
    pub async fn clear(&self) -> CacheResult<u64> {
        self.protected(|| 0, self.backend.clear()).await
    }

    /// Health check; circuit-open reports unhealthy
    pub async fn health_check(&self) -> CacheResult<bool> {
        self.protected(|| false, self.backend.health_check()).await
    }

    /// Typed read-through cache
    ///
    /// Returns the cached value when present and unexpired; otherwise runs
    /// `fetch`, stores the result best-effort with the given TTL, and
    /// returns it. Cache failures of any kind (backend errors, corrupt
    /// entries) fall back to `fetch` - only `fetch`'s own error is ever
    /// surfaced. Concurrent calls for the same cold key may each invoke
    /// `fetch`; no single-flight de-duplication is performed.
    pub async fn get_or_fetch<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    // Corrupt or schema-drifted entry: treat as a miss
                    warn!(key = key, error = %e, "Cached value failed to deserialize, refetching");
                    if let Err(del_err) = self.delete(key).await {
                        debug!(key = key, error = %del_err, "Failed to drop corrupt cache entry");
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(key = key, error = %e, "Cache read failed, falling back to fetch");
            }
        }

        let value = fetch().await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = self.set(key, &raw, ttl).await {
                    warn!(key = key, error = %e, "Cache write failed, returning fetched value");
                }
            }
            Err(e) => {
                warn!(key = key, error = %e, "Fetched value failed to serialize, not cached");
            }
        }

        Ok(value)
    }

    /// `get_or_fetch` with the configured default TTL
    pub async fn get_or_fetch_default<T, F, Fut, E>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_fetch(key, self.default_ttl, fetch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::errors::CacheError;
    use crate::resilience::config::CircuitBreakerConfig;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend where every operation returns a backend error
    #[derive(Debug, Clone, Default)]
    pub(super) struct FailingCacheService;

    impl FailingCacheService {
        fn err<T>() -> CacheResult<T> {
            Err(CacheError::BackendError("store unreachable".to_string()))
        }
    }

    impl CacheService for FailingCacheService {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Self::err()
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
            Self::err()
        }

        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Self::err()
        }

        async fn delete_pattern(&self, _pattern: &str) -> CacheResult<u64> {
            Self::err()
        }

        async fn exists(&self, _key: &str) -> CacheResult<bool> {
            Self::err()
        }

        async fn ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
            Self::err()
        }

        async fn clear(&self) -> CacheResult<u64> {
            Self::err()
        }

        async fn health_check(&self) -> CacheResult<bool> {
            Self::err()
        }

        fn provider_name(&self) -> &'static str {
            "failing"
        }

        fn is_distributed(&self) -> bool {
            true
        }
    }

    fn failing_provider() -> CacheProvider {
        CacheProvider {
            backend: CacheBackend::Failing(FailingCacheService),
            default_ttl: Duration::from_secs(60),
            circuit_breaker: None,
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct LandedCost {
        duty: f64,
        vat: f64,
    }

    fn memory_provider() -> CacheProvider {
        CacheProvider::memory(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_noop_provider_is_not_enabled() {
        let provider = CacheProvider::noop();
        assert!(!provider.is_enabled());
        assert_eq!(provider.provider_name(), "noop");
        assert!(provider.circuit_state().is_none());
    }

    #[tokio::test]
    async fn test_from_config_disabled() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let provider = CacheProvider::from_config_graceful(&config, None).await;
        assert!(!provider.is_enabled());
    }

    #[tokio::test]
    async fn test_from_config_unknown_backend() {
        let config = CacheConfig {
            backend: "unknown_backend".to_string(),
            ..CacheConfig::default()
        };
        let provider = CacheProvider::from_config_graceful(&config, None).await;
        assert!(!provider.is_enabled());
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let config = CacheConfig {
            backend: "memory".to_string(),
            ..CacheConfig::default()
        };
        let provider = CacheProvider::from_config_graceful(&config, None).await;
        assert!(provider.is_enabled());
        assert_eq!(provider.provider_name(), "memory");
        assert!(!provider.is_distributed());
        // No circuit protection for in-process backends
        assert!(provider.circuit_state().is_none());
    }

    #[tokio::test]
    async fn test_from_config_redis_without_url_degrades_to_memory() {
        let config = CacheConfig {
            backend: "redis".to_string(),
            redis: None,
            ..CacheConfig::default()
        };
        let provider = CacheProvider::from_config_graceful(&config, None).await;
        assert!(provider.is_enabled());
        assert_eq!(provider.provider_name(), "memory");
    }

    #[tokio::test]
    async fn test_get_or_fetch_miss_then_hit() {
        let provider = memory_provider();
        let fetches = AtomicU32::new(0);

        let first: Result<LandedCost, String> = provider
            .get_or_fetch("cost:US:8471", Duration::from_secs(60), || {
                fetches.fetch_add(1, Ordering::SeqCst);
                async { Ok(LandedCost { duty: 12.5, vat: 20.0 }) }
            })
            .await;
        assert_eq!(first.unwrap(), LandedCost { duty: 12.5, vat: 20.0 });

        let second: Result<LandedCost, String> = provider
            .get_or_fetch("cost:US:8471", Duration::from_secs(60), || {
                fetches.fetch_add(1, Ordering::SeqCst);
                async { Ok(LandedCost { duty: 0.0, vat: 0.0 }) }
            })
            .await;

        // Second call served from cache, fetch not re-invoked
        assert_eq!(second.unwrap(), LandedCost { duty: 12.5, vat: 20.0 });
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_propagates_fetch_error() {
        let provider = memory_provider();

        let result: Result<LandedCost, String> = provider
            .get_or_fetch("cost:missing", Duration::from_secs(60), || async {
                Err("upstream 503".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "upstream 503");
        // A failed fetch must not poison the cache
        assert!(!provider.exists("cost:missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_fetch_with_noop_backend_still_fetches() {
        let provider = CacheProvider::noop();

        let result: Result<u64, String> =
            provider.get_or_fetch("k", Duration::from_secs(60), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_get_or_fetch_survives_backend_that_errors_on_everything() {
        let provider = failing_provider();
        let fetches = AtomicU32::new(0);

        // Direct operations surface the backend error
        assert!(provider.get("k").await.is_err());
        assert!(provider.set("k", "v", Duration::from_secs(60)).await.is_err());

        // get_or_fetch recovers the read error and swallows the write error
        for _ in 0..2 {
            let result: Result<LandedCost, String> = provider
                .get_or_fetch("cost:US:8471", Duration::from_secs(60), || {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    async { Ok(LandedCost { duty: 12.5, vat: 20.0 }) }
                })
                .await;
            assert_eq!(result.unwrap(), LandedCost { duty: 12.5, vat: 20.0 });
        }

        // Nothing was cached, so every call re-fetched
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_backend_fetch_error_still_propagates() {
        let provider = failing_provider();

        let result: Result<LandedCost, String> = provider
            .get_or_fetch("cost:US:8471", Duration::from_secs(60), || async {
                Err("upstream 503".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "upstream 503");
    }

    #[tokio::test]
    async fn test_get_or_fetch_recovers_from_corrupt_entry() {
        let provider = memory_provider();
        provider
            .set("cost:corrupt", "not json at all", Duration::from_secs(60))
            .await
            .unwrap();

        let result: Result<LandedCost, String> = provider
            .get_or_fetch("cost:corrupt", Duration::from_secs(60), || async {
                Ok(LandedCost { duty: 1.0, vat: 2.0 })
            })
            .await;

        assert_eq!(result.unwrap(), LandedCost { duty: 1.0, vat: 2.0 });
    }

    #[tokio::test]
    async fn test_open_cache_circuit_short_circuits_commands() {
        let breaker = Arc::new(CircuitBreaker::with_defaults(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        }));

        // Build a provider whose backend is distributed so the breaker is kept.
        // The backend itself is never reached once the circuit is open, so an
        // in-memory backend standing in for redis is fine here.
        let provider = CacheProvider {
            backend: CacheBackend::Memory(Box::new(MemoryCacheService::new())),
            default_ttl: Duration::from_secs(60),
            circuit_breaker: Some(Arc::clone(&breaker)),
        };

        provider.set("k", "v", Duration::from_secs(60)).await.unwrap();
        breaker.force_open(CACHE_CIRCUIT);

        // Reads behave as misses, writes as no-ops, health as unhealthy
        assert_eq!(provider.get("k").await.unwrap(), None);
        assert!(!provider.exists("k").await.unwrap());
        provider.set("k2", "v2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(provider.delete_pattern("*").await.unwrap(), 0);
        assert!(!provider.health_check().await.unwrap());

        // get_or_fetch still produces the fetched value
        let result: Result<u64, String> =
            provider.get_or_fetch("k3", Duration::from_secs(60), || async { Ok(9) }).await;
        assert_eq!(result.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_default_ttl_used_by_get_or_fetch_default() {
        let provider = CacheProvider::memory(Duration::from_secs(120));
        let result: Result<u64, String> =
            provider.get_or_fetch_default("k", || async { Ok(5) }).await;
        assert_eq!(result.unwrap(), 5);

        let ttl = provider.ttl("k").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(120) && ttl > Duration::from_secs(100));
    }
}
