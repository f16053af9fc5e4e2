//! Cache service trait definition

use super::errors::CacheResult;
use std::time::Duration;

/// Trait defining cache operations
///
/// Implemented by concrete cache backends (Redis, in-memory, NoOp).
/// All operations are async and return `CacheResult` for error handling;
/// the distributed and in-process backends expose identical observable
/// semantics so the backing store is swappable by configuration alone.
pub trait CacheService: Send + Sync {
    /// Get a value from the cache by key
    ///
    /// Returns `Ok(Some(value))` on cache hit, `Ok(None)` on cache miss
    /// (including entries that have passed their TTL).
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<String>>> + Send;

    /// Set a value in the cache with a per-entry TTL
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Delete a specific key from the cache
    fn delete(&self, key: &str) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Delete all keys matching a glob-style pattern, returning the count
    ///
    /// Patterns are glob matches, not bare prefixes: invalidating a logical
    /// namespace requires the trailing wildcard (`product:*`); the pattern
    /// `product:` matches only a key literally named `product:`. Backends
    /// use incremental non-blocking iteration (Redis SCAN), never a
    /// blocking full-keyspace listing.
    fn delete_pattern(
        &self,
        pattern: &str,
    ) -> impl std::future::Future<Output = CacheResult<u64>> + Send;

    /// Check whether a key exists and is unexpired
    fn exists(&self, key: &str) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    /// Remaining time-to-live for a key
    ///
    /// `Ok(None)` when the key does not exist (or has expired).
    fn ttl(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<Duration>>> + Send;

    /// Remove every entry owned by this cache
    fn clear(&self) -> impl std::future::Future<Output = CacheResult<u64>> + Send;

    /// Check if the cache backend is healthy
    fn health_check(&self) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    /// Get the name of the cache backend
    fn provider_name(&self) -> &'static str;

    /// Whether state is shared across process instances
    ///
    /// Distributed backends need cross-instance invalidation broadcast;
    /// in-process backends only ever see their own writes.
    fn is_distributed(&self) -> bool;
}
