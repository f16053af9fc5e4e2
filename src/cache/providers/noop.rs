//! No-op cache provider
//!
//! Always returns None/success. Used when caching is disabled by
//! configuration.

use crate::cache::errors::CacheResult;
use crate::cache::traits::CacheService;
use std::time::Duration;

/// No-op cache service that never caches anything
///
/// All reads miss, all writes succeed silently.
#[derive(Debug, Clone, Default)]
pub struct NoOpCacheService;

impl NoOpCacheService {
    /// Create a new no-op cache service
    pub fn new() -> Self {
        Self
    }
}

impl CacheService for NoOpCacheService {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn delete_pattern(&self, _pattern: &str) -> CacheResult<u64> {
        Ok(0)
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        Ok(false)
    }

    async fn ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
        Ok(None)
    }

    async fn clear(&self) -> CacheResult<u64> {
        Ok(0)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }

    fn is_distributed(&self) -> bool {
        // No state at all, so nothing can go stale across instances
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_get_returns_none() {
        let svc = NoOpCacheService::new();
        assert_eq!(svc.get("any_key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_noop_writes_succeed() {
        let svc = NoOpCacheService::new();
        svc.set("key", "value", Duration::from_secs(60))
            .await
            .unwrap();
        svc.delete("key").await.unwrap();
        assert_eq!(svc.delete_pattern("prefix:*").await.unwrap(), 0);
        assert_eq!(svc.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_noop_exists_and_ttl() {
        let svc = NoOpCacheService::new();
        svc.set("key", "value", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!svc.exists("key").await.unwrap());
        assert_eq!(svc.ttl("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_noop_health_check_returns_true() {
        let svc = NoOpCacheService::new();
        assert!(svc.health_check().await.unwrap());
        assert_eq!(svc.provider_name(), "noop");
    }
}
