//! In-process cache provider
//!
//! A `DashMap` with per-entry expiry, used for single-instance deployments
//! and as the graceful-degradation target when Redis is unreachable at
//! startup. Observable semantics (per-entry TTL, pattern deletion, ttl
//! inspection) match the Redis backend so the two are swappable by
//! configuration alone.
//!
//! **Important**: this cache is NOT distributed. Each process maintains its
//! own state; cross-instance invalidation degrades to local-only deletes.

use crate::cache::errors::CacheResult;
use crate::cache::traits::CacheService;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Writes between full-map sweeps of expired entries
const SWEEP_INTERVAL: u64 = 1024;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Glob-style match supporting `*` wildcards (`product:*`, `*`, `a*b`)
///
/// Matches the redis backend's semantics: a bare prefix without `*` only
/// matches the identical key.
fn glob_matches(pattern: &str, key: &str) -> bool {
    fn matches(p: &[u8], k: &[u8]) -> bool {
        match (p.first(), k.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], k) || (!k.is_empty() && matches(p, &k[1..]))
            }
            (Some(pc), Some(kc)) if pc == kc => matches(&p[1..], &k[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), key.as_bytes())
}

/// In-memory cache service with per-entry TTL
///
/// Expired entries are dropped lazily on read and swept every
/// [`SWEEP_INTERVAL`] writes, so memory use tracks the live working set
/// without a background reaper task and without an O(n) scan per insert.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheService {
    entries: Arc<DashMap<String, MemoryEntry>>,
    writes: Arc<AtomicU64>,
}

impl MemoryCacheService {
    /// Create a new empty in-memory cache
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of live (unexpired) entries, for diagnostics
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.value().is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }
}

impl CacheService for MemoryCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                debug!(key = key, "Cache HIT (memory)");
                return Ok(Some(entry.value.clone()));
            }
        }

        // Expired entries are removed on first read past their deadline
        self.entries
            .remove_if(key, |_, entry| entry.is_expired());
        debug!(key = key, "Cache MISS (memory)");
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep_expired();
        }
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );

        debug!(key = key, ttl_seconds = ttl.as_secs(), "Cache SET (memory)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        debug!(key = key, "Cache DEL (memory)");
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut deleted: u64 = 0;
        self.entries.retain(|key, entry| {
            if entry.is_expired() {
                return false;
            }
            if glob_matches(pattern, key) {
                deleted += 1;
                return false;
            }
            true
        });

        debug!(pattern = pattern, deleted = deleted, "Cache pattern DEL (memory)");
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        if let Some(entry) = self.entries.get(key) {
            let now = Instant::now();
            if entry.expires_at > now {
                return Ok(Some(entry.expires_at - now));
            }
        }
        Ok(None)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let count = self.len() as u64;
        self.entries.clear();
        debug!(deleted = count, "Cache CLEAR (memory)");
        Ok(count)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        // In-memory cache is always healthy
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_none_on_miss() {
        let svc = MemoryCacheService::new();
        assert_eq!(svc.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let svc = MemoryCacheService::new();
        let value = r#"{"hs_code":"8471.30"}"#;

        svc.set("tariff:US:8471.30", value, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            svc.get("tariff:US:8471.30").await.unwrap(),
            Some(value.to_string())
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let svc = MemoryCacheService::new();
        svc.set("to_delete", "value", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(svc.exists("to_delete").await.unwrap());

        svc.delete("to_delete").await.unwrap();
        assert!(!svc.exists("to_delete").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let svc = MemoryCacheService::new();
        svc.set("expiring", "value", Duration::from_millis(50))
            .await
            .unwrap();

        assert!(svc.get("expiring").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(svc.get("expiring").await.unwrap().is_none());
        // Expired entry was dropped on read
        assert_eq!(svc.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_reports_remaining_time() {
        let svc = MemoryCacheService::new();
        svc.set("key", "value", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        let remaining = svc.ttl("key").await.unwrap().unwrap();
        assert_eq!(remaining, Duration::from_secs(40));

        tokio::time::advance(Duration::from_secs(41)).await;
        assert_eq!(svc.ttl("key").await.unwrap(), None);
        assert_eq!(svc.ttl("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_swept_after_enough_writes() {
        let svc = MemoryCacheService::new();
        svc.set("stale", "value", Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;

        // The dead entry lingers until the periodic sweep fires
        assert!(svc.entries.contains_key("stale"));
        for i in 0..SWEEP_INTERVAL {
            svc.set(&format!("k{i}"), "v", Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert!(!svc.entries.contains_key("stale"));
    }

    #[tokio::test]
    async fn test_delete_pattern_scopes_to_namespace() {
        let svc = MemoryCacheService::new();
        svc.set("product:1", "a", Duration::from_secs(60)).await.unwrap();
        svc.set("product:2", "b", Duration::from_secs(60)).await.unwrap();
        svc.set("order:1", "c", Duration::from_secs(60)).await.unwrap();

        let deleted = svc.delete_pattern("product:*").await.unwrap();
        assert_eq!(deleted, 2);

        assert!(!svc.exists("product:1").await.unwrap());
        assert!(!svc.exists("product:2").await.unwrap());
        assert!(svc.exists("order:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let svc = MemoryCacheService::new();
        svc.set("a", "1", Duration::from_secs(60)).await.unwrap();
        svc.set("b", "2", Duration::from_secs(60)).await.unwrap();

        assert_eq!(svc.clear().await.unwrap(), 2);
        assert!(svc.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let svc = MemoryCacheService::new();
        svc.set("key", "old", Duration::from_secs(60)).await.unwrap();
        svc.set("key", "new", Duration::from_secs(60)).await.unwrap();
        assert_eq!(svc.get("key").await.unwrap(), Some("new".to_string()));
    }

    #[test]
    fn test_glob_matching() {
        assert!(glob_matches("product:*", "product:1"));
        assert!(glob_matches("product:*", "product:"));
        assert!(!glob_matches("product:*", "order:1"));
        // A bare prefix is not a namespace match
        assert!(!glob_matches("product:", "product:1"));
        assert!(glob_matches("product:", "product:"));
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("a*b", "axxb"));
        assert!(glob_matches("a*b", "ab"));
        assert!(!glob_matches("a*b", "axxc"));
        assert!(glob_matches("exact", "exact"));
        assert!(!glob_matches("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_provider_metadata() {
        let svc = MemoryCacheService::new();
        assert_eq!(svc.provider_name(), "memory");
        assert!(!svc.is_distributed());
        assert!(svc.health_check().await.unwrap());
    }
}
