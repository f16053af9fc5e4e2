//! Cross-instance cache invalidation bus
//!
//! When one process instance invalidates cached data, every other instance
//! sharing the distributed store must drop its view too. The bus broadcasts
//! [`InvalidationEvent`]s over a pub/sub channel; each process runs one
//! passive subscriber that applies incoming events as local deletions.
//!
//! The subscriber uses its own connection. Subscription mode is mutually
//! exclusive with command mode on a redis connection, so it cannot share
//! the provider's connection manager.
//!
//! Without a distributed backend the bus runs in local-only mode: publish
//! calls apply the deletion in-process and nothing is broadcast.

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::provider::CacheProvider;
use crate::config::CacheConfig;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Delay before the subscriber attempts to reconnect after a dropped
/// connection
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// What an invalidation event targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationScope {
    /// Drop one exact key
    Key { key: String },

    /// Drop every key matching a glob pattern
    Pattern { pattern: String },

    /// Drop the entire cache
    All,
}

/// A cache invalidation broadcast message
///
/// Transient, never persisted. `origin` identifies the publishing process
/// so subscribers can skip events they already applied locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    #[serde(flatten)]
    pub scope: InvalidationScope,
    pub origin: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl InvalidationEvent {
    fn new(scope: InvalidationScope, origin: Uuid) -> Self {
        Self {
            scope,
            origin,
            timestamp: Utc::now(),
        }
    }
}

/// Subscriber health counters
#[derive(Debug, Clone, Default)]
pub struct ListenerStats {
    pub connected: bool,
    pub events_received: u64,
    pub events_skipped: u64,
    pub parse_errors: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SharedStats {
    connected: AtomicBool,
    events_received: AtomicU64,
    events_skipped: AtomicU64,
    parse_errors: AtomicU64,
    last_event_at: RwLock<Option<DateTime<Utc>>>,
}

impl SharedStats {
    fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            connected: self.connected.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            last_event_at: self.last_event_at.read().ok().and_then(|g| *g),
        }
    }

    fn mark_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_event_at.write() {
            *guard = Some(Utc::now());
        }
    }
}

/// Publish/subscribe bus for cross-instance cache invalidation
///
/// Create one per process with [`InvalidationBus::connect`]; the subscriber
/// requires no further caller action once started.
pub struct InvalidationBus {
    provider: CacheProvider,
    channel: String,
    instance_id: Uuid,
    publisher: Option<redis::aio::ConnectionManager>,
    stats: Arc<SharedStats>,
    listener: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("channel", &self.channel)
            .field("instance_id", &self.instance_id)
            .field("broadcast", &self.publisher.is_some())
            .finish()
    }
}

impl InvalidationBus {
    /// Start the bus for this process
    ///
    /// With a distributed, enabled backend this opens a publisher
    /// connection and spawns the subscriber task. Otherwise the bus runs in
    /// local-only mode. Connection failures degrade to local-only mode
    /// rather than failing startup.
    pub async fn connect(provider: CacheProvider, config: &CacheConfig) -> Self {
        let instance_id = Uuid::new_v4();
        let channel = config.invalidation_channel.clone();
        let stats = Arc::new(SharedStats::default());

        let broadcast_target = if provider.is_enabled() && provider.is_distributed() {
            config.redis.as_ref()
        } else {
            None
        };

        let Some(redis_config) = broadcast_target else {
            info!(
                channel = %channel,
                "Invalidation bus in local-only mode (no distributed backend)"
            );
            return Self {
                provider,
                channel,
                instance_id,
                publisher: None,
                stats,
                listener: None,
            };
        };

        match Self::open_connections(&redis_config.url).await {
            Ok((publisher, client)) => {
                let listener = tokio::spawn(run_subscriber(
                    client,
                    channel.clone(),
                    provider.clone(),
                    instance_id,
                    Arc::clone(&stats),
                ));

                info!(
                    channel = %channel,
                    instance_id = %instance_id,
                    "Invalidation bus connected"
                );

                Self {
                    provider,
                    channel,
                    instance_id,
                    publisher: Some(publisher),
                    stats,
                    listener: Some(listener),
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Invalidation bus failed to connect, degrading to local-only mode"
                );
                Self {
                    provider,
                    channel,
                    instance_id,
                    publisher: None,
                    stats,
                    listener: None,
                }
            }
        }
    }

    async fn open_connections(
        url: &str,
    ) -> CacheResult<(redis::aio::ConnectionManager, redis::Client)> {
        let client = redis::Client::open(url).map_err(|e| {
            CacheError::ConnectionError(format!("failed to create Redis client: {e}"))
        })?;

        let publisher = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| {
                CacheError::ConnectionError(format!("failed to connect publisher: {e}"))
            })?;

        Ok((publisher, client))
    }

    /// Unique identifier of this process on the bus
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Whether events are broadcast to other instances
    pub fn is_broadcasting(&self) -> bool {
        self.publisher.is_some()
    }

    /// Current subscriber counters
    pub fn stats(&self) -> ListenerStats {
        self.stats.snapshot()
    }

    /// Invalidate one key everywhere
    pub async fn publish_key(&self, key: &str) -> CacheResult<()> {
        self.publish(InvalidationScope::Key {
            key: key.to_string(),
        })
        .await
    }

    /// Invalidate every key under a glob pattern everywhere
    pub async fn publish_pattern(&self, pattern: &str) -> CacheResult<()> {
        self.publish(InvalidationScope::Pattern {
            pattern: pattern.to_string(),
        })
        .await
    }

    /// Invalidate the whole cache everywhere
    pub async fn publish_all(&self) -> CacheResult<()> {
        self.publish(InvalidationScope::All).await
    }

    /// Apply the invalidation locally, then broadcast it
    ///
    /// The local deletion error propagates; a broadcast failure is logged
    /// and swallowed since peers recover via TTL expiry anyway.
    async fn publish(&self, scope: InvalidationScope) -> CacheResult<()> {
        let event = InvalidationEvent::new(scope, self.instance_id);

        apply_event(&self.provider, &event).await?;

        let Some(publisher) = &self.publisher else {
            return Ok(());
        };

        let payload = serde_json::to_string(&event)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let mut conn = publisher.clone();
        let publish_result: Result<u64, redis::RedisError> = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(&payload)
            .query_async(&mut conn)
            .await;

        match publish_result {
            Ok(receivers) => {
                debug!(
                    channel = %self.channel,
                    receivers = receivers,
                    "Invalidation event broadcast"
                );
            }
            Err(e) => {
                warn!(
                    channel = %self.channel,
                    error = %e,
                    "Failed to broadcast invalidation event"
                );
            }
        }

        Ok(())
    }

    /// Stop the subscriber task
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
            self.stats.connected.store(false, Ordering::Relaxed);
            info!(channel = %self.channel, "Invalidation bus subscriber stopped");
        }
    }
}

impl Drop for InvalidationBus {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }
}

/// Apply one event as local deletions
///
/// Deletions are idempotent, so duplicate or redundant events are harmless.
async fn apply_event(provider: &CacheProvider, event: &InvalidationEvent) -> CacheResult<()> {
    match &event.scope {
        InvalidationScope::Key { key } => provider.delete(key).await,
        InvalidationScope::Pattern { pattern } => {
            provider.delete_pattern(pattern).await.map(|_| ())
        }
        InvalidationScope::All => provider.clear().await.map(|_| ()),
    }
}

/// Long-running subscriber loop with reconnection
async fn run_subscriber(
    client: redis::Client,
    channel: String,
    provider: CacheProvider,
    instance_id: Uuid,
    stats: Arc<SharedStats>,
) {
    loop {
        match subscribe_and_consume(&client, &channel, &provider, instance_id, &stats).await {
            Ok(()) => {
                warn!(channel = %channel, "Invalidation subscription stream ended");
            }
            Err(e) => {
                error!(channel = %channel, error = %e, "Invalidation subscriber error");
            }
        }

        stats.connected.store(false, Ordering::Relaxed);
        tokio::time::sleep(RECONNECT_DELAY).await;
        debug!(channel = %channel, "Reconnecting invalidation subscriber");
    }
}

async fn subscribe_and_consume(
    client: &redis::Client,
    channel: &str,
    provider: &CacheProvider,
    instance_id: Uuid,
    stats: &SharedStats,
) -> CacheResult<()> {
    let conn = client.get_async_connection().await.map_err(|e| {
        CacheError::SubscriptionError(format!("failed to open subscriber connection: {e}"))
    })?;

    let mut pubsub = conn.into_pubsub();
    pubsub.subscribe(channel).await.map_err(|e| {
        CacheError::SubscriptionError(format!("failed to subscribe to {channel}: {e}"))
    })?;

    stats.connected.store(true, Ordering::Relaxed);
    info!(channel = %channel, "Invalidation subscriber listening");

    let mut stream = pubsub.on_message();
    while let Some(message) = stream.next().await {
        let payload: String = match message.get_payload() {
            Ok(p) => p,
            Err(e) => {
                stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Invalidation message with unreadable payload");
                continue;
            }
        };

        // Malformed events are counted and skipped, never fatal
        let event: InvalidationEvent = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(payload = %payload, error = %e, "Ignoring malformed invalidation event");
                continue;
            }
        };

        stats.mark_event();

        // The publisher already applied this locally
        if event.origin == instance_id {
            stats.events_skipped.fetch_add(1, Ordering::Relaxed);
            debug!("Skipping own invalidation event");
            continue;
        }

        debug!(scope = ?event.scope, origin = %event.origin, "Applying invalidation event");
        if let Err(e) = apply_event(provider, &event).await {
            warn!(error = %e, "Failed to apply invalidation event locally");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_provider() -> CacheProvider {
        CacheProvider::memory(Duration::from_secs(60))
    }

    fn local_config() -> CacheConfig {
        CacheConfig {
            backend: "memory".to_string(),
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_event_wire_format() {
        let origin = Uuid::new_v4();
        let event = InvalidationEvent::new(
            InvalidationScope::Key {
                key: "tariff:US:8471".to_string(),
            },
            origin,
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"key""#));
        assert!(json.contains(r#""key":"tariff:US:8471""#));

        let parsed: InvalidationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_scope_variants_round_trip() {
        for scope in [
            InvalidationScope::Key { key: "k".to_string() },
            InvalidationScope::Pattern { pattern: "product:*".to_string() },
            InvalidationScope::All,
        ] {
            let event = InvalidationEvent::new(scope.clone(), Uuid::new_v4());
            let json = serde_json::to_string(&event).unwrap();
            let parsed: InvalidationEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed.scope, scope);
        }
    }

    #[test]
    fn test_malformed_event_is_a_parse_error() {
        let result = serde_json::from_str::<InvalidationEvent>("{\"type\":\"bogus\"}");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_local_only_mode_without_distributed_backend() {
        let bus = InvalidationBus::connect(memory_provider(), &local_config()).await;
        assert!(!bus.is_broadcasting());
        assert!(!bus.stats().connected);
    }

    #[tokio::test]
    async fn test_local_publish_key_deletes_entry() {
        let provider = memory_provider();
        provider.set("k1", "v1", Duration::from_secs(60)).await.unwrap();
        provider.set("k2", "v2", Duration::from_secs(60)).await.unwrap();

        let bus = InvalidationBus::connect(provider.clone(), &local_config()).await;
        bus.publish_key("k1").await.unwrap();

        assert!(!provider.exists("k1").await.unwrap());
        assert!(provider.exists("k2").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_publish_pattern_and_all() {
        let provider = memory_provider();
        for key in ["product:1", "product:2", "order:1"] {
            provider.set(key, "v", Duration::from_secs(60)).await.unwrap();
        }

        let bus = InvalidationBus::connect(provider.clone(), &local_config()).await;

        bus.publish_pattern("product:*").await.unwrap();
        assert!(!provider.exists("product:1").await.unwrap());
        assert!(provider.exists("order:1").await.unwrap());

        bus.publish_all().await.unwrap();
        assert!(!provider.exists("order:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_event_is_idempotent() {
        let provider = memory_provider();
        provider.set("k", "v", Duration::from_secs(60)).await.unwrap();

        let event = InvalidationEvent::new(
            InvalidationScope::Key { key: "k".to_string() },
            Uuid::new_v4(),
        );

        apply_event(&provider, &event).await.unwrap();
        assert!(!provider.exists("k").await.unwrap());

        // Applying the same event again changes nothing
        apply_event(&provider, &event).await.unwrap();
        assert!(!provider.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_distinct_instance_ids() {
        let bus_a = InvalidationBus::connect(memory_provider(), &local_config()).await;
        let bus_b = InvalidationBus::connect(memory_provider(), &local_config()).await;
        assert_ne!(bus_a.instance_id(), bus_b.instance_id());
    }
}
