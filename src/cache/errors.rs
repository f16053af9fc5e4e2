//! Cache error types

use thiserror::Error;

/// Errors that can occur during cache operations
///
/// These never propagate past the caching layer into API wrappers:
/// `get_or_fetch` recovers every variant by calling the fetch function
/// directly.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to connect to the cache backend
    #[error("cache connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize or deserialize a cached value
    #[error("cache serialization error: {0}")]
    SerializationError(String),

    /// Generic backend error
    #[error("cache backend error: {0}")]
    BackendError(String),

    /// Invalidation pub/sub subscription error
    #[error("cache subscription error: {0}")]
    SubscriptionError(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
