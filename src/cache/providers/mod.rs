//! Cache backend implementations
//!
//! Each backend implements [`crate::cache::traits::CacheService`] with the
//! same observable semantics so they are swappable by configuration alone.

pub mod memory;
pub mod noop;
pub mod redis;

pub use memory::MemoryCacheService;
pub use noop::NoOpCacheService;
pub use redis::RedisCacheService;
