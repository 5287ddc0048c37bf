//! # jobmatch-cache
//!
//! Resilient result caching for jobmatch.
//!
//! This crate provides:
//! - [`CircuitBreaker`]: consecutive-failure breaker with a single HalfOpen trial call
//! - [`LocalCache`]: bounded LRU + TTL in-process tier
//! - [`RedisCache`]: Redis implementation of [`DistributedCache`]
//! - [`HybridCache`]: distributed-first cache with retries and local fallback
//! - [`match_cache_key`]: canonical cache keys for match requests

pub mod backend;
pub mod breaker;
pub mod hybrid;
pub mod key;
pub mod local;
pub mod redis_cache;

pub use backend::DistributedCache;
pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker, Permit};
pub use hybrid::{CacheConfig, CacheStats, HybridCache};
pub use key::match_cache_key;
pub use local::LocalCache;
pub use redis_cache::{RedisCache, DEFAULT_REDIS_URL};
