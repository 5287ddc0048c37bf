//! Distributed cache tier abstraction.

use std::time::Duration;

use async_trait::async_trait;

use jobmatch_core::Result;

/// A remote key/value store with TTL-on-write.
///
/// Implementations report every transport or protocol problem as an error;
/// `Ok(None)` from [`get`](Self::get) strictly means the key is absent.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}
