//! Redis implementation of the distributed tier.
//!
//! ## Configuration
//!
//! - `REDIS_ENABLED`: Set to "false" to run with the local tier only (default: true)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info};

use jobmatch_core::{Error, Result};

use crate::backend::DistributedCache;

/// Default Redis URL when `REDIS_URL` is unset.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

fn cache_err(op: &str, e: redis::RedisError) -> Error {
    Error::Cache(format!("redis {} failed: {}", op, e))
}

/// Escape glob metacharacters so a prefix matches literally in `KEYS`.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// [`DistributedCache`] backed by a multiplexed Redis connection.
///
/// The connection is established on first use rather than at construction.
/// A failed connect is returned as [`Error::Cache`] like any other call
/// failure, so the caller's circuit breaker counts it, and the next call
/// tries again.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    connection: Arc<Mutex<Option<ConnectionManager>>>,
}

impl RedisCache {
    /// Validate `redis_url` without connecting.
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("invalid REDIS_URL: {}", e)))?;
        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(None)),
        })
    }

    /// Validate `redis_url` and connect now.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let cache = Self::new(redis_url)?;
        cache.connection().await?;
        Ok(cache)
    }

    /// Whether a connection has been established.
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// The shared connection, connecting first if needed. Once established,
    /// the connection manager reconnects on its own after transient failures.
    async fn connection(&self) -> Result<ConnectionManager> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        // One retry only; retry pacing belongs to the caller's breaker.
        let config = ConnectionManagerConfig::new().set_number_of_retries(1);
        let conn = ConnectionManager::new_with_config(self.client.clone(), config)
            .await
            .map_err(|e| cache_err("connect", e))?;
        info!(
            subsystem = "cache",
            component = "redis",
            "Redis cache tier connected"
        );
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| cache_err("GET", e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| cache_err("SET", e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| cache_err("DEL", e))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", glob_escape(prefix));
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_err("KEYS", e))?;
        if keys.is_empty() {
            debug!(subsystem = "cache", component = "redis", prefix, "No keys to remove");
            return Ok(0);
        }
        conn.del::<_, ()>(&keys[..])
            .await
            .map_err(|e| cache_err("DEL", e))?;
        Ok(keys.len())
    }
}
