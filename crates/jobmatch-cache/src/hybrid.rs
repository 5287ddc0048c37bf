//! Two-tier cache: distributed first, local fallback.
//!
//! Every operation goes to the distributed tier through the
//! [`CircuitBreaker`]. Transient failures (errors and timeouts) are retried
//! with exponential backoff and jitter; a rejection by an open circuit falls
//! back at once without suspending. When the distributed tier cannot answer,
//! reads are served from the bounded local tier, so an outage degrades to
//! local caching and never reaches the caller as an error.
//!
//! Writes go to both tiers, which keeps recently written values servable
//! locally through a later outage. A successful distributed read is
//! authoritative: a distributed miss is a miss even if the local tier still
//! holds an older value.
//!
//! Invalidations (`delete`, `clear_namespace`) that cannot reach the
//! distributed tier are remembered and replayed, in order, before the next
//! operation that talks to it. Until the replay succeeds the distributed tier
//! is not consulted, so a value removed during an outage is never served
//! again after recovery.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use jobmatch_core::{defaults, Error, Result};

use crate::backend::DistributedCache;
use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::local::LocalCache;

/// Hybrid cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied when a write does not specify one.
    pub ttl: Duration,
    /// Entry cap of the local tier.
    pub local_capacity: usize,
    /// Retries after the first failed distributed attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Bound on a single distributed-tier call.
    pub op_timeout: Duration,
    /// Key prefix for match results.
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(defaults::CACHE_TTL_SECS),
            local_capacity: defaults::CACHE_LOCAL_CAPACITY,
            max_retries: defaults::CACHE_MAX_RETRIES,
            backoff_base: Duration::from_millis(defaults::CACHE_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(defaults::CACHE_BACKOFF_MAX_MS),
            op_timeout: Duration::from_millis(defaults::CACHE_OP_TIMEOUT_MS),
            namespace: defaults::CACHE_MATCH_NAMESPACE.to_string(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CACHE_TTL_SECS` | `300` |
    /// | `CACHE_LOCAL_CAPACITY` | `1000` |
    /// | `CACHE_MAX_RETRIES` | `2` |
    /// | `CACHE_BACKOFF_BASE_MS` | `25` |
    /// | `CACHE_OP_TIMEOUT_MS` | `250` |
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }
        let d = Self::default();
        Self {
            ttl: parse("CACHE_TTL_SECS").map(Duration::from_secs).unwrap_or(d.ttl),
            local_capacity: parse("CACHE_LOCAL_CAPACITY").unwrap_or(d.local_capacity),
            max_retries: parse("CACHE_MAX_RETRIES").unwrap_or(d.max_retries),
            backoff_base: parse("CACHE_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.backoff_base),
            op_timeout: parse("CACHE_OP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.op_timeout),
            ..d
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_local_capacity(mut self, capacity: usize) -> Self {
        self.local_capacity = capacity;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_base: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_base = backoff_base;
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Delay before retry number `attempt` (0-based): exponential from
    /// `backoff_base`, capped at `backoff_max`, with jitter in `[d/2, d]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64;
        let cap = self.backoff_max.as_millis() as u64;
        let delay = base.saturating_mul(1u64 << attempt.min(16)).min(cap);
        if delay == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(delay / 2..=delay);
        Duration::from_millis(jittered)
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered by the distributed tier.
    pub hits: u64,
    /// Reads answered by nobody.
    pub misses: u64,
    /// Reads answered by the local tier after a distributed failure.
    pub fallback_hits: u64,
    /// Failed distributed attempts (including timeouts).
    pub distributed_errors: u64,
    /// Operations short-circuited by an open breaker.
    pub circuit_rejections: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fallback_hits: AtomicU64,
    distributed_errors: AtomicU64,
    circuit_rejections: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
            distributed_errors: self.distributed_errors.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
        }
    }
}

/// An invalidation the distributed tier has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Invalidation {
    Key(String),
    Prefix(String),
}

struct Inner {
    distributed: Option<Arc<dyn DistributedCache>>,
    breaker: CircuitBreaker,
    local: LocalCache,
    config: CacheConfig,
    stats: Counters,
    /// Oldest first.
    pending: Mutex<Vec<Invalidation>>,
}

/// Distributed cache with circuit breaking, retries and a local fallback.
#[derive(Clone)]
pub struct HybridCache {
    inner: Arc<Inner>,
}

impl HybridCache {
    pub fn new(
        distributed: Arc<dyn DistributedCache>,
        breaker: BreakerConfig,
        config: CacheConfig,
    ) -> Self {
        Self::build(Some(distributed), breaker, config)
    }

    /// A cache with no distributed tier; everything is served locally.
    pub fn local_only(config: CacheConfig) -> Self {
        info!(subsystem = "cache", "Distributed cache tier disabled, using local tier only");
        Self::build(None, BreakerConfig::default(), config)
    }

    fn build(
        distributed: Option<Arc<dyn DistributedCache>>,
        breaker: BreakerConfig,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                distributed,
                breaker: CircuitBreaker::new("distributed-cache", breaker),
                local: LocalCache::new(config.local_capacity),
                config,
                stats: Counters::default(),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn has_distributed_tier(&self) -> bool {
        self.inner.distributed.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Invalidations still waiting to be applied to the distributed tier.
    pub fn pending_invalidations(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<Invalidation>> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn defer(&self, invalidation: Invalidation) {
        let mut pending = self.lock_pending();
        if !pending.contains(&invalidation) {
            pending.push(invalidation);
        }
    }

    /// Replay deferred invalidations against the distributed tier. Returns
    /// `true` once none remain; stops at the first one that still fails.
    async fn flush_pending(&self) -> bool {
        if self.inner.distributed.is_none() {
            return true;
        }
        let pending = self.lock_pending().clone();
        if pending.is_empty() {
            return true;
        }

        for invalidation in &pending {
            let outcome = match invalidation {
                Invalidation::Key(key) => {
                    self.call_distributed("delete", |b| async move { b.delete(key).await })
                        .await
                }
                Invalidation::Prefix(prefix) => {
                    self.call_distributed("clear_namespace", |b| async move {
                        b.delete_prefix(prefix).await.map(|_| ())
                    })
                    .await
                }
            };
            if let Some(Err(e)) = outcome {
                debug!(
                    subsystem = "cache",
                    component = "hybrid",
                    remaining = self.pending_invalidations(),
                    error = %e,
                    "Deferred invalidations still pending"
                );
                return false;
            }
            let mut remaining = self.lock_pending();
            if let Some(i) = remaining.iter().position(|p| p == invalidation) {
                remaining.remove(i);
            }
        }

        info!(
            subsystem = "cache",
            component = "hybrid",
            replayed = pending.len(),
            "Replayed deferred cache invalidations"
        );
        self.pending_invalidations() == 0
    }

    /// Run `op` against the distributed tier under the breaker, retrying
    /// transient failures. `None` means there is no distributed tier.
    async fn call_distributed<T, F, Fut>(&self, op: &'static str, f: F) -> Option<Result<T>>
    where
        F: Fn(Arc<dyn DistributedCache>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backend = self.inner.distributed.as_ref()?;
        let config = &self.inner.config;
        let mut attempt = 0u32;

        loop {
            let permit = match self.inner.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(e) => {
                    Counters::bump(&self.inner.stats.circuit_rejections);
                    return Some(Err(e));
                }
            };

            let outcome = match tokio::time::timeout(config.op_timeout, f(Arc::clone(backend)))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Cache(format!(
                    "{} timed out after {}ms",
                    op,
                    config.op_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    self.inner.breaker.record_success(permit);
                    return Some(Ok(value));
                }
                Err(e) => {
                    self.inner.breaker.record_failure(permit);
                    Counters::bump(&self.inner.stats.distributed_errors);
                    if attempt >= config.max_retries {
                        return Some(Err(e));
                    }
                    let delay = config.backoff(attempt);
                    debug!(
                        subsystem = "cache",
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying distributed cache call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn log_fallback(&self, op: &str, key: &str, e: &Error) {
        warn!(
            subsystem = "cache",
            component = "hybrid",
            op,
            cache_key = key,
            breaker_state = self.inner.breaker.state().as_str(),
            error = %e,
            "Distributed cache unavailable, using local tier"
        );
    }

    /// Read a value. Never fails; an unreachable distributed tier degrades to
    /// the local tier.
    pub async fn get(&self, key: &str) -> Option<String> {
        let stats = &self.inner.stats;
        if !self.flush_pending().await {
            return self.read_local(key).await;
        }
        match self
            .call_distributed("get", |b| async move { b.get(key).await })
            .await
        {
            Some(Ok(Some(value))) => {
                Counters::bump(&stats.hits);
                debug!(subsystem = "cache", cache_key = key, "Cache HIT");
                Some(value)
            }
            Some(Ok(None)) => {
                Counters::bump(&stats.misses);
                debug!(subsystem = "cache", cache_key = key, "Cache MISS");
                None
            }
            outcome => {
                if let Some(Err(e)) = &outcome {
                    self.log_fallback("get", key, e);
                }
                self.read_local(key).await
            }
        }
    }

    async fn read_local(&self, key: &str) -> Option<String> {
        let stats = &self.inner.stats;
        match self.inner.local.get(key).await {
            Some(value) => {
                Counters::bump(&stats.fallback_hits);
                debug!(subsystem = "cache", cache_key = key, "Local cache HIT");
                Some(value)
            }
            None => {
                Counters::bump(&stats.misses);
                None
            }
        }
    }

    /// Read and deserialize a value. Undecodable entries are treated as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(subsystem = "cache", cache_key = key, error = %e, "Cache deserialization error");
                None
            }
        }
    }

    /// Write through to both tiers. `ttl` defaults to the configured TTL.
    pub async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.inner.config.ttl);
        if self.flush_pending().await {
            let payload = value.as_str();
            let outcome = self
                .call_distributed("set", |b| async move { b.set_ex(key, payload, ttl).await })
                .await;
            if let Some(Err(e)) = &outcome {
                self.log_fallback("set", key, e);
            }
        }
        self.inner.local.set(key, value, ttl).await;
        debug!(subsystem = "cache", cache_key = key, ttl_secs = ttl.as_secs(), "Cache SET");
    }

    /// Serialize and write through to both tiers.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        self.set(key, serialized, ttl).await;
        Ok(())
    }

    /// Remove a key from both tiers.
    ///
    /// Returns `false` when the distributed tier could not be reached; the
    /// removal is then deferred and replayed before the tier is read again.
    pub async fn delete(&self, key: &str) -> bool {
        self.inner.local.remove(key).await;
        let applied = self.flush_pending().await
            && match self
                .call_distributed("delete", |b| async move { b.delete(key).await })
                .await
            {
                Some(Err(e)) => {
                    self.log_fallback("delete", key, &e);
                    false
                }
                _ => true,
            };
        if !applied {
            self.defer(Invalidation::Key(key.to_string()));
        }
        applied
    }

    /// Remove every key under `namespace` from both tiers.
    ///
    /// Like [`delete`](Self::delete), returns `false` when the distributed
    /// part was deferred.
    pub async fn clear_namespace(&self, namespace: &str) -> bool {
        let local = self.inner.local.remove_prefix(namespace).await;
        if !self.flush_pending().await {
            self.defer(Invalidation::Prefix(namespace.to_string()));
            warn!(subsystem = "cache", namespace, local_removed = local, "Namespace clear deferred");
            return false;
        }
        let remote = self
            .call_distributed("clear_namespace", |b| async move {
                b.delete_prefix(namespace).await
            })
            .await;
        match remote {
            Some(Ok(n)) => {
                info!(
                    subsystem = "cache",
                    namespace,
                    local_removed = local,
                    distributed_removed = n,
                    "Cache namespace cleared"
                );
                true
            }
            Some(Err(e)) => {
                self.log_fallback("clear_namespace", namespace, &e);
                self.defer(Invalidation::Prefix(namespace.to_string()));
                false
            }
            None => {
                info!(subsystem = "cache", namespace, local_removed = local, "Cache namespace cleared");
                true
            }
        }
    }
}
