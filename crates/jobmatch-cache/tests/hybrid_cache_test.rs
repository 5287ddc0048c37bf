//! HybridCache behaviour across distributed-tier outages.
//!
//! Uses an in-memory stand-in for Redis that can be switched down (errors)
//! or hung (never answers), with tokio's paused clock driving timeouts,
//! backoff and breaker resets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobmatch_cache::{
    BreakerConfig, BreakerState, CacheConfig, DistributedCache, HybridCache,
};
use jobmatch_core::{Error, Result};
use tokio::time::Instant;

#[derive(Default)]
struct FakeRedis {
    data: Mutex<HashMap<String, (String, Instant)>>,
    down: AtomicBool,
    hang: AtomicBool,
    calls: AtomicUsize,
}

impl FakeRedis {
    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Cache("connection refused".into()));
        }
        Ok(())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedCache for FakeRedis {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.enter().await?;
        let data = self.data.lock().unwrap();
        Ok(data
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(v, _)| v.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.enter().await?;
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.enter().await?;
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        self.enter().await?;
        let mut data = self.data.lock().unwrap();
        let before = data.len();
        data.retain(|k, _| !k.starts_with(prefix));
        Ok(before - data.len())
    }
}

fn setup() -> (Arc<FakeRedis>, HybridCache) {
    let backend = Arc::new(FakeRedis::default());
    let cache = HybridCache::new(
        backend.clone(),
        BreakerConfig::new()
            .with_failure_threshold(3)
            .with_reset_timeout(Duration::from_millis(1000)),
        CacheConfig::new()
            .with_ttl(Duration::from_secs(60))
            .with_retries(2, Duration::from_millis(10))
            .with_op_timeout(Duration::from_millis(50)),
    );
    (backend, cache)
}

#[tokio::test(start_paused = true)]
async fn test_distributed_hit_and_authoritative_miss() {
    let (backend, cache) = setup();
    cache.set("jm:match:a", "one".into(), None).await;
    assert_eq!(cache.get("jm:match:a").await.as_deref(), Some("one"));

    // Gone from the distributed tier: a miss, even though the local tier has it.
    backend.data.lock().unwrap().clear();
    assert_eq!(cache.get("jm:match:a").await, None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.fallback_hits, 0);
}

#[tokio::test(start_paused = true)]
async fn test_outage_falls_back_to_written_through_value() {
    let (backend, cache) = setup();
    cache.set("jm:match:a", "one".into(), None).await;

    backend.down.store(true, Ordering::SeqCst);
    assert_eq!(cache.get("jm:match:a").await.as_deref(), Some("one"));

    let stats = cache.stats();
    assert_eq!(stats.fallback_hits, 1);
    // First attempt plus two retries.
    assert_eq!(stats.distributed_errors, 3);
    assert_eq!(cache.breaker().state(), BreakerState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_skips_backend_without_waiting() {
    let (backend, cache) = setup();
    cache.set("jm:match:a", "one".into(), None).await;
    backend.down.store(true, Ordering::SeqCst);
    cache.get("jm:match:a").await;
    assert_eq!(cache.breaker().state(), BreakerState::Open);

    let calls_before = backend.calls();
    let start = Instant::now();
    assert_eq!(cache.get("jm:match:a").await.as_deref(), Some("one"));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(backend.calls(), calls_before);
    assert!(cache.stats().circuit_rejections >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_reset_timeout() {
    let (backend, cache) = setup();
    backend.down.store(true, Ordering::SeqCst);
    cache.set("jm:match:a", "stale".into(), None).await;
    assert_eq!(cache.breaker().state(), BreakerState::Open);

    backend.down.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_millis(1000)).await;

    cache.set("jm:match:a", "fresh".into(), None).await;
    let snapshot = cache.breaker().snapshot();
    assert_eq!(snapshot.state, BreakerState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
    assert_eq!(cache.get("jm:match:a").await.as_deref(), Some("fresh"));

    // A later outage serves the recovered write, not the older one.
    backend.down.store(true, Ordering::SeqCst);
    assert_eq!(cache.get("jm:match:a").await.as_deref(), Some("fresh"));
}

#[tokio::test(start_paused = true)]
async fn test_local_fallback_respects_ttl() {
    let (backend, cache) = setup();
    cache
        .set("jm:match:a", "one".into(), Some(Duration::from_secs(5)))
        .await;
    backend.down.store(true, Ordering::SeqCst);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.get("jm:match:a").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_hung_backend_times_out_and_falls_back() {
    let (backend, cache) = setup();
    cache.set("jm:match:a", "one".into(), None).await;
    backend.hang.store(true, Ordering::SeqCst);

    let start = Instant::now();
    assert_eq!(cache.get("jm:match:a").await.as_deref(), Some("one"));
    // Three bounded attempts plus backoff, nowhere near the hang.
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(cache.stats().distributed_errors, 3);
}

#[tokio::test(start_paused = true)]
async fn test_clear_namespace_hits_both_tiers() {
    let (backend, cache) = setup();
    cache.set("jm:match:a", "1".into(), None).await;
    cache.set("jm:match:b", "2".into(), None).await;
    cache.set("other:c", "3".into(), None).await;

    cache.clear_namespace("jm:match:").await;
    assert_eq!(backend.data.lock().unwrap().len(), 1);

    backend.down.store(true, Ordering::SeqCst);
    assert_eq!(cache.get("jm:match:a").await, None);
    assert_eq!(cache.get("other:c").await.as_deref(), Some("3"));
}

#[tokio::test(start_paused = true)]
async fn test_delete_removes_from_both_tiers() {
    let (backend, cache) = setup();
    cache.set("jm:match:a", "1".into(), None).await;
    cache.delete("jm:match:a").await;
    assert!(backend.data.lock().unwrap().is_empty());

    backend.down.store(true, Ordering::SeqCst);
    assert_eq!(cache.get("jm:match:a").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_json_helpers() {
    let (_backend, cache) = setup();
    cache
        .set_json("jm:match:j", &vec![1, 2, 3], None)
        .await
        .unwrap();
    let back: Option<Vec<i32>> = cache.get_json("jm:match:j").await;
    assert_eq!(back, Some(vec![1, 2, 3]));

    cache.set("jm:match:bad", "not json".into(), None).await;
    let bad: Option<Vec<i32>> = cache.get_json("jm:match:bad").await;
    assert_eq!(bad, None);
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_during_outage_applies_after_recovery() {
    let (backend, cache) = setup();
    cache.set("jm:match:a", "old".into(), None).await;
    cache.set("jm:match:b", "old".into(), None).await;
    cache.set("other:c", "keep".into(), None).await;

    backend.down.store(true, Ordering::SeqCst);
    assert!(!cache.delete("jm:match:a").await);
    assert!(!cache.clear_namespace("jm:match:").await);
    assert_eq!(cache.pending_invalidations(), 2);
    assert_eq!(cache.get("jm:match:a").await, None);

    backend.down.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_millis(1000)).await;

    assert_eq!(cache.get("jm:match:a").await, None);
    assert_eq!(cache.get("jm:match:b").await, None);
    assert_eq!(cache.get("other:c").await.as_deref(), Some("keep"));
    assert_eq!(cache.pending_invalidations(), 0);

    let data = backend.data.lock().unwrap();
    assert_eq!(data.len(), 1);
    assert!(data.contains_key("other:c"));
}

#[tokio::test(start_paused = true)]
async fn test_write_after_recovery_survives_replayed_invalidation() {
    let (backend, cache) = setup();
    cache.set("jm:match:a", "old".into(), None).await;

    backend.down.store(true, Ordering::SeqCst);
    assert!(!cache.clear_namespace("jm:match:").await);

    backend.down.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_millis(1000)).await;

    cache.set("jm:match:a", "new".into(), None).await;
    assert_eq!(cache.pending_invalidations(), 0);
    assert_eq!(cache.get("jm:match:a").await.as_deref(), Some("new"));
}

#[tokio::test(start_paused = true)]
async fn test_reachable_backend_applies_invalidation_at_once() {
    let (backend, cache) = setup();
    cache.set("jm:match:a", "1".into(), None).await;
    assert!(cache.delete("jm:match:a").await);
    assert!(cache.clear_namespace("jm:match:").await);
    assert_eq!(cache.pending_invalidations(), 0);
    assert!(backend.data.lock().unwrap().is_empty());
}
