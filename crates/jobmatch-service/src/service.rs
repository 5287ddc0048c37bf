//! The caller-facing match contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use jobmatch_cache::{match_cache_key, HybridCache, RedisCache};
use jobmatch_core::{MatchRequest, MatchResults, Result, Task, TaskId};
use jobmatch_db::{Database, HealthCheckHandle};
use jobmatch_search::{Ranker, ScoreFusion, VectorMatcher};
use jobmatch_tasks::{MatchRunner, ReaperHandle, TaskConfig, TaskManager, WaitOutcome};

use crate::config::ServiceConfig;

/// Task body: serve from the cache when possible, otherwise compute and
/// store the result.
#[derive(Clone)]
pub struct CachedMatchRunner {
    matcher: VectorMatcher,
    cache: HybridCache,
}

impl CachedMatchRunner {
    pub fn new(matcher: VectorMatcher, cache: HybridCache) -> Self {
        Self { matcher, cache }
    }
}

#[async_trait]
impl MatchRunner for CachedMatchRunner {
    async fn run(&self, request: MatchRequest) -> Result<MatchResults> {
        let predicate = self.matcher.resolve_predicate(&request).await?;
        let key = match_cache_key(&self.cache.config().namespace, &request, &predicate)?;

        if let Some(results) = self.cache.get_json::<MatchResults>(&key).await {
            debug!(subsystem = "service", cache_key = %key, "Serving match from cache");
            return Ok(results);
        }

        let results = self.matcher.run_with_predicate(&request, &predicate).await?;
        if let Err(e) = self.cache.set_json(&key, &results, None).await {
            warn!(subsystem = "service", cache_key = %key, error = %e, "Failed to cache match results");
        }
        Ok(results)
    }
}

/// Entry point for callers: accept match requests, report their status and
/// serve cached results.
#[derive(Clone)]
pub struct MatchService {
    matcher: VectorMatcher,
    cache: HybridCache,
    tasks: TaskManager,
}

impl MatchService {
    pub fn new(matcher: VectorMatcher, cache: HybridCache, task_config: TaskConfig) -> Self {
        let runner = Arc::new(CachedMatchRunner::new(matcher.clone(), cache.clone()));
        Self {
            tasks: TaskManager::new(runner, task_config),
            matcher,
            cache,
        }
    }

    pub fn cache(&self) -> &HybridCache {
        &self.cache
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Accept a request and return its task id at once. The match runs in
    /// the background.
    pub fn create_match(&self, request: MatchRequest) -> TaskId {
        self.tasks.create(request)
    }

    pub fn get_status(&self, id: TaskId) -> Result<Task> {
        self.tasks.get_status(id)
    }

    /// Status of a task owned by `requester_id`.
    pub fn get_status_for(&self, requester_id: Uuid, id: TaskId) -> Result<Task> {
        self.tasks.get_status_for(requester_id, id)
    }

    pub async fn wait_for_match(&self, id: TaskId, timeout: Duration) -> Result<WaitOutcome> {
        self.tasks.wait(id, timeout).await
    }

    /// Look up a previously computed result. Never starts a computation;
    /// `Ok(None)` is a miss.
    ///
    /// The requester's stored exclusions are part of the cache key, so this
    /// still reads them. A failure to do so is returned, not treated as a miss.
    #[instrument(
        skip(self, request),
        fields(subsystem = "service", op = "read_cached_match", requester_id = %request.requester_id)
    )]
    pub async fn read_cached_match(&self, request: &MatchRequest) -> Result<Option<MatchResults>> {
        let predicate = self.matcher.resolve_predicate(request).await?;
        let key = match_cache_key(&self.cache.config().namespace, request, &predicate)?;
        let hit = self.cache.get_json::<MatchResults>(&key).await;
        debug!(cache_key = %key, hit = hit.is_some(), "Cached match lookup");
        Ok(hit)
    }

    /// Drop every cached match result. Returns `false` when the distributed
    /// tier could not be cleared yet; the clear is then replayed once it
    /// recovers.
    pub async fn invalidate_cached_matches(&self) -> bool {
        let namespace = self.cache.config().namespace.clone();
        self.cache.clear_namespace(&namespace).await
    }
}

/// Cache tiers for `config`.
///
/// Redis is connected on first use, so an outage at startup is handled like
/// any later one: calls fail over to the local tier and the circuit breaker
/// decides when to try again. `REDIS_ENABLED=false` gives the local tier only.
pub fn build_cache(config: &ServiceConfig) -> Result<HybridCache> {
    if !config.redis_enabled {
        info!(subsystem = "service", "Redis disabled via REDIS_ENABLED=false");
        return Ok(HybridCache::local_only(config.cache.clone()));
    }
    let redis = RedisCache::new(&config.redis_url)?;
    debug!(subsystem = "service", "Redis cache tier connects on first use");
    Ok(HybridCache::new(
        Arc::new(redis),
        config.breaker.clone(),
        config.cache.clone(),
    ))
}

/// A [`MatchService`] wired to PostgreSQL and (optionally) Redis, with its
/// background loops running.
pub struct ServiceRuntime {
    pub service: MatchService,
    pub database: Database,
    reaper: ReaperHandle,
    health_checks: HealthCheckHandle,
}

impl ServiceRuntime {
    /// Open the pool, build the cache tiers and start the reaper and pool
    /// health checks.
    pub async fn start(config: ServiceConfig) -> Result<Self> {
        let fusion = ScoreFusion::new(config.fusion.clone())?;

        let database = Database::new(&config.database_url, config.pool.clone())?;
        database.open().await?;

        let cache = build_cache(&config)?;

        let matcher = VectorMatcher::new(
            Arc::new(database.profiles.clone()),
            Arc::new(database.candidates.clone()),
            Ranker::new(fusion),
        );
        let service = MatchService::new(matcher, cache, config.tasks.clone());
        let reaper = service.tasks().start_reaper();
        let health_checks = database.pool.spawn_health_checks();

        info!(
            subsystem = "service",
            distributed_cache = service.cache().has_distributed_tier(),
            "Match service started"
        );

        Ok(Self {
            service,
            database,
            reaper,
            health_checks,
        })
    }

    /// Stop background loops and close the pool.
    pub async fn shutdown(self) -> Result<()> {
        self.health_checks.shutdown().await;
        self.reaper.shutdown().await?;
        self.database.close();
        info!(subsystem = "service", "Match service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmatch_core::Error;

    #[tokio::test]
    async fn test_unreachable_redis_keeps_distributed_tier() {
        let config = ServiceConfig {
            redis_url: "redis://127.0.0.1:1".to_string(),
            ..ServiceConfig::default()
        };
        let cache = build_cache(&config).unwrap();
        assert!(cache.has_distributed_tier());

        // Connect failures fall back to the local tier and count against the breaker.
        cache.set("k", "v".to_string(), None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert!(cache.stats().distributed_errors > 0);
        assert!(cache.breaker().snapshot().consecutive_failures > 0);
    }

    #[test]
    fn test_redis_disabled_is_local_only() {
        let config = ServiceConfig {
            redis_enabled: false,
            ..ServiceConfig::default()
        };
        assert!(!build_cache(&config).unwrap().has_distributed_tier());
    }

    #[test]
    fn test_invalid_redis_url_is_config_error() {
        let config = ServiceConfig {
            redis_url: "not-a-url".to_string(),
            ..ServiceConfig::default()
        };
        assert!(matches!(build_cache(&config), Err(Error::Config(_))));
    }
}
