//! Service configuration assembled from the environment.

use jobmatch_cache::{BreakerConfig, CacheConfig, DEFAULT_REDIS_URL};
use jobmatch_db::PoolConfig;
use jobmatch_search::FusionConfig;
use jobmatch_tasks::TaskConfig;

/// Default PostgreSQL URL when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/jobmatch";

/// Every component configuration the service wires together.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub pool: PoolConfig,
    /// Use Redis as the distributed cache tier.
    pub redis_enabled: bool,
    pub redis_url: String,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub fusion: FusionConfig,
    pub tasks: TaskConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            pool: PoolConfig::default(),
            redis_enabled: true,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            fusion: FusionConfig::default(),
            tasks: TaskConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load `.env` (if present), then read every component's variables.
    ///
    /// - `DATABASE_URL` (default: postgres://localhost/jobmatch)
    /// - `REDIS_ENABLED`: set to "false" or "0" to run on the local tier only (default: true)
    /// - `REDIS_URL` (default: redis://localhost:6379)
    ///
    /// Pool, cache, breaker, fusion and task variables are documented on
    /// their own config types.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let redis_enabled = std::env::var("REDIS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            pool: PoolConfig::from_env(),
            redis_enabled,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            cache: CacheConfig::from_env(),
            breaker: BreakerConfig::from_env(),
            fusion: FusionConfig::from_env(),
            tasks: TaskConfig::from_env(),
        }
    }
}
