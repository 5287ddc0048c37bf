//! # jobmatch-db
//!
//! PostgreSQL storage layer for jobmatch.
//!
//! This crate provides:
//! - A bounded connection pool with explicit open/close and health checks
//! - Translation of a [`FilterPredicate`](jobmatch_core::FilterPredicate) into SQL
//! - pgvector similarity search returning L2, cosine and inner-product distances
//! - Requester profile and exclusion lookups
//!
//! ## Example
//!
//! ```rust,ignore
//! use jobmatch_db::{Database, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> jobmatch_core::Result<()> {
//!     let db = Database::new("postgres://localhost/jobmatch", PoolConfig::from_env())?;
//!     db.open().await?;
//!     let vector = db.profiles.profile_vector(requester_id).await?;
//!     Ok(())
//! }
//! ```
pub mod pool;
pub mod predicate_sql;
pub mod profiles;
pub mod similarity;

pub use pool::{
    log_pool_metrics, ConnectionPoolManager, Connector, HealthCheckHandle, HealthReport,
    PgConnector, PoolConfig, PoolStatus, PooledConnection,
};
pub use predicate_sql::{PredicateSqlBuilder, QueryParam};
pub use profiles::PgProfileStore;
pub use similarity::PgSimilaritySearcher;

use jobmatch_core::Result;

/// Connection pool over PostgreSQL connections.
pub type PgPool = ConnectionPoolManager<PgConnector>;

/// Escape LIKE/ILIKE metacharacters so user input matches literally.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// The pool plus the repositories that share it.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
    pub candidates: PgSimilaritySearcher,
    pub profiles: PgProfileStore,
}

impl Database {
    /// Build the layer without connecting.
    pub fn new(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = ConnectionPoolManager::new(PgConnector::new(database_url)?, config)?;
        Ok(Self {
            candidates: PgSimilaritySearcher::new(pool.clone()),
            profiles: PgProfileStore::new(pool.clone()),
            pool,
        })
    }

    /// Open the pool.
    pub async fn open(&self) -> Result<()> {
        self.pool.open().await
    }

    /// Close the pool.
    pub fn close(&self) {
        self.pool.close()
    }
}
