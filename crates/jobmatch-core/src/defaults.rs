//! Centralized default constants for jobmatch.
//!
//! **This module is the single source of truth** for shared default values.
//! Component configs reference these constants instead of defining their own
//! magic numbers. Organized by domain area.

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for match results.
pub const PAGE_LIMIT: usize = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Default page offset.
pub const PAGE_OFFSET: usize = 0;

// =============================================================================
// SIMILARITY SEARCH
// =============================================================================

/// Minimum number of nearest candidates fetched before ranking.
///
/// Recency ordering re-sorts by posting date, so the candidate window must be
/// wider than a single page for the re-sort to be meaningful.
pub const MIN_CANDIDATES: usize = 200;

/// Upper bound on nearest candidates fetched for one request.
pub const MAX_CANDIDATES: usize = 1000;

// =============================================================================
// SCORE FUSION
// =============================================================================

/// Weight of the normalized L2 distance in the fused score.
pub const WEIGHT_L2: f64 = 0.4;

/// Weight of the normalized cosine distance in the fused score.
pub const WEIGHT_COSINE: f64 = 0.4;

/// Weight of the normalized negative inner product in the fused score.
pub const WEIGHT_INNER_PRODUCT: f64 = 0.2;

/// Steepness `k` of the percentage curve.
pub const PERCENT_STEEPNESS: f64 = 12.0;

/// Fused score mapped to 50%.
pub const PERCENT_MIDPOINT: f64 = 0.35;

/// Half-life of the date-decay weight used by relevance ordering.
pub const RECENCY_HALF_LIFE_DAYS: f64 = 14.0;

/// Percentage below which a match is pushed behind same-day peers in
/// recency ordering.
pub const RECENCY_LOW_SCORE_PCT: f64 = 40.0;

// =============================================================================
// CONNECTION POOL
// =============================================================================

/// Default minimum number of live connections.
pub const POOL_MIN_SIZE: usize = 2;

/// Default maximum number of live connections.
pub const POOL_MAX_SIZE: usize = 10;

/// Default time an `acquire` may wait for a connection.
pub const POOL_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Maximum lifetime of a single connection (30 minutes).
pub const POOL_MAX_LIFETIME_SECS: u64 = 1_800;

/// Interval between idle-connection health checks.
pub const POOL_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

// =============================================================================
// CACHE
// =============================================================================

/// TTL of a cached match result.
pub const CACHE_TTL_SECS: u64 = 300;

/// Entry capacity of the local fallback tier.
pub const CACHE_LOCAL_CAPACITY: usize = 1_000;

/// Retries against the distributed tier before falling back.
pub const CACHE_MAX_RETRIES: u32 = 2;

/// Base delay of the exponential retry backoff.
pub const CACHE_BACKOFF_BASE_MS: u64 = 25;

/// Ceiling of the exponential retry backoff.
pub const CACHE_BACKOFF_MAX_MS: u64 = 500;

/// Per-operation timeout against the distributed tier.
pub const CACHE_OP_TIMEOUT_MS: u64 = 250;

/// Namespace prefix of match result keys.
pub const CACHE_MATCH_NAMESPACE: &str = "jm:match:";

/// Consecutive failures that open the circuit.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Time the circuit stays open before a trial call is allowed.
pub const BREAKER_RESET_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// TASKS
// =============================================================================

/// Lifetime of a task record before the reaper removes it (1 hour).
pub const TASK_MAX_LIFETIME_SECS: u64 = 3_600;

/// Reaper tick interval.
pub const TASK_REAPER_INTERVAL_SECS: u64 = 60;

/// Matching runs executing at once.
pub const TASK_MAX_CONCURRENT: usize = 8;

/// A matching run exceeding this duration fails its task.
pub const TASK_EXECUTION_TIMEOUT_SECS: u64 = 120;

/// Reaped task ids remembered to answer late polls with "expired".
pub const TASK_TOMBSTONE_CAPACITY: usize = 10_000;

/// Broadcast channel capacity for task events.
pub const EVENT_BUS_CAPACITY: usize = 256;
