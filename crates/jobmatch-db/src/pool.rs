//! Database connection pool management.
//!
//! [`ConnectionPoolManager`] keeps between `min_size` and `max_size` live
//! connections. Construction does no I/O; connections are only established by
//! an explicit [`ConnectionPoolManager::open`]. A checked-out
//! [`PooledConnection`] belongs to its holder until it is dropped (returned),
//! released, or invalidated.
//!
//! Capacity is enforced with a semaphore of `max_size` permits. A new
//! connection is only created while holding a permit and when no idle
//! connection is available, so live connections never exceed `max_size`.
//! Internal accounting uses short synchronous critical sections; no lock is
//! held across an await point.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use jobmatch_core::{defaults, Error, Result};

/// Opens and validates raw connections for the pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Establish a new connection.
    async fn connect(&self) -> Result<Self::Connection>;

    /// Cheap liveness check for an idle connection.
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool;
}

/// [`Connector`] producing PostgreSQL connections.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    /// Parse a `postgres://` URL. No connection is attempted.
    pub fn new(database_url: &str) -> Result<Self> {
        let options = database_url
            .parse::<PgConnectOptions>()
            .map_err(|e| Error::Config(format!("invalid DATABASE_URL: {}", e)))?;
        Ok(Self { options })
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection> {
        PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| Error::ResourceUnavailable(format!("database connect failed: {}", e)))
    }

    async fn is_valid(&self, conn: &mut PgConnection) -> bool {
        conn.ping().await.is_ok()
    }
}

/// Pool configuration options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Live connections kept open by `open` and `health_check`.
    pub min_size: usize,
    /// Hard cap on live connections.
    pub max_size: usize,
    /// How long `acquire` waits before failing with `ResourceUnavailable`.
    pub acquire_timeout: Duration,
    /// Connections older than this are retired instead of reused.
    pub max_lifetime: Option<Duration>,
    /// Period of the background health check.
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: defaults::POOL_MIN_SIZE,
            max_size: defaults::POOL_MAX_SIZE,
            acquire_timeout: Duration::from_millis(defaults::POOL_ACQUIRE_TIMEOUT_MS),
            max_lifetime: Some(Duration::from_secs(defaults::POOL_MAX_LIFETIME_SECS)),
            health_check_interval: Duration::from_secs(defaults::POOL_HEALTH_CHECK_INTERVAL_SECS),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `POOL_MIN_SIZE` | `2` | Connections kept open |
    /// | `POOL_MAX_SIZE` | `10` | Connection cap |
    /// | `POOL_ACQUIRE_TIMEOUT_MS` | `5000` | Acquire wait bound |
    /// | `POOL_MAX_LIFETIME_SECS` | `1800` | Connection lifetime (`0` = unbounded) |
    /// | `POOL_HEALTH_CHECK_INTERVAL_SECS` | `30` | Health check period |
    pub fn from_env() -> Self {
        let min_size = env_parse("POOL_MIN_SIZE").unwrap_or(defaults::POOL_MIN_SIZE);
        let max_size = env_parse("POOL_MAX_SIZE")
            .unwrap_or(defaults::POOL_MAX_SIZE)
            .max(1);
        let acquire_timeout_ms =
            env_parse("POOL_ACQUIRE_TIMEOUT_MS").unwrap_or(defaults::POOL_ACQUIRE_TIMEOUT_MS);
        let max_lifetime_secs: u64 =
            env_parse("POOL_MAX_LIFETIME_SECS").unwrap_or(defaults::POOL_MAX_LIFETIME_SECS);
        let health_secs = env_parse("POOL_HEALTH_CHECK_INTERVAL_SECS")
            .unwrap_or(defaults::POOL_HEALTH_CHECK_INTERVAL_SECS);

        Self {
            min_size: min_size.min(max_size),
            max_size,
            acquire_timeout: Duration::from_millis(acquire_timeout_ms),
            max_lifetime: (max_lifetime_secs > 0).then(|| Duration::from_secs(max_lifetime_secs)),
            health_check_interval: Duration::from_secs(health_secs.max(1)),
        }
    }

    /// Set the minimum number of live connections.
    pub fn min_size(mut self, n: usize) -> Self {
        self.min_size = n;
        self
    }

    /// Set the maximum number of live connections.
    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = n;
        self
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the health check period.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config("pool max_size must be at least 1".into()));
        }
        if self.min_size > self.max_size {
            return Err(Error::Config(format!(
                "pool min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

const STATE_UNOPENED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

struct IdleConnection<T> {
    conn: T,
    created_at: Instant,
}

struct PoolShared<C: Connector> {
    connector: C,
    config: PoolConfig,
    state: AtomicU8,
    idle: Mutex<VecDeque<IdleConnection<C::Connection>>>,
    permits: Arc<Semaphore>,
    live: AtomicUsize,
}

impl<C: Connector> PoolShared<C> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection<C::Connection>>> {
        // The queue holds plain values; a panic mid-push cannot leave it torn.
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    fn is_expired(&self, created_at: Instant) -> bool {
        self.config
            .max_lifetime
            .map(|lifetime| created_at.elapsed() >= lifetime)
            .unwrap_or(false)
    }

    fn retire(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    /// Reserve a live slot below `cap`.
    fn reserve(self: &Arc<Self>, cap: usize) -> Option<SlotReservation<C>> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < cap).then_some(live + 1)
            })
            .ok()
            .map(|_| SlotReservation {
                shared: Arc::clone(self),
                committed: false,
            })
    }

    fn check_in(&self, conn: C::Connection, created_at: Instant) {
        if !self.is_open() || self.is_expired(created_at) {
            drop(conn);
            self.retire();
            return;
        }
        self.idle().push_back(IdleConnection { conn, created_at });
    }
}

/// A live-count slot taken before connecting; returned if the connect fails
/// or the acquiring future is dropped.
struct SlotReservation<C: Connector> {
    shared: Arc<PoolShared<C>>,
    committed: bool,
}

impl<C: Connector> SlotReservation<C> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl<C: Connector> Drop for SlotReservation<C> {
    fn drop(&mut self) {
        if !self.committed {
            self.shared.retire();
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
    pub min_size: usize,
    pub max_size: usize,
}

/// Outcome of one health check pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Idle connections that answered the ping.
    pub healthy: usize,
    /// Idle connections that failed the ping and were dropped.
    pub dead: usize,
    /// Idle connections dropped for exceeding `max_lifetime`.
    pub expired: usize,
    /// Connections opened to restore `min_size`.
    pub opened: usize,
}

/// Bounded pool of connections with an explicit open/close lifecycle.
pub struct ConnectionPoolManager<C: Connector> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connector> Clone for ConnectionPoolManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> ConnectionPoolManager<C> {
    /// Build an unopened pool. Performs no I/O.
    pub fn new(connector: C, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_size));
        Ok(Self {
            shared: Arc::new(PoolShared {
                connector,
                config,
                state: AtomicU8::new(STATE_UNOPENED),
                idle: Mutex::new(VecDeque::new()),
                permits,
                live: AtomicUsize::new(0),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Open `min_size` connections and start serving `acquire`.
    ///
    /// If any initial connection fails the pool returns to the unopened
    /// state with nothing held, and the error is returned.
    #[instrument(skip(self), fields(subsystem = "db", component = "pool", op = "open"))]
    pub async fn open(&self) -> Result<()> {
        let start = Instant::now();
        self.shared
            .state
            .compare_exchange(
                STATE_UNOPENED,
                STATE_OPEN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|state| {
                Error::Internal(match state {
                    STATE_OPEN => "connection pool is already open".to_string(),
                    _ => "connection pool has been closed".to_string(),
                })
            })?;

        for _ in 0..self.shared.config.min_size {
            let Some(slot) = self.shared.reserve(self.shared.config.min_size) else {
                break;
            };
            match self.shared.connector.connect().await {
                Ok(conn) => {
                    slot.commit();
                    self.shared.check_in(conn, Instant::now());
                }
                Err(e) => {
                    drop(slot);
                    self.shared.state.store(STATE_UNOPENED, Ordering::Release);
                    let drained = std::mem::take(&mut *self.shared.idle());
                    self.shared.live.fetch_sub(drained.len(), Ordering::AcqRel);
                    warn!(error = %e, "Failed to open connection pool");
                    return Err(e);
                }
            }
        }

        let status = self.status();
        info!(
            pool_live = status.live,
            min_size = status.min_size,
            max_size = status.max_size,
            duration_ms = start.elapsed().as_millis() as u64,
            "Connection pool opened"
        );
        Ok(())
    }

    /// Check out a connection, waiting up to `acquire_timeout`.
    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        if !self.shared.is_open() {
            return Err(match self.shared.state.load(Ordering::Acquire) {
                STATE_CLOSED => Error::ResourceUnavailable("connection pool is closed".into()),
                _ => Error::Internal("connection pool is not open".into()),
            });
        }

        let timeout = self.shared.config.acquire_timeout;
        match tokio::time::timeout(timeout, self.acquire_inner()).await {
            Ok(result) => result,
            Err(_) => {
                let status = self.status();
                warn!(
                    subsystem = "db",
                    component = "pool",
                    op = "acquire",
                    pool_live = status.live,
                    pool_idle = status.idle,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for a connection"
                );
                Err(Error::ResourceUnavailable(format!(
                    "no connection available within {}ms (max_size {})",
                    timeout.as_millis(),
                    self.shared.config.max_size
                )))
            }
        }
    }

    async fn acquire_inner(&self) -> Result<PooledConnection<C>> {
        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::ResourceUnavailable("connection pool is closed".into()))?;

        loop {
            let next = self.shared.idle().pop_front();
            match next {
                Some(idle) if self.shared.is_expired(idle.created_at) => {
                    debug!(subsystem = "db", component = "pool", "Retiring expired idle connection");
                    drop(idle);
                    self.shared.retire();
                }
                Some(idle) => {
                    return Ok(PooledConnection::new(
                        idle.conn,
                        idle.created_at,
                        Arc::clone(&self.shared),
                        permit,
                    ));
                }
                None => break,
            }
        }

        let slot = self.shared.reserve(self.shared.config.max_size).ok_or_else(|| {
            Error::ResourceUnavailable("connection pool is at capacity".into())
        })?;
        let conn = self.shared.connector.connect().await?;
        slot.commit();
        debug!(
            subsystem = "db",
            component = "pool",
            pool_live = self.shared.live.load(Ordering::Acquire),
            "Opened new connection"
        );
        Ok(PooledConnection::new(
            conn,
            Instant::now(),
            Arc::clone(&self.shared),
            permit,
        ))
    }

    /// Return a connection to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<C>) {
        drop(conn);
    }

    /// Ping idle connections, drop dead or expired ones, and reopen
    /// connections until `min_size` live connections exist again.
    ///
    /// Connections checked out by callers are never touched.
    #[instrument(skip(self), fields(subsystem = "db", component = "pool", op = "health_check"))]
    pub async fn health_check(&self) -> Result<HealthReport> {
        if !self.shared.is_open() {
            return Err(Error::Internal("connection pool is not open".into()));
        }

        let mut report = HealthReport::default();
        let to_check = self.shared.idle().len();

        for _ in 0..to_check {
            // Holding a permit keeps the connection under examination counted
            // against max_size.
            let Ok(permit) = Arc::clone(&self.shared.permits).try_acquire_owned() else {
                break;
            };
            let Some(mut idle) = self.shared.idle().pop_front() else {
                break;
            };

            if self.shared.is_expired(idle.created_at) {
                drop(idle);
                self.shared.retire();
                report.expired += 1;
            } else if self.shared.connector.is_valid(&mut idle.conn).await {
                self.shared.check_in(idle.conn, idle.created_at);
                report.healthy += 1;
            } else {
                drop(idle);
                self.shared.retire();
                report.dead += 1;
            }
            drop(permit);
        }

        while self.shared.is_open() {
            let Ok(permit) = Arc::clone(&self.shared.permits).try_acquire_owned() else {
                break;
            };
            let Some(slot) = self.shared.reserve(self.shared.config.min_size) else {
                break;
            };
            match self.shared.connector.connect().await {
                Ok(conn) => {
                    slot.commit();
                    self.shared.check_in(conn, Instant::now());
                    report.opened += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to replace connection during health check");
                    break;
                }
            }
            drop(permit);
        }

        if report.dead > 0 || report.expired > 0 {
            warn!(
                dead = report.dead,
                expired = report.expired,
                opened = report.opened,
                "Replaced unhealthy pool connections"
            );
        }
        log_pool_metrics(&self.status());
        Ok(report)
    }

    /// Current pool counters.
    pub fn status(&self) -> PoolStatus {
        let max_size = self.shared.config.max_size;
        PoolStatus {
            live: self.shared.live.load(Ordering::Acquire),
            idle: self.shared.idle().len(),
            in_use: max_size.saturating_sub(self.shared.permits.available_permits()),
            min_size: self.shared.config.min_size,
            max_size,
        }
    }

    /// Stop serving connections and drop all idle ones.
    ///
    /// Checked-out connections are dropped when their holders return them.
    pub fn close(&self) {
        self.shared.state.store(STATE_CLOSED, Ordering::Release);
        self.shared.permits.close();
        let drained = std::mem::take(&mut *self.shared.idle());
        self.shared.live.fetch_sub(drained.len(), Ordering::AcqRel);
        info!(
            subsystem = "db",
            component = "pool",
            op = "close",
            dropped = drained.len(),
            "Connection pool closed"
        );
    }

    /// Run `health_check` every `health_check_interval` until shut down.
    pub fn spawn_health_checks(&self) -> HealthCheckHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let pool = self.clone();
        let interval = self.shared.config.health_check_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sleep(interval) => {}
                }
                if !pool.shared.is_open() {
                    break;
                }
                if let Err(e) = pool.health_check().await {
                    warn!(error = %e, "Pool health check failed");
                }
            }
            debug!(subsystem = "db", component = "pool", "Health check loop stopped");
        });

        HealthCheckHandle { shutdown_tx }
    }
}

/// Handle for stopping the background health check loop.
pub struct HealthCheckHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl HealthCheckHandle {
    /// Signal the health check loop to stop.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// A checked-out connection. Dropping it returns it to the pool.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    created_at: Instant,
    shared: Arc<PoolShared<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    fn new(
        conn: C::Connection,
        created_at: Instant,
        shared: Arc<PoolShared<C>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            shared,
            _permit: permit,
        }
    }

    /// Time since the underlying connection was established.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Discard a connection known to be broken instead of returning it.
    pub fn invalidate(mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn);
            self.shared.retire();
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection is present until the guard is consumed")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("connection is present until the guard is consumed")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.check_in(conn, self.created_at);
        }
    }
}

/// Log current pool health metrics.
///
/// Emits a debug-level record with pool counters and warns when every
/// connection is checked out (potential exhaustion).
pub fn log_pool_metrics(status: &PoolStatus) {
    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_live = status.live,
        pool_idle = status.idle,
        in_use = status.in_use,
        "Pool health check"
    );

    if status.in_use >= status.max_size {
        warn!(
            subsystem = "db",
            component = "pool",
            max_size = status.max_size,
            "Connection pool has no free capacity, potential exhaustion"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Connector whose connections can be killed from the test.
    #[derive(Clone, Default)]
    struct ScriptedConnector {
        connects: Arc<AtomicUsize>,
        fail_connect: Arc<AtomicBool>,
        kill_all: Arc<AtomicBool>,
    }

    struct ScriptedConn {
        id: usize,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Connection = ScriptedConn;

        async fn connect(&self) -> Result<ScriptedConn> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(Error::ResourceUnavailable("refused".into()));
            }
            let id = self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedConn { id })
        }

        async fn is_valid(&self, _conn: &mut ScriptedConn) -> bool {
            !self.kill_all.load(Ordering::SeqCst)
        }
    }

    fn config(min: usize, max: usize) -> PoolConfig {
        PoolConfig::new()
            .min_size(min)
            .max_size(max)
            .acquire_timeout(Duration::from_millis(100))
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new()
            .max_size(20)
            .min_size(5)
            .acquire_timeout(Duration::from_secs(60));

        assert_eq!(config.max_size, 20);
        assert_eq!(config.min_size, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let connector = ScriptedConnector::default();
        assert!(ConnectionPoolManager::new(connector.clone(), config(5, 2)).is_err());
        assert!(ConnectionPoolManager::new(connector, config(0, 0)).is_err());
    }

    #[tokio::test]
    async fn test_construction_performs_no_io() {
        let connector = ScriptedConnector::default();
        let pool = ConnectionPoolManager::new(connector.clone(), config(2, 4)).unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        assert_eq!(pool.status().live, 0);
    }

    #[tokio::test]
    async fn test_acquire_before_open_fails() {
        let pool = ConnectionPoolManager::new(ScriptedConnector::default(), config(1, 2)).unwrap();
        assert!(matches!(pool.acquire().await, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_open_fills_min_size() {
        let connector = ScriptedConnector::default();
        let pool = ConnectionPoolManager::new(connector.clone(), config(3, 5)).unwrap();
        pool.open().await.unwrap();
        let status = pool.status();
        assert_eq!(status.live, 3);
        assert_eq!(status.idle, 3);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let pool = ConnectionPoolManager::new(ScriptedConnector::default(), config(1, 2)).unwrap();
        pool.open().await.unwrap();
        assert!(pool.open().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_open_leaves_pool_unopened() {
        let connector = ScriptedConnector::default();
        connector.fail_connect.store(true, Ordering::SeqCst);
        let pool = ConnectionPoolManager::new(connector.clone(), config(2, 4)).unwrap();
        assert!(pool.open().await.is_err());
        assert_eq!(pool.status().live, 0);

        connector.fail_connect.store(false, Ordering::SeqCst);
        pool.open().await.unwrap();
        assert_eq!(pool.status().live, 2);
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let connector = ScriptedConnector::default();
        let pool = ConnectionPoolManager::new(connector.clone(), config(1, 2)).unwrap();
        pool.open().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        let first_id = conn.id;
        pool.release(conn);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id, first_id);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_beyond_max_times_out() {
        let pool = ConnectionPoolManager::new(ScriptedConnector::default(), config(0, 2)).unwrap();
        pool.open().await.unwrap();

        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, Error::ResourceUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(pool.status().live, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_released_connection() {
        let pool = ConnectionPoolManager::new(
            ScriptedConnector::default(),
            config(0, 1).acquire_timeout(Duration::from_secs(5)),
        )
        .unwrap();
        pool.open().await.unwrap();

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|c| c.id) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        let id = waiter.await.unwrap().unwrap();
        assert_eq!(id, 0);
        assert_eq!(pool.status().live, 1);
    }

    #[tokio::test]
    async fn test_live_never_exceeds_max_under_contention() {
        let pool = ConnectionPoolManager::new(
            ScriptedConnector::default(),
            config(0, 3).acquire_timeout(Duration::from_secs(5)),
        )
        .unwrap();
        pool.open().await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let pool = pool.clone();
            tasks.spawn(async move {
                let conn = pool.acquire().await.unwrap();
                assert!(pool.status().live <= 3);
                tokio::task::yield_now().await;
                drop(conn);
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }
        assert!(pool.status().live <= 3);
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_invalidate_drops_connection() {
        let pool = ConnectionPoolManager::new(ScriptedConnector::default(), config(1, 2)).unwrap();
        pool.open().await.unwrap();
        let conn = pool.acquire().await.unwrap();
        conn.invalidate();
        let status = pool.status();
        assert_eq!(status.live, 0);
        assert_eq!(status.idle, 0);
    }

    #[tokio::test]
    async fn test_health_check_replaces_dead_connections() {
        let connector = ScriptedConnector::default();
        let pool = ConnectionPoolManager::new(connector.clone(), config(2, 4)).unwrap();
        pool.open().await.unwrap();

        connector.kill_all.store(true, Ordering::SeqCst);
        let report = pool.health_check().await.unwrap();
        assert_eq!(report.dead, 2);
        assert_eq!(report.opened, 2);
        assert_eq!(pool.status().live, 2);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_retires_expired_connections() {
        let connector = ScriptedConnector::default();
        let pool = ConnectionPoolManager::new(
            connector.clone(),
            config(1, 2).max_lifetime(Some(Duration::from_secs(60))),
        )
        .unwrap();
        pool.open().await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let report = pool.health_check().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.opened, 1);
        assert_eq!(pool.status().live, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_connection_not_returned_to_idle() {
        let pool = ConnectionPoolManager::new(
            ScriptedConnector::default(),
            config(0, 2).max_lifetime(Some(Duration::from_secs(10))),
        )
        .unwrap();
        pool.open().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        drop(conn);
        assert_eq!(pool.status().live, 0);
        assert_eq!(pool.status().idle, 0);
    }

    #[tokio::test]
    async fn test_health_check_leaves_checked_out_connections_alone() {
        let connector = ScriptedConnector::default();
        let pool = ConnectionPoolManager::new(connector.clone(), config(1, 2)).unwrap();
        pool.open().await.unwrap();

        let held = pool.acquire().await.unwrap();
        connector.kill_all.store(true, Ordering::SeqCst);
        let report = pool.health_check().await.unwrap();
        assert_eq!(report.dead, 0);
        assert_eq!(report.opened, 0);
        assert_eq!(held.id, 0);
    }

    #[tokio::test]
    async fn test_close_rejects_acquire() {
        let pool = ConnectionPoolManager::new(ScriptedConnector::default(), config(2, 2)).unwrap();
        pool.open().await.unwrap();
        pool.close();
        assert_eq!(pool.status().live, 0);
        assert!(matches!(
            pool.acquire().await,
            Err(Error::ResourceUnavailable(_))
        ));
    }

    #[test]
    fn test_pg_connector_rejects_bad_url() {
        assert!(matches!(
            PgConnector::new("not a url"),
            Err(Error::Config(_))
        ));
    }
}
