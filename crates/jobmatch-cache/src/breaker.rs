//! Circuit breaker guarding the distributed cache tier.
//!
//! State and failure counter are a single value behind one lock, updated in
//! short synchronous sections that never span an await. Each admitted call
//! receives a [`Permit`] stamped with the breaker generation; the generation
//! advances on every state transition, so an outcome reported after the
//! breaker has moved on is ignored instead of tripping or resetting it twice.
//!
//! ```text
//!  Closed --(failure_threshold consecutive failures)--> Open
//!  Open   --(reset_timeout elapsed, next call)--------> HalfOpen (one trial)
//!  HalfOpen --(trial ok)--> Closed    HalfOpen --(trial failed)--> Open
//! ```

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use jobmatch_core::{defaults, Error, Result};

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::BREAKER_FAILURE_THRESHOLD,
            reset_timeout: Duration::from_millis(defaults::BREAKER_RESET_TIMEOUT_MS),
        }
    }
}

impl BreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `BREAKER_FAILURE_THRESHOLD` and `BREAKER_RESET_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let failure_threshold = std::env::var("BREAKER_FAILURE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::BREAKER_FAILURE_THRESHOLD);
        let reset_ms = std::env::var("BREAKER_RESET_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::BREAKER_RESET_TIMEOUT_MS);
        Self::default()
            .with_failure_threshold(failure_threshold)
            .with_reset_timeout(Duration::from_millis(reset_ms))
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { trial_started: Instant },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    generation: u64,
}

impl Inner {
    fn transition(&mut self, phase: Phase) {
        self.phase = phase;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Admission ticket for one guarded call.
///
/// Report the outcome with [`CircuitBreaker::record_success`] or
/// [`CircuitBreaker::record_failure`]. A permit that is dropped unreported
/// (e.g. the caller was cancelled) counts as nothing; an abandoned trial is
/// superseded after another `reset_timeout`.
#[derive(Debug)]
#[must_use = "report the outcome of the guarded call"]
pub struct Permit {
    generation: u64,
    trial: bool,
}

impl Permit {
    /// Whether this permit is the single HalfOpen trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed { failures: 0 },
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a call or reject it immediately with [`Error::CircuitOpen`].
    pub fn try_acquire(&self) -> Result<Permit> {
        let mut inner = self.lock();
        match inner.phase {
            Phase::Closed { .. } => Ok(Permit {
                generation: inner.generation,
                trial: false,
            }),
            Phase::Open { since } if since.elapsed() >= self.config.reset_timeout => {
                inner.transition(Phase::HalfOpen {
                    trial_started: Instant::now(),
                });
                debug!(
                    breaker = %self.name,
                    breaker_state = BreakerState::HalfOpen.as_str(),
                    "Circuit half-open, admitting trial"
                );
                Ok(Permit {
                    generation: inner.generation,
                    trial: true,
                })
            }
            Phase::HalfOpen { trial_started }
                if trial_started.elapsed() >= self.config.reset_timeout =>
            {
                // The previous trial never reported back.
                inner.transition(Phase::HalfOpen {
                    trial_started: Instant::now(),
                });
                warn!(
                    breaker = %self.name,
                    breaker_state = BreakerState::HalfOpen.as_str(),
                    "Superseding unanswered circuit trial"
                );
                Ok(Permit {
                    generation: inner.generation,
                    trial: true,
                })
            }
            Phase::Open { .. } | Phase::HalfOpen { .. } => Err(Error::CircuitOpen(format!(
                "{} circuit is open",
                self.name
            ))),
        }
    }

    /// Report a successful call.
    pub fn record_success(&self, permit: Permit) {
        let mut inner = self.lock();
        if permit.generation != inner.generation {
            return;
        }
        match inner.phase {
            Phase::Closed { failures } if failures > 0 => {
                inner.phase = Phase::Closed { failures: 0 };
            }
            Phase::HalfOpen { .. } => {
                inner.transition(Phase::Closed { failures: 0 });
                info!(
                    breaker = %self.name,
                    breaker_state = BreakerState::Closed.as_str(),
                    "Circuit closed after successful trial"
                );
            }
            _ => {}
        }
    }

    /// Report a failed call.
    pub fn record_failure(&self, permit: Permit) {
        let mut inner = self.lock();
        if permit.generation != inner.generation {
            return;
        }
        match inner.phase {
            Phase::Closed { failures } => {
                let failures = failures.saturating_add(1);
                if failures >= self.config.failure_threshold {
                    inner.transition(Phase::Open {
                        since: Instant::now(),
                    });
                    warn!(
                        breaker = %self.name,
                        breaker_state = BreakerState::Open.as_str(),
                        failures,
                        reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                        "Circuit opened"
                    );
                } else {
                    inner.phase = Phase::Closed { failures };
                }
            }
            Phase::HalfOpen { .. } => {
                inner.transition(Phase::Open {
                    since: Instant::now(),
                });
                warn!(
                    breaker = %self.name,
                    breaker_state = BreakerState::Open.as_str(),
                    "Circuit trial failed, reopening"
                );
            }
            Phase::Open { .. } => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.snapshot().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let (state, consecutive_failures) = match inner.phase {
            Phase::Closed { failures } => (BreakerState::Closed, failures),
            Phase::Open { .. } => (BreakerState::Open, self.config.failure_threshold),
            Phase::HalfOpen { .. } => (BreakerState::HalfOpen, self.config.failure_threshold),
        };
        BreakerSnapshot {
            state,
            consecutive_failures,
            generation: inner.generation,
        }
    }

    /// Force the breaker back to Closed with a zero counter.
    pub fn reset(&self) {
        self.lock().transition(Phase::Closed { failures: 0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_reset_timeout(Duration::from_millis(reset_ms)),
        )
    }

    fn fail(b: &CircuitBreaker) {
        let p = b.try_acquire().unwrap();
        b.record_failure(p);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let b = breaker(3, 1000);
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 2);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(b.try_acquire(), Err(Error::CircuitOpen(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let b = breaker(3, 1000);
        fail(&b);
        fail(&b);
        let p = b.try_acquire().unwrap();
        b.record_success(p);
        assert_eq!(b.snapshot().consecutive_failures, 0);
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_after_reset_timeout() {
        let b = breaker(1, 1000);
        fail(&b);
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(b.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        let trial = b.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        // Only one trial at a time.
        assert!(b.try_acquire().is_err());

        b.record_success(trial);
        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_restarts_timeout() {
        let b = breaker(1, 1000);
        fail(&b);
        tokio::time::advance(Duration::from_millis(1000)).await;
        let trial = b.try_acquire().unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        b.record_failure(trial);
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(b.try_acquire().is_err());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcomes_ignored() {
        let b = breaker(2, 1000);
        let a = b.try_acquire().unwrap();
        let c = b.try_acquire().unwrap();
        let late = b.try_acquire().unwrap();
        b.record_failure(a);
        b.record_failure(c);
        assert_eq!(b.state(), BreakerState::Open);
        let gen = b.snapshot().generation;

        // A straggler from before the trip neither re-trips nor closes.
        b.record_success(late);
        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.generation, gen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_is_superseded() {
        let b = breaker(1, 1000);
        fail(&b);
        tokio::time::advance(Duration::from_millis(1000)).await;
        let abandoned = b.try_acquire().unwrap();

        tokio::time::advance(Duration::from_millis(1000)).await;
        let fresh = b.try_acquire().unwrap();
        assert!(fresh.is_trial());

        // The abandoned trial's late failure does not reopen the circuit.
        b.record_failure(abandoned);
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success(fresh);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let b = breaker(1, 60_000);
        fail(&b);
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_trip_once() {
        let b = std::sync::Arc::new(breaker(3, 1000));
        let permits: Vec<Permit> = (0..10).map(|_| b.try_acquire().unwrap()).collect();
        let start_gen = b.snapshot().generation;
        for p in permits {
            b.record_failure(p);
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.snapshot().generation, start_gen + 1);
    }
}
