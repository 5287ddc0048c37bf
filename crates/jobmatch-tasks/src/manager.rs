//! Asynchronous execution of match requests.
//!
//! [`TaskManager::create`] registers a Pending task and returns its id
//! without waiting on any downstream work. A background tokio task then
//! drives it Pending -> Processing -> Completed | Failed. The reaper removes
//! tasks once they outlive `max_lifetime`, polled or not.
//!
//! Background runs are not cancellable; a caller that stops polling does not
//! free anything before the task is reaped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use jobmatch_core::{
    defaults, Error, ErrorKind, MatchRequest, Result, Task, TaskFailure, TaskId, TaskState,
};

use crate::registry::TaskRegistry;
use crate::runner::MatchRunner;

/// Configuration for the task manager.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Age after which a task is reaped.
    pub max_lifetime: Duration,
    /// Reaper period.
    pub reaper_interval: Duration,
    /// Match runs executing at once; further tasks wait as Pending.
    pub max_concurrent: usize,
    /// Upper bound on a single match run.
    pub execution_timeout: Duration,
    /// How many reaped ids are remembered for `TaskExpired` answers.
    pub tombstone_capacity: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_lifetime: Duration::from_secs(defaults::TASK_MAX_LIFETIME_SECS),
            reaper_interval: Duration::from_secs(defaults::TASK_REAPER_INTERVAL_SECS),
            max_concurrent: defaults::TASK_MAX_CONCURRENT,
            execution_timeout: Duration::from_secs(defaults::TASK_EXECUTION_TIMEOUT_SECS),
            tombstone_capacity: defaults::TASK_TOMBSTONE_CAPACITY,
        }
    }
}

impl TaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TASK_MAX_LIFETIME_SECS` | `3600` | Age at which tasks are reaped |
    /// | `TASK_REAPER_INTERVAL_SECS` | `60` | Reaper period |
    /// | `TASK_MAX_CONCURRENT` | `8` | Concurrent match runs |
    /// | `TASK_EXECUTION_TIMEOUT_SECS` | `120` | Per-run timeout |
    pub fn from_env() -> Self {
        fn secs(key: &str, default: u64) -> Duration {
            Duration::from_secs(
                std::env::var(key)
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default)
                    .max(1),
            )
        }
        let max_concurrent = std::env::var("TASK_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::TASK_MAX_CONCURRENT)
            .max(1);

        Self {
            max_lifetime: secs("TASK_MAX_LIFETIME_SECS", defaults::TASK_MAX_LIFETIME_SECS),
            reaper_interval: secs(
                "TASK_REAPER_INTERVAL_SECS",
                defaults::TASK_REAPER_INTERVAL_SECS,
            ),
            max_concurrent,
            execution_timeout: secs(
                "TASK_EXECUTION_TIMEOUT_SECS",
                defaults::TASK_EXECUTION_TIMEOUT_SECS,
            ),
            tombstone_capacity: defaults::TASK_TOMBSTONE_CAPACITY,
        }
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }
}

/// Event emitted by the task manager.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task was accepted.
    Created { task_id: TaskId, owner_id: Uuid },
    /// A task's match run began.
    Started { task_id: TaskId },
    /// A task completed successfully.
    Completed { task_id: TaskId, result_count: usize },
    /// A task failed.
    Failed { task_id: TaskId, kind: ErrorKind },
    /// A task was removed by the reaper. `state` is its last live state;
    /// `record` is the final record, in state Expired.
    Reaped {
        task_id: TaskId,
        state: TaskState,
        record: Box<Task>,
    },
}

/// Result of [`TaskManager::wait`].
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The task reached a terminal state.
    Finished(Task),
    /// The timeout elapsed first; carries the latest snapshot.
    TimedOut(Task),
}

struct ManagerInner {
    registry: TaskRegistry,
    runner: Arc<dyn MatchRunner>,
    config: TaskConfig,
    permits: Arc<Semaphore>,
    event_tx: broadcast::Sender<TaskEvent>,
}

/// Accepts match requests and runs them in the background.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    pub fn new(runner: Arc<dyn MatchRunner>, config: TaskConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                registry: TaskRegistry::new(config.tombstone_capacity),
                runner,
                permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                config,
                event_tx,
            }),
        }
    }

    pub fn config(&self) -> &TaskConfig {
        &self.inner.config
    }

    /// Accept a request and schedule it. Returns without awaiting any work.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(&self, request: MatchRequest) -> TaskId {
        let task = self.inner.registry.insert(request.requester_id);
        let task_id = task.id;
        let _ = self.inner.event_tx.send(TaskEvent::Created {
            task_id,
            owner_id: task.owner_id,
        });
        debug!(
            subsystem = "tasks",
            task_id = %task_id,
            requester_id = %request.requester_id,
            "Task accepted"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.execute(task_id, request).await;
        });
        task_id
    }

    /// Current snapshot of a task.
    pub fn get_status(&self, id: TaskId) -> Result<Task> {
        self.inner.registry.get(id)
    }

    /// Like [`get_status`](Self::get_status), but tasks belonging to another
    /// owner are reported as not found.
    pub fn get_status_for(&self, owner_id: Uuid, id: TaskId) -> Result<Task> {
        let task = self.inner.registry.get(id)?;
        if task.owner_id != owner_id {
            return Err(Error::TaskNotFound(id));
        }
        Ok(task)
    }

    /// Wait until the task is terminal or `timeout` elapses.
    pub async fn wait(&self, id: TaskId, timeout: Duration) -> Result<WaitOutcome> {
        let (task, mut done) = self.inner.registry.subscribe(id)?;
        if task.is_terminal() {
            return Ok(WaitOutcome::Finished(task));
        }

        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, done.changed()).await {
                Ok(Ok(())) => {
                    let task = self.inner.registry.get(id)?;
                    if task.is_terminal() {
                        return Ok(WaitOutcome::Finished(task));
                    }
                }
                // Sender dropped: the task was reaped while we waited.
                Ok(Err(_)) => return Err(Error::TaskExpired(id)),
                Err(_) => return Ok(WaitOutcome::TimedOut(self.inner.registry.get(id)?)),
            }
        }
    }

    /// Remove every task older than `max_lifetime`. Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let reaped = self.inner.registry.reap(self.inner.config.max_lifetime);
        let count = reaped.len();
        for task in reaped {
            if !task.state.is_terminal() {
                warn!(
                    subsystem = "tasks",
                    task_id = %task.id,
                    state = task.state.as_str(),
                    "Reaped task that never finished"
                );
            }
            let _ = self.inner.event_tx.send(TaskEvent::Reaped {
                task_id: task.id,
                state: task.state,
                record: Box::new(task.record),
            });
        }
        if count > 0 {
            info!(
                subsystem = "tasks",
                component = "reaper",
                reaped = count,
                remaining = self.inner.registry.len(),
                "Reaped expired tasks"
            );
        }
        count
    }

    /// Run [`reap_expired`](Self::reap_expired) every `reaper_interval`.
    pub fn start_reaper(&self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let manager = self.clone();
        let period = self.inner.config.reaper_interval;

        let join = tokio::spawn(async move {
            info!(
                subsystem = "tasks",
                component = "reaper",
                interval_secs = period.as_secs(),
                max_lifetime_secs = manager.inner.config.max_lifetime.as_secs(),
                "Task reaper started"
            );
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        manager.reap_expired();
                    }
                }
            }
            info!(subsystem = "tasks", component = "reaper", "Task reaper stopped");
        });

        ReaperHandle { shutdown_tx, join }
    }

    /// Tasks currently held (not yet reaped).
    pub fn task_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Get a receiver for task events.
    pub fn events(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Drop every task. Intended for tests and process shutdown.
    pub fn reset(&self) {
        self.inner.registry.clear();
    }
}

impl ManagerInner {
    #[instrument(skip_all, fields(subsystem = "tasks", task_id = %task_id))]
    async fn execute(&self, task_id: TaskId, request: MatchRequest) {
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.finish_failed(task_id, Error::Internal("task executor closed".into()));
                return;
            }
        };

        if let Err(e) = self
            .registry
            .transition(task_id, TaskState::Processing, None, None)
        {
            debug!(error = %e, "Task gone before it started");
            return;
        }
        let _ = self.event_tx.send(TaskEvent::Started { task_id });
        let start = Instant::now();

        let run = AssertUnwindSafe(self.runner.run(request)).catch_unwind();
        let outcome = match tokio::time::timeout(self.config.execution_timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => {
                error!("Match run panicked");
                Err(Error::Internal("match run panicked".into()))
            }
            Err(_) => Err(Error::ResourceUnavailable(format!(
                "match run exceeded {}s",
                self.config.execution_timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(results) => {
                let result_count = results.matches.len();
                match self.registry.transition(
                    task_id,
                    TaskState::Completed,
                    Some(results),
                    None,
                ) {
                    Ok(_) => {
                        let _ = self.event_tx.send(TaskEvent::Completed {
                            task_id,
                            result_count,
                        });
                        info!(
                            result_count,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Task completed"
                        );
                    }
                    Err(e) => debug!(error = %e, "Task reaped before completion was recorded"),
                }
            }
            Err(e) => self.finish_failed(task_id, e),
        }
    }

    fn finish_failed(&self, task_id: TaskId, err: Error) {
        let failure = TaskFailure::from(&err);
        let kind = failure.kind;
        match self
            .registry
            .transition(task_id, TaskState::Failed, None, Some(failure))
        {
            Ok(_) => {
                let _ = self.event_tx.send(TaskEvent::Failed { task_id, kind });
                warn!(task_id = %task_id, error = %err, "Task failed");
            }
            Err(e) => debug!(task_id = %task_id, error = %e, "Task reaped before failure was recorded"),
        }
    }
}

/// Handle for controlling a running reaper.
pub struct ReaperHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper to stop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.join
            .await
            .map_err(|e| Error::Internal(format!("reaper task failed: {}", e)))
    }
}
