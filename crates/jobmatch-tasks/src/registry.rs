//! In-memory task registry.
//!
//! All access goes through [`TaskRegistry`]'s methods, each of which runs as
//! one critical section under a single lock. Create, transition and reap for
//! the same id therefore never interleave, and no lock is held across an
//! await.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use jobmatch_core::{Error, MatchResults, Result, Task, TaskFailure, TaskId, TaskState};

struct Entry {
    task: Task,
    created: Instant,
    /// Flips to `true` once the task is terminal. Dropped on reap.
    done: watch::Sender<bool>,
}

struct State {
    entries: HashMap<TaskId, Entry>,
    /// Ids removed by the reaper, so late polls can tell "expired" from "unknown".
    tombstones: LruCache<TaskId, ()>,
}

/// A task removed by [`TaskRegistry::reap`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReapedTask {
    pub id: TaskId,
    pub owner_id: Uuid,
    /// Last live state before removal.
    pub state: TaskState,
    /// Final record, marked [`TaskState::Expired`] at removal time.
    pub record: Task,
}

/// Owner of every task record.
pub struct TaskRegistry {
    state: Mutex<State>,
}

impl TaskRegistry {
    pub fn new(tombstone_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(tombstone_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                tombstones: LruCache::new(capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn missing(state: &State, id: TaskId) -> Error {
        if state.tombstones.contains(&id) {
            Error::TaskExpired(id)
        } else {
            Error::TaskNotFound(id)
        }
    }

    /// Register a new Pending task for `owner_id`.
    pub fn insert(&self, owner_id: Uuid) -> Task {
        let id = Uuid::now_v7();
        let task = Task::pending(id, owner_id);
        let (done, _) = watch::channel(false);
        self.lock().entries.insert(
            id,
            Entry {
                task: task.clone(),
                created: Instant::now(),
                done,
            },
        );
        task
    }

    pub fn get(&self, id: TaskId) -> Result<Task> {
        let state = self.lock();
        state
            .entries
            .get(&id)
            .map(|e| e.task.clone())
            .ok_or_else(|| Self::missing(&state, id))
    }

    /// Snapshot plus a receiver that fires when the task turns terminal
    /// (or errors when it is reaped).
    pub fn subscribe(&self, id: TaskId) -> Result<(Task, watch::Receiver<bool>)> {
        let state = self.lock();
        match state.entries.get(&id) {
            Some(entry) => Ok((entry.task.clone(), entry.done.subscribe())),
            None => Err(Self::missing(&state, id)),
        }
    }

    /// Move a task to `next`, recording its outcome.
    ///
    /// Illegal transitions are rejected with [`Error::Internal`]; a task that
    /// has already been reaped yields [`Error::TaskExpired`].
    pub fn transition(
        &self,
        id: TaskId,
        next: TaskState,
        result: Option<MatchResults>,
        error: Option<TaskFailure>,
    ) -> Result<Task> {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(&id) else {
            return Err(Self::missing(&state, id));
        };
        if !entry.task.state.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal task transition {} -> {} for {}",
                entry.task.state.as_str(),
                next.as_str(),
                id
            )));
        }
        entry.task.state = next;
        entry.task.updated_at = Utc::now();
        entry.task.result = result;
        entry.task.error = error;
        if next.is_terminal() {
            entry.done.send_replace(true);
        }
        Ok(entry.task.clone())
    }

    /// Physically remove every task older than `max_lifetime`, whatever its
    /// state, and remember the ids as expired.
    pub fn reap(&self, max_lifetime: Duration) -> Vec<ReapedTask> {
        let mut state = self.lock();
        let expired: Vec<TaskId> = state
            .entries
            .iter()
            .filter(|(_, e)| e.created.elapsed() >= max_lifetime)
            .map(|(id, _)| *id)
            .collect();

        let mut reaped = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(entry) = state.entries.remove(&id) {
                state.tombstones.put(id, ());
                let last_state = entry.task.state;
                let mut record = entry.task;
                record.state = TaskState::Expired;
                record.updated_at = Utc::now();
                reaped.push(ReapedTask {
                    id,
                    owner_id: record.owner_id,
                    state: last_state,
                    record,
                });
            }
        }
        reaped
    }

    /// Live (not yet reaped) tasks.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every task and tombstone.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.tombstones.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_get_is_pending() {
        let registry = TaskRegistry::new(16);
        let owner = Uuid::new_v4();
        let task = registry.insert(owner);
        let fetched = registry.get(task.id).unwrap();
        assert_eq!(fetched.state, TaskState::Pending);
        assert_eq!(fetched.owner_id, owner);
    }

    #[test]
    fn test_unknown_id_not_found() {
        let registry = TaskRegistry::new(16);
        assert!(matches!(
            registry.get(Uuid::new_v4()),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let registry = TaskRegistry::new(16);
        let task = registry.insert(Uuid::new_v4());
        let err = registry
            .transition(task.id, TaskState::Completed, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(registry.get(task.id).unwrap().state, TaskState::Pending);
    }

    #[tokio::test]
    async fn test_terminal_transition_notifies_subscribers() {
        let registry = TaskRegistry::new(16);
        let task = registry.insert(Uuid::new_v4());
        let (_, mut rx) = registry.subscribe(task.id).unwrap();

        registry
            .transition(task.id, TaskState::Processing, None, None)
            .unwrap();
        registry
            .transition(task.id, TaskState::Failed, None, None)
            .unwrap();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_removes_and_tombstones() {
        let registry = TaskRegistry::new(16);
        let old = registry.insert(Uuid::new_v4());
        tokio::time::advance(Duration::from_secs(30)).await;
        let young = registry.insert(Uuid::new_v4());

        let reaped = registry.reap(Duration::from_secs(30));
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id, old.id);
        assert_eq!(reaped[0].state, TaskState::Pending);
        assert_eq!(reaped[0].record.state, TaskState::Expired);
        assert!(reaped[0].record.updated_at >= old.updated_at);
        assert_eq!(registry.len(), 1);
        assert!(matches!(registry.get(old.id), Err(Error::TaskExpired(_))));
        assert!(registry.get(young.id).is_ok());
        assert!(matches!(
            registry.transition(old.id, TaskState::Processing, None, None),
            Err(Error::TaskExpired(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_closes_watchers() {
        let registry = TaskRegistry::new(16);
        let task = registry.insert(Uuid::new_v4());
        let (_, mut rx) = registry.subscribe(task.id).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        registry.reap(Duration::from_secs(1));
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tombstones_are_bounded() {
        let registry = TaskRegistry::new(1);
        let a = registry.insert(Uuid::new_v4());
        let b = registry.insert(Uuid::new_v4());
        tokio::time::advance(Duration::from_secs(2)).await;
        registry.reap(Duration::from_secs(1));

        let expired = [a.id, b.id]
            .iter()
            .filter(|id| matches!(registry.get(**id), Err(Error::TaskExpired(_))))
            .count();
        assert_eq!(expired, 1);
    }
}
