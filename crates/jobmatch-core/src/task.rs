//! Task records for asynchronously computed match runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind};
use crate::models::MatchResults;

/// Handle returned to the caller when a match run is accepted.
pub type TaskId = Uuid;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Removed by the reaper after its lifetime. Only appears on the final
    /// record handed out at removal; later lookups answer `TaskExpired`.
    Expired,
}

impl TaskState {
    /// Completed, Failed and Expired never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Expired
        )
    }

    /// Whether the orchestrator may move a task from `self` to `next`.
    ///
    /// Expiry is not reachable here; only the reaper forces it.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending, TaskState::Processing)
                | (TaskState::Pending, TaskState::Failed)
                | (TaskState::Processing, TaskState::Completed)
                | (TaskState::Processing, TaskState::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Expired => "expired",
        }
    }
}

/// Why a task failed, preserved so callers can tell failure classes apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&Error> for TaskFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Snapshot of a task as seen by a poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: Uuid,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<MatchResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
}

impl Task {
    /// A freshly accepted task.
    pub fn pending(id: TaskId, owner_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            state: TaskState::Pending,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Processing.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Expired.is_terminal());
    }

    #[test]
    fn test_orchestrator_transitions() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Processing));
        assert!(TaskState::Processing.can_transition_to(TaskState::Completed));
        assert!(TaskState::Processing.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Processing));
        assert!(!TaskState::Processing.can_transition_to(TaskState::Expired));
    }

    #[test]
    fn test_failure_from_error_keeps_kind() {
        let failure = TaskFailure::from(&Error::Upstream("profile store down".into()));
        assert_eq!(failure.kind, ErrorKind::Upstream);
        assert!(failure.message.contains("profile store down"));
        assert!(!failure.retryable);
    }

    #[test]
    fn test_pending_task_has_no_outcome() {
        let task = Task::pending(Uuid::now_v7(), Uuid::new_v4());
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
    }
}
