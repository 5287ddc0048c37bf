//! # jobmatch-tasks
//!
//! Asynchronous execution of match requests for jobmatch.
//!
//! This crate provides:
//! - A task registry with Pending -> Processing -> Completed | Failed lifecycle
//! - A background executor bounded by a concurrency limit and a per-run timeout
//! - A periodic reaper that removes tasks past their maximum lifetime
//! - Event broadcasting for task progress
//!
//! ## Example
//!
//! ```ignore
//! use jobmatch_tasks::{TaskConfig, TaskManager, WaitOutcome};
//!
//! let manager = TaskManager::new(runner, TaskConfig::from_env());
//! let reaper = manager.start_reaper();
//!
//! let id = manager.create(request);
//! match manager.wait(id, Duration::from_secs(5)).await? {
//!     WaitOutcome::Finished(task) => println!("{:?}", task.result),
//!     WaitOutcome::TimedOut(task) => println!("still {}", task.state.as_str()),
//! }
//!
//! reaper.shutdown().await?;
//! ```

pub mod manager;
pub mod registry;
pub mod runner;

pub use manager::{ReaperHandle, TaskConfig, TaskEvent, TaskManager, WaitOutcome};
pub use registry::{ReapedTask, TaskRegistry};
pub use runner::MatchRunner;

// Re-export core types
pub use jobmatch_core::{Task, TaskFailure, TaskId, TaskState};
