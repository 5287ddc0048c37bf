//! # jobmatch-core
//!
//! Core types, traits, and abstractions for the jobmatch engine.
//!
//! This crate provides the data model shared by every other crate: match
//! requests and filters, the compiled [`FilterPredicate`] and its
//! [`QueryBuilder`], candidate and ranked-match records, task records, the
//! error taxonomy, and the collaborator traits the engine calls out to.
//!
//! ## Structured logging fields
//!
//! All crates log with `tracing` using the same field names: `subsystem`
//! ("db", "search", "cache", "tasks", "service"), `component`, `op`,
//! `task_id`, `requester_id`, `cache_key`, `duration_ms`, `result_count`,
//! `breaker_state`, `pool_live`, `pool_idle`.

pub mod defaults;
pub mod error;
pub mod filter;
pub mod models;
pub mod task;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorKind, Result};
pub use filter::{haversine_km, FilterPredicate, GeoRadius, LocationPredicate, QueryBuilder};
pub use models::*;
pub use task::{Task, TaskFailure, TaskId, TaskState};
pub use traits::{CandidateSearcher, ProfileStore};
