//! # jobmatch-service
//!
//! Caller-facing match service for jobmatch.
//!
//! Wires the storage, search, cache and task crates together behind
//! [`MatchService`]:
//!
//! - `create_match(request) -> TaskId` accepts a request without waiting
//! - `get_status(id)` / `wait_for_match(id, timeout)` report progress
//! - `read_cached_match(request)` serves previously computed results only
//!
//! [`ServiceRuntime::start`] builds the whole stack from a [`ServiceConfig`].

pub mod config;
pub mod service;
pub mod telemetry;

pub use config::{ServiceConfig, DEFAULT_DATABASE_URL};
pub use service::{build_cache, CachedMatchRunner, MatchService, ServiceRuntime};
pub use telemetry::{init_tracing, DEFAULT_LOG_FILTER};
