//! The unit of work executed for each task.

use async_trait::async_trait;

use jobmatch_core::{MatchRequest, MatchResults, Result};

/// Computes the results for one accepted match request.
///
/// Errors become the task's recorded failure, so implementations should
/// return the most specific [`jobmatch_core::Error`] variant available.
#[async_trait]
pub trait MatchRunner: Send + Sync {
    async fn run(&self, request: MatchRequest) -> Result<MatchResults>;
}
