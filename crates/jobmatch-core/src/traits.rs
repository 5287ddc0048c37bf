//! Collaborator interfaces of the matching engine.
//!
//! Concrete implementations live in `jobmatch-db` (PostgreSQL + pgvector) and
//! `jobmatch-search` (in-memory catalog); tests provide their own fakes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::filter::FilterPredicate;
use crate::models::{CandidateRecord, ExclusionSet};

/// Resolves requesters to profile vectors and exclusion lists.
///
/// Retrieval failures must surface as [`crate::Error::Upstream`]. An
/// implementation must never answer a failed lookup with an empty list: an
/// empty [`ExclusionSet`] means "this requester has no exclusions".
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the requester's profile embedding.
    async fn profile_vector(&self, requester_id: Uuid) -> Result<Vec<f32>>;

    /// Fetch the requester's applied and cooled job ids.
    async fn exclusions(&self, requester_id: Uuid) -> Result<ExclusionSet>;
}

/// Executes a filtered similarity query.
#[async_trait]
pub trait CandidateSearcher: Send + Sync {
    /// Return up to `limit` postings matching `predicate`, nearest first,
    /// each with its three raw distance components.
    ///
    /// Failures are returned as errors; partial or empty results are never
    /// substituted for a failed query.
    async fn search(
        &self,
        vector: &[f32],
        predicate: &FilterPredicate,
        limit: usize,
    ) -> Result<Vec<CandidateRecord>>;
}
