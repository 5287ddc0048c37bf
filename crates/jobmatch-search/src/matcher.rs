//! End-to-end match run: resolve profile and exclusions, filter, search, rank.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use jobmatch_core::{
    defaults, CandidateSearcher, Error, ExclusionSet, FilterPredicate, MatchFilters,
    MatchRequest, MatchResults, ProfileSource, ProfileStore, QueryBuilder, Result,
};

use crate::ranking::Ranker;

/// Number of candidates to pull from the searcher for a page.
///
/// Every candidate has to be ranked before a page can be cut, so the fetch
/// covers at least `offset + limit`, within `[MIN_CANDIDATES, MAX_CANDIDATES]`.
pub fn candidate_budget(filters: &MatchFilters) -> usize {
    filters
        .offset
        .saturating_add(filters.limit)
        .clamp(defaults::MIN_CANDIDATES, defaults::MAX_CANDIDATES)
}

/// Treat anything the profile store reports, other than a missing profile,
/// as an upstream failure.
fn as_upstream(e: Error) -> Error {
    match e {
        Error::Upstream(_) | Error::ProfileNotFound(_) => e,
        other => Error::Upstream(other.to_string()),
    }
}

/// Orchestrates one match computation over its collaborators.
#[derive(Clone)]
pub struct VectorMatcher {
    profiles: Arc<dyn ProfileStore>,
    searcher: Arc<dyn CandidateSearcher>,
    ranker: Ranker,
}

impl VectorMatcher {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        searcher: Arc<dyn CandidateSearcher>,
        ranker: Ranker,
    ) -> Self {
        Self {
            profiles,
            searcher,
            ranker,
        }
    }

    /// Request exclusions merged with the requester's stored ones.
    ///
    /// A store failure is returned as [`Error::Upstream`]; it is never
    /// replaced by an empty set.
    pub async fn resolve_exclusions(
        &self,
        requester_id: Uuid,
        request_exclusions: &ExclusionSet,
    ) -> Result<ExclusionSet> {
        let stored = self
            .profiles
            .exclusions(requester_id)
            .await
            .map_err(as_upstream)?;
        Ok(request_exclusions.merged_with(&stored))
    }

    /// Compile a request into its final predicate, including stored exclusions.
    pub async fn resolve_predicate(&self, request: &MatchRequest) -> Result<FilterPredicate> {
        QueryBuilder::build(&request.filters, &request.exclusions)?;
        let exclusions = self
            .resolve_exclusions(request.requester_id, &request.exclusions)
            .await?;
        QueryBuilder::build(&request.filters, &exclusions)
    }

    async fn resolve_vector(&self, request: &MatchRequest) -> Result<Vec<f32>> {
        let vector = match &request.profile {
            ProfileSource::Inline(vector) => vector.clone(),
            ProfileSource::Stored => self
                .profiles
                .profile_vector(request.requester_id)
                .await
                .map_err(as_upstream)?,
        };
        QueryBuilder::validate_vector(&vector)?;
        Ok(vector)
    }

    /// Run a match as of the current time.
    pub async fn run(&self, request: &MatchRequest) -> Result<MatchResults> {
        self.run_at(request, Utc::now()).await
    }

    /// Run a match, ageing postings relative to `now`.
    #[instrument(
        skip(self, request, now),
        fields(subsystem = "search", component = "matcher", op = "run", requester_id = %request.requester_id)
    )]
    pub async fn run_at(&self, request: &MatchRequest, now: DateTime<Utc>) -> Result<MatchResults> {
        let start = Instant::now();

        // Malformed filters and inline vectors are rejected before any I/O.
        QueryBuilder::build(&request.filters, &request.exclusions)?;
        if let ProfileSource::Inline(vector) = &request.profile {
            QueryBuilder::validate_vector(vector)?;
        }

        let (vector, predicate) =
            tokio::try_join!(self.resolve_vector(request), self.resolve_predicate(request))?;
        debug!(predicate = ?predicate, "Predicate built");

        self.search_and_rank(request, &vector, &predicate, now, start)
            .await
    }

    /// Run a match against a predicate the caller already resolved with
    /// [`resolve_predicate`](Self::resolve_predicate).
    #[instrument(
        skip(self, request, predicate),
        fields(subsystem = "search", component = "matcher", op = "run_with_predicate", requester_id = %request.requester_id)
    )]
    pub async fn run_with_predicate(
        &self,
        request: &MatchRequest,
        predicate: &FilterPredicate,
    ) -> Result<MatchResults> {
        let start = Instant::now();
        let vector = self.resolve_vector(request).await?;
        self.search_and_rank(request, &vector, predicate, Utc::now(), start)
            .await
    }

    async fn search_and_rank(
        &self,
        request: &MatchRequest,
        vector: &[f32],
        predicate: &FilterPredicate,
        now: DateTime<Utc>,
        start: Instant,
    ) -> Result<MatchResults> {
        let budget = candidate_budget(&request.filters);
        let candidates = match self.searcher.search(vector, predicate, budget).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, predicate = ?predicate, "Candidate search failed");
                return Err(e);
            }
        };

        let results = self.ranker.rank(
            candidates,
            request.filters.sort,
            request.filters.offset,
            request.filters.limit,
            now,
        );

        info!(
            result_count = results.matches.len(),
            total_candidates = results.total_candidates,
            duration_ms = start.elapsed().as_millis() as u64,
            "Match run complete"
        );
        Ok(results)
    }
}
