//! In-memory candidate searcher.
//!
//! Exact (brute-force) search over a fixed catalog, evaluating the predicate
//! with [`FilterPredicate::matches`]. Suitable for fixtures and small
//! deployments; distances follow pgvector's operators so results are
//! interchangeable with the database searcher.

use async_trait::async_trait;
use tracing::trace;

use jobmatch_core::{
    CandidateRecord, CandidateSearcher, Error, FilterPredicate, JobPosting, QueryBuilder,
    RawDistances, Result,
};

/// The three raw distances between `query` and `stored`, computed in `f64`.
///
/// Matches pgvector: `<->` is (non-squared) Euclidean distance, `<=>` is
/// `1 - cosine_similarity` (1.0 when either norm is zero), `<#>` is the
/// negative dot product.
pub fn exact_distances(query: &[f32], stored: &[f32]) -> Result<RawDistances> {
    if query.len() != stored.len() {
        return Err(Error::Query {
            message: format!(
                "different vector dimensions {} and {}",
                query.len(),
                stored.len()
            ),
            code: None,
        });
    }

    let mut dot = 0.0f64;
    let mut norm_q = 0.0f64;
    let mut norm_s = 0.0f64;
    let mut sq = 0.0f64;
    for (q, s) in query.iter().zip(stored) {
        let (q, s) = (f64::from(*q), f64::from(*s));
        dot += q * s;
        norm_q += q * q;
        norm_s += s * s;
        sq += (q - s) * (q - s);
    }

    let denom = norm_q.sqrt() * norm_s.sqrt();
    let cosine = if denom < 1e-12 { 1.0 } else { 1.0 - dot / denom };
    RawDistances::new(sq.sqrt(), cosine, -dot)
}

/// A posting plus its embedding.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub posting: JobPosting,
    pub embedding: Vec<f32>,
}

/// Brute-force [`CandidateSearcher`] over postings held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    entries: Vec<CatalogEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posting(mut self, posting: JobPosting, embedding: Vec<f32>) -> Self {
        self.insert(posting, embedding);
        self
    }

    /// Add or replace a posting.
    pub fn insert(&mut self, posting: JobPosting, embedding: Vec<f32>) {
        self.entries.retain(|e| e.posting.id != posting.id);
        self.entries.push(CatalogEntry { posting, embedding });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CandidateSearcher for InMemoryCatalog {
    async fn search(
        &self,
        vector: &[f32],
        predicate: &FilterPredicate,
        limit: usize,
    ) -> Result<Vec<CandidateRecord>> {
        QueryBuilder::validate_vector(vector)?;

        let mut hits = Vec::new();
        for entry in &self.entries {
            if !predicate.matches(&entry.posting) {
                trace!(job_id = %entry.posting.id, "Filtered out");
                continue;
            }
            hits.push(CandidateRecord {
                id: entry.posting.id,
                distances: exact_distances(vector, &entry.embedding)?,
                metadata: entry.posting.metadata(),
            });
        }

        hits.sort_by(|a, b| {
            a.distances
                .cosine
                .total_cmp(&b.distances.cosine)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
