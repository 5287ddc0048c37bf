//! Ordering strategies and pagination for fused matches.
//!
//! Both strategies produce a total order (ties fall back to job id) so that
//! consecutive pages never repeat or skip a posting for the same candidates.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::debug;

use jobmatch_core::{CandidateRecord, MatchResults, RankedMatch, SortStrategy};

use crate::fusion::ScoreFusion;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Scores, orders and paginates candidates.
#[derive(Debug, Clone, Default)]
pub struct Ranker {
    fusion: ScoreFusion,
}

impl Ranker {
    pub fn new(fusion: ScoreFusion) -> Self {
        Self { fusion }
    }

    pub fn fusion(&self) -> &ScoreFusion {
        &self.fusion
    }

    /// Exponential date decay: 1.0 for a posting made at `now`, halving every
    /// `recency_half_life_days`. Future-dated postings count as fresh.
    pub fn date_decay(&self, posted_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_days = ((now - posted_at).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0);
        0.5_f64.powf(age_days / self.fusion.config().recency_half_life_days)
    }

    /// Rank every candidate, then return the `offset..offset + limit` page.
    ///
    /// `rank` is assigned over the full ordering. An offset past the end
    /// yields an empty page.
    pub fn rank(
        &self,
        candidates: Vec<CandidateRecord>,
        strategy: SortStrategy,
        offset: usize,
        limit: usize,
        now: DateTime<Utc>,
    ) -> MatchResults {
        let total_candidates = candidates.len();
        let mut scored: Vec<(f64, RankedMatch)> = candidates
            .into_iter()
            .map(|candidate| {
                let fused_score = self.fusion.fuse(&candidate.distances);
                let percentage = self.fusion.percentage(fused_score);
                let key = match strategy {
                    SortStrategy::Relevance => {
                        (1.0 - fused_score) * self.date_decay(candidate.metadata.posted_at, now)
                    }
                    SortStrategy::Recency => 0.0,
                };
                (
                    key,
                    RankedMatch {
                        candidate,
                        fused_score,
                        percentage,
                        rank: 0,
                    },
                )
            })
            .collect();

        match strategy {
            SortStrategy::Relevance => scored.sort_by(|(ka, a), (kb, b)| {
                kb.total_cmp(ka).then_with(|| a.id().cmp(&b.id()))
            }),
            SortStrategy::Recency => {
                let low = self.fusion.config().recency_low_score_pct;
                scored.sort_by(|(_, a), (_, b)| recency_order(a, b, low))
            }
        }

        let matches: Vec<RankedMatch> = scored
            .into_iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(i, (_, mut m))| {
                m.rank = i + 1;
                m
            })
            .collect();

        debug!(
            subsystem = "search",
            component = "ranker",
            strategy = strategy.as_str(),
            total_candidates,
            result_count = matches.len(),
            offset,
            limit,
            "Ranking complete"
        );

        MatchResults {
            matches,
            total_candidates,
            offset,
            limit,
            strategy,
            generated_at: now,
        }
    }
}

/// Newest posting day first; within a day, matches below `low_pct` sink
/// below the rest, then closer fused score, then id.
fn recency_order(a: &RankedMatch, b: &RankedMatch, low_pct: f64) -> Ordering {
    let day_a = a.candidate.metadata.posted_at.date_naive();
    let day_b = b.candidate.metadata.posted_at.date_naive();
    let weak_a = a.percentage < low_pct;
    let weak_b = b.percentage < low_pct;

    day_b
        .cmp(&day_a)
        .then_with(|| weak_a.cmp(&weak_b))
        .then_with(|| a.fused_score.total_cmp(&b.fused_score))
        .then_with(|| a.id().cmp(&b.id()))
}
