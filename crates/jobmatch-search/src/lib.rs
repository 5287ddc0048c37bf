//! # jobmatch-search
//!
//! Scoring and ranking for jobmatch.
//!
//! This crate provides:
//! - Multi-metric score fusion ([`ScoreFusion`]) and the match percentage curve
//! - RECENCY and RELEVANCE ordering with stable pagination ([`Ranker`])
//! - An exact in-memory [`CandidateSearcher`](jobmatch_core::CandidateSearcher)
//! - [`VectorMatcher`], which runs a complete match request
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use jobmatch_search::{Ranker, VectorMatcher};
//!
//! let matcher = VectorMatcher::new(profiles, searcher, Ranker::default());
//! let results = matcher.run(&request).await?;
//! for m in &results.matches {
//!     println!("#{} job {} ({:.0}%)", m.rank, m.id(), m.percentage);
//! }
//! ```

pub mod fusion;
pub mod matcher;
pub mod memory;
pub mod ranking;

pub use fusion::{to_percentage, FusionConfig, FusionWeights, ScoreFusion};
pub use matcher::{candidate_budget, VectorMatcher};
pub use memory::{exact_distances, CatalogEntry, InMemoryCatalog};
pub use ranking::Ranker;
