//! Multi-metric score fusion.
//!
//! The vector store reports three distances per candidate, each on its own
//! scale. [`ScoreFusion::fuse`] maps every component onto `[0, 1]` with a
//! monotone transform and combines them with a weighted sum, so the fused
//! score is also in `[0, 1]` and non-decreasing in every raw distance:
//!
//! | Component | Raw range | Normalized |
//! |-----------|-----------|------------|
//! | L2 | `[0, inf)` | `l2 / (1 + l2)` |
//! | cosine | `[0, 2]` | `cosine / 2` |
//! | negative inner product | `(-inf, inf)` | `clamp((nip + 1) / 2, 0, 1)` |
//!
//! The inner-product transform assumes unit-normalized embeddings, where
//! `nip` lies in `[-1, 1]`; anything outside is clamped.
//!
//! [`to_percentage`] turns a fused score into a 0-100 match percentage with a
//! logistic curve whose steepness and midpoint are configuration.

use jobmatch_core::{defaults, Error, RawDistances, Result};

/// Relative weight of each distance component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub l2: f64,
    pub cosine: f64,
    pub inner_product: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            l2: defaults::WEIGHT_L2,
            cosine: defaults::WEIGHT_COSINE,
            inner_product: defaults::WEIGHT_INNER_PRODUCT,
        }
    }
}

impl FusionWeights {
    fn total(&self) -> f64 {
        self.l2 + self.cosine + self.inner_product
    }
}

/// Score fusion and ranking parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    pub weights: FusionWeights,
    /// Logistic steepness `k`; must be positive.
    pub steepness: f64,
    /// Fused score mapped to 50%.
    pub midpoint: f64,
    /// Half-life of the RELEVANCE date decay, in days.
    pub recency_half_life_days: f64,
    /// Below this percentage a match is pushed back within its day under RECENCY.
    pub recency_low_score_pct: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            steepness: defaults::PERCENT_STEEPNESS,
            midpoint: defaults::PERCENT_MIDPOINT,
            recency_half_life_days: defaults::RECENCY_HALF_LIFE_DAYS,
            recency_low_score_pct: defaults::RECENCY_LOW_SCORE_PCT,
        }
    }
}

impl FusionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables (with defaults).
    ///
    /// Reads `MATCH_WEIGHT_L2`, `MATCH_WEIGHT_COSINE`,
    /// `MATCH_WEIGHT_INNER_PRODUCT`, `MATCH_PERCENT_STEEPNESS`,
    /// `MATCH_PERCENT_MIDPOINT` and `MATCH_RECENCY_HALF_LIFE_DAYS`.
    pub fn from_env() -> Self {
        let get = |key: &str, default: f64| -> f64 {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        Self {
            weights: FusionWeights {
                l2: get("MATCH_WEIGHT_L2", defaults::WEIGHT_L2),
                cosine: get("MATCH_WEIGHT_COSINE", defaults::WEIGHT_COSINE),
                inner_product: get("MATCH_WEIGHT_INNER_PRODUCT", defaults::WEIGHT_INNER_PRODUCT),
            },
            steepness: get("MATCH_PERCENT_STEEPNESS", defaults::PERCENT_STEEPNESS),
            midpoint: get("MATCH_PERCENT_MIDPOINT", defaults::PERCENT_MIDPOINT),
            recency_half_life_days: get(
                "MATCH_RECENCY_HALF_LIFE_DAYS",
                defaults::RECENCY_HALF_LIFE_DAYS,
            ),
            recency_low_score_pct: defaults::RECENCY_LOW_SCORE_PCT,
        }
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_curve(mut self, steepness: f64, midpoint: f64) -> Self {
        self.steepness = steepness;
        self.midpoint = midpoint;
        self
    }

    pub fn with_half_life_days(mut self, days: f64) -> Self {
        self.recency_half_life_days = days;
        self
    }

    /// Reject parameters that would break the score range or monotonicity.
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        let finite = [w.l2, w.cosine, w.inner_product, self.midpoint]
            .iter()
            .all(|v| v.is_finite());
        if !finite || w.l2 < 0.0 || w.cosine < 0.0 || w.inner_product < 0.0 {
            return Err(Error::Config(
                "fusion weights must be finite and non-negative".into(),
            ));
        }
        if w.total() <= 0.0 {
            return Err(Error::Config("fusion weights must not all be zero".into()));
        }
        if !(self.steepness.is_finite() && self.steepness > 0.0) {
            return Err(Error::Config("percentage steepness must be positive".into()));
        }
        if !(self.recency_half_life_days.is_finite() && self.recency_half_life_days > 0.0) {
            return Err(Error::Config("recency half-life must be positive".into()));
        }
        Ok(())
    }
}

/// Logistic match percentage: `100 / (1 + e^(k * (score - midpoint)))`.
///
/// Strictly decreasing in `score` for `k > 0`.
pub fn to_percentage(score: f64, steepness: f64, midpoint: f64) -> f64 {
    100.0 / (1.0 + (steepness * (score - midpoint)).exp())
}

/// Combines raw distances into one score.
#[derive(Debug, Clone)]
pub struct ScoreFusion {
    config: FusionConfig,
}

impl ScoreFusion {
    /// Build from validated parameters.
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Weighted fused distance in `[0, 1]`; lower is closer.
    pub fn fuse(&self, d: &RawDistances) -> f64 {
        let w = &self.config.weights;
        let l2 = d.l2.max(0.0);
        let l2 = l2 / (1.0 + l2);
        let cosine = (d.cosine / 2.0).clamp(0.0, 1.0);
        let inner = ((d.neg_inner_product + 1.0) / 2.0).clamp(0.0, 1.0);

        let sum = w.l2 * l2 + w.cosine * cosine + w.inner_product * inner;
        (sum / w.total()).clamp(0.0, 1.0)
    }

    /// Percentage for a fused score using the configured curve.
    pub fn percentage(&self, score: f64) -> f64 {
        to_percentage(score, self.config.steepness, self.config.midpoint)
    }
}

impl Default for ScoreFusion {
    fn default() -> Self {
        Self {
            config: FusionConfig::default(),
        }
    }
}
