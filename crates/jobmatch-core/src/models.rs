//! Core data models for jobmatch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB IDENTIFIERS
// =============================================================================

/// Identifier of a job posting in the data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        JobId(id)
    }
}

/// A job id as received from a caller or collaborator, before normalization.
///
/// Exclusion lists arrive from several sources and are not consistently
/// typed; some deliver integers, some deliver numeric strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawJobId {
    Int(i64),
    Text(String),
}

impl RawJobId {
    /// Normalize to a [`JobId`].
    ///
    /// Strings are trimmed and parsed; non-numeric or negative ids are
    /// rejected rather than dropped.
    pub fn normalize(&self) -> Result<JobId> {
        let id = match self {
            RawJobId::Int(v) => *v,
            RawJobId::Text(s) => s.trim().parse::<i64>().map_err(|_| {
                Error::Validation(format!("job id '{}' is not an integer", s))
            })?,
        };
        if id < 0 {
            return Err(Error::Validation(format!("job id {} is negative", id)));
        }
        Ok(JobId(id))
    }
}

impl From<i64> for RawJobId {
    fn from(v: i64) -> Self {
        RawJobId::Int(v)
    }
}

impl From<&str> for RawJobId {
    fn from(v: &str) -> Self {
        RawJobId::Text(v.to_string())
    }
}

impl From<JobId> for RawJobId {
    fn from(v: JobId) -> Self {
        RawJobId::Int(v.0)
    }
}

// =============================================================================
// EXPERIENCE LEVELS
// =============================================================================

/// Closed set of seniority levels a posting can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Internship,
    Entry,
    Associate,
    MidSenior,
    Director,
    Executive,
}

impl ExperienceLevel {
    /// All recognized levels, in seniority order.
    pub const ALL: [ExperienceLevel; 6] = [
        ExperienceLevel::Internship,
        ExperienceLevel::Entry,
        ExperienceLevel::Associate,
        ExperienceLevel::MidSenior,
        ExperienceLevel::Director,
        ExperienceLevel::Executive,
    ];

    /// Canonical storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceLevel::Internship => "internship",
            ExperienceLevel::Entry => "entry",
            ExperienceLevel::Associate => "associate",
            ExperienceLevel::MidSenior => "mid_senior",
            ExperienceLevel::Director => "director",
            ExperienceLevel::Executive => "executive",
        }
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperienceLevel {
    type Err = Error;

    /// Case-insensitive; accepts `-` or spaces as separators and an optional
    /// trailing "level" ("Mid-Senior level", "entry_level").
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        let normalized = normalized
            .strip_suffix("_level")
            .unwrap_or(&normalized)
            .to_string();
        match normalized.as_str() {
            "internship" | "intern" => Ok(ExperienceLevel::Internship),
            "entry" => Ok(ExperienceLevel::Entry),
            "associate" => Ok(ExperienceLevel::Associate),
            "mid_senior" | "midsenior" => Ok(ExperienceLevel::MidSenior),
            "director" => Ok(ExperienceLevel::Director),
            "executive" => Ok(ExperienceLevel::Executive),
            _ => Err(Error::Validation(format!(
                "unknown experience level '{}'",
                s.trim()
            ))),
        }
    }
}

// =============================================================================
// MATCH REQUEST
// =============================================================================

/// Ordering applied to ranked matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStrategy {
    /// Newest postings first; weak matches lose same-day ties.
    Recency,
    /// Similarity weighted by an exponential date decay.
    #[default]
    Relevance,
}

impl SortStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortStrategy::Recency => "recency",
            SortStrategy::Relevance => "relevance",
        }
    }
}

/// Caller-supplied filters for one match run.
///
/// Values are kept as the caller sent them; [`crate::QueryBuilder`]
/// validates and normalizes them into a [`crate::FilterPredicate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFilters {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub experience_levels: Vec<String>,
    #[serde(default)]
    pub remote_only: bool,
    #[serde(default)]
    pub sort: SortStrategy,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    defaults::PAGE_LIMIT
}

impl Default for MatchFilters {
    fn default() -> Self {
        Self {
            country: None,
            city: None,
            latitude: None,
            longitude: None,
            radius_km: None,
            keywords: Vec::new(),
            experience_levels: Vec::new(),
            remote_only: false,
            sort: SortStrategy::default(),
            offset: defaults::PAGE_OFFSET,
            limit: defaults::PAGE_LIMIT,
        }
    }
}

impl MatchFilters {
    /// Create filters that match every posting.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Restrict to postings within `radius_km` of a point.
    pub fn with_radius(mut self, latitude: f64, longitude: f64, radius_km: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self.radius_km = Some(radius_km);
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_experience_levels<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.experience_levels = levels.into_iter().map(Into::into).collect();
        self
    }

    pub fn remote_only(mut self, remote_only: bool) -> Self {
        self.remote_only = remote_only;
        self
    }

    pub fn sorted_by(mut self, sort: SortStrategy) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Job ids to leave out of the results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    /// Jobs the requester already applied to.
    #[serde(default)]
    pub applied: Vec<RawJobId>,
    /// Jobs in a cool-down window for the requester.
    #[serde(default)]
    pub cooled: Vec<RawJobId>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_applied<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RawJobId>,
    {
        self.applied.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_cooled<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RawJobId>,
    {
        self.cooled.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Union of two exclusion sets (duplicates are removed at normalization).
    pub fn merged_with(&self, other: &ExclusionSet) -> ExclusionSet {
        ExclusionSet {
            applied: self.applied.iter().chain(&other.applied).cloned().collect(),
            cooled: self.cooled.iter().chain(&other.cooled).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.cooled.is_empty()
    }

    /// Normalize, deduplicate and sort every id in both lists.
    pub fn normalized_ids(&self) -> Result<Vec<JobId>> {
        let mut ids = self
            .applied
            .iter()
            .chain(&self.cooled)
            .map(RawJobId::normalize)
            .collect::<Result<Vec<_>>>()?;
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

/// Where the profile vector for a match run comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "vector")]
pub enum ProfileSource {
    /// Vector supplied by the caller.
    Inline(Vec<f32>),
    /// Look the vector up in the profile store by requester id.
    Stored,
}

/// One request to rank postings against a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub requester_id: Uuid,
    pub profile: ProfileSource,
    pub filters: MatchFilters,
    /// Exclusions supplied with the request, merged with those the profile
    /// store holds for the requester.
    #[serde(default)]
    pub exclusions: ExclusionSet,
}

impl MatchRequest {
    /// Request matching against the requester's stored profile vector.
    pub fn for_stored_profile(requester_id: Uuid, filters: MatchFilters) -> Self {
        Self {
            requester_id,
            profile: ProfileSource::Stored,
            filters,
            exclusions: ExclusionSet::default(),
        }
    }

    /// Request matching against a caller-supplied vector.
    pub fn for_vector(requester_id: Uuid, vector: Vec<f32>, filters: MatchFilters) -> Self {
        Self {
            requester_id,
            profile: ProfileSource::Inline(vector),
            filters,
            exclusions: ExclusionSet::default(),
        }
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = exclusions;
        self
    }
}

// =============================================================================
// POSTINGS AND CANDIDATES
// =============================================================================

/// A job posting as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: JobId,
    pub title: String,
    pub description: String,
    pub company: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_remote: bool,
    pub experience_level: Option<ExperienceLevel>,
    pub posted_at: DateTime<Utc>,
}

impl JobPosting {
    /// Metadata carried alongside a ranked candidate.
    pub fn metadata(&self) -> JobMetadata {
        JobMetadata {
            title: self.title.clone(),
            company: self.company.clone(),
            country: self.country.clone(),
            city: self.city.clone(),
            is_remote: self.is_remote,
            experience_level: self.experience_level,
            posted_at: self.posted_at,
        }
    }
}

/// Posting metadata returned with each candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub title: String,
    pub company: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub is_remote: bool,
    pub experience_level: Option<ExperienceLevel>,
    pub posted_at: DateTime<Utc>,
}

/// Raw distance primitives reported by the vector store for one candidate.
///
/// Always `f64`: backend values are cast explicitly before they reach here,
/// and never combined with untyped constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDistances {
    /// Euclidean distance, `[0, inf)`.
    pub l2: f64,
    /// Cosine distance, `[0, 2]`.
    pub cosine: f64,
    /// Negative inner product; lower means more similar.
    pub neg_inner_product: f64,
}

impl RawDistances {
    /// Build from backend values, rejecting NaN or infinite components.
    pub fn new(l2: f64, cosine: f64, neg_inner_product: f64) -> Result<Self> {
        for (name, v) in [
            ("l2", l2),
            ("cosine", cosine),
            ("neg_inner_product", neg_inner_product),
        ] {
            if !v.is_finite() {
                return Err(Error::Query {
                    message: format!("{} distance is not finite ({})", name, v),
                    code: None,
                });
            }
        }
        Ok(Self {
            l2,
            cosine,
            neg_inner_product,
        })
    }
}

/// A posting returned by similarity search, before ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: JobId,
    pub distances: RawDistances,
    pub metadata: JobMetadata,
}

/// A ranked, scored match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch {
    #[serde(flatten)]
    pub candidate: CandidateRecord,
    /// Fused distance in `[0, 1]`; lower is closer.
    pub fused_score: f64,
    /// Match percentage in `[0, 100]`; higher is better.
    pub percentage: f64,
    /// 1-based position in the full ordering (not just this page).
    pub rank: usize,
}

impl RankedMatch {
    pub fn id(&self) -> JobId {
        self.candidate.id
    }
}

/// One page of ranked matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResults {
    pub matches: Vec<RankedMatch>,
    /// Candidates ranked before pagination.
    pub total_candidates: usize,
    pub offset: usize,
    pub limit: usize,
    pub strategy: SortStrategy,
    pub generated_at: DateTime<Utc>,
}

impl MatchResults {
    pub fn ids(&self) -> Vec<JobId> {
        self.matches.iter().map(RankedMatch::id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_job_id_normalizes_strings() {
        assert_eq!(RawJobId::from(" 42 ").normalize().unwrap(), JobId(42));
        assert_eq!(RawJobId::Int(7).normalize().unwrap(), JobId(7));
    }

    #[test]
    fn test_raw_job_id_rejects_garbage() {
        assert!(matches!(
            RawJobId::from("abc").normalize(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            RawJobId::Int(-3).normalize(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_raw_job_id_deserializes_untagged() {
        let ids: Vec<RawJobId> = serde_json::from_str(r#"[1, "2", 3]"#).unwrap();
        assert_eq!(
            ids,
            vec![RawJobId::Int(1), RawJobId::Text("2".into()), RawJobId::Int(3)]
        );
    }

    #[test]
    fn test_experience_level_parsing_variants() {
        assert_eq!(
            "Mid-Senior level".parse::<ExperienceLevel>().unwrap(),
            ExperienceLevel::MidSenior
        );
        assert_eq!(
            "ENTRY_LEVEL".parse::<ExperienceLevel>().unwrap(),
            ExperienceLevel::Entry
        );
        assert_eq!(
            " internship ".parse::<ExperienceLevel>().unwrap(),
            ExperienceLevel::Internship
        );
    }

    #[test]
    fn test_experience_level_unknown_is_validation_error() {
        let err = "rockstar".parse::<ExperienceLevel>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("rockstar"));
    }

    #[test]
    fn test_experience_level_round_trips_canonical_names() {
        for level in ExperienceLevel::ALL {
            assert_eq!(level.as_str().parse::<ExperienceLevel>().unwrap(), level);
        }
    }

    #[test]
    fn test_exclusion_set_normalized_ids_dedup_across_lists() {
        let set = ExclusionSet::new()
            .with_applied([RawJobId::Int(5), RawJobId::from("3")])
            .with_cooled([RawJobId::from("5"), RawJobId::Int(1)]);
        assert_eq!(set.normalized_ids().unwrap(), vec![JobId(1), JobId(3), JobId(5)]);
    }

    #[test]
    fn test_exclusion_set_merge_keeps_both_sides() {
        let a = ExclusionSet::new().with_applied([1i64]);
        let b = ExclusionSet::new().with_cooled([2i64]);
        let merged = a.merged_with(&b);
        assert_eq!(merged.applied, vec![RawJobId::Int(1)]);
        assert_eq!(merged.cooled, vec![RawJobId::Int(2)]);
    }

    #[test]
    fn test_match_filters_default_page() {
        let filters = MatchFilters::default();
        assert_eq!(filters.limit, defaults::PAGE_LIMIT);
        assert_eq!(filters.offset, 0);
        assert_eq!(filters.sort, SortStrategy::Relevance);
    }

    #[test]
    fn test_match_filters_deserialize_defaults_limit() {
        let filters: MatchFilters = serde_json::from_str(r#"{"country":"Germany"}"#).unwrap();
        assert_eq!(filters.country.as_deref(), Some("Germany"));
        assert_eq!(filters.limit, defaults::PAGE_LIMIT);
    }

    #[test]
    fn test_raw_distances_reject_nan() {
        let err = RawDistances::new(0.5, f64::NAN, -0.2).unwrap_err();
        assert!(matches!(err, Error::Query { .. }));
    }

    #[test]
    fn test_profile_source_serialization() {
        let json = serde_json::to_value(ProfileSource::Stored).unwrap();
        assert_eq!(json["kind"], "stored");
        let inline: ProfileSource =
            serde_json::from_str(r#"{"kind":"inline","vector":[0.1,0.2]}"#).unwrap();
        assert_eq!(inline, ProfileSource::Inline(vec![0.1, 0.2]));
    }
}
