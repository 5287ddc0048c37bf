//! Compilation of caller filters into a backend-agnostic predicate.
//!
//! [`QueryBuilder::build`] is pure: it validates and normalizes a
//! [`MatchFilters`] plus the merged [`ExclusionSet`] into a
//! [`FilterPredicate`]. Backends translate the predicate into their own query
//! language; [`FilterPredicate::matches`] evaluates it in memory with the same
//! semantics.
//!
//! # Rules
//!
//! - A radius filter supersedes a city filter entirely. The city is dropped,
//!   so [`LocationPredicate`] can only ever hold one of the two.
//! - Country is always ANDed and is exclusive: remote postings outside the
//!   country are removed too.
//! - City and radius admit remote postings regardless of their location.
//! - Every keyword must appear (case-insensitive) in the title or description.
//! - Experience levels are an OR over a closed set; unknown levels are
//!   rejected, never dropped.
//! - Applied and cooled ids are normalized, deduplicated and merged into a
//!   single exclusion list.

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};
use crate::models::{ExclusionSet, ExperienceLevel, JobId, JobPosting, MatchFilters};

/// Mean Earth radius used for great-circle distances.
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// A point and radius, validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoRadius {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

impl GeoRadius {
    /// Whether `(latitude, longitude)` lies within the radius.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        haversine_km(self.latitude, self.longitude, latitude, longitude) <= self.radius_km
    }
}

/// The single active location constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LocationPredicate {
    /// Lower-cased city name.
    City { name: String },
    Radius(GeoRadius),
}

/// Compiled, normalized form of a request's filters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterPredicate {
    /// Lower-cased country name.
    pub country: Option<String>,
    pub location: Option<LocationPredicate>,
    /// Lower-cased, deduplicated, sorted.
    pub keywords: Vec<String>,
    /// Deduplicated, sorted.
    pub experience_levels: Vec<ExperienceLevel>,
    pub remote_only: bool,
    /// Deduplicated, sorted.
    pub excluded_ids: Vec<JobId>,
}

impl FilterPredicate {
    /// Whether the predicate constrains nothing.
    pub fn is_unconstrained(&self) -> bool {
        self.country.is_none()
            && self.location.is_none()
            && self.keywords.is_empty()
            && self.experience_levels.is_empty()
            && !self.remote_only
            && self.excluded_ids.is_empty()
    }

    /// Evaluate the predicate against a posting.
    pub fn matches(&self, posting: &JobPosting) -> bool {
        if self.excluded_ids.binary_search(&posting.id).is_ok() {
            return false;
        }

        if self.remote_only && !posting.is_remote {
            return false;
        }

        if let Some(country) = &self.country {
            let same = posting
                .country
                .as_deref()
                .map(|c| c.trim().to_lowercase() == *country)
                .unwrap_or(false);
            if !same {
                return false;
            }
        }

        match &self.location {
            Some(LocationPredicate::City { name }) => {
                let same = posting
                    .city
                    .as_deref()
                    .map(|c| c.trim().to_lowercase() == *name)
                    .unwrap_or(false);
                if !same && !posting.is_remote {
                    return false;
                }
            }
            Some(LocationPredicate::Radius(radius)) => {
                let inside = match (posting.latitude, posting.longitude) {
                    (Some(lat), Some(lon)) => radius.contains(lat, lon),
                    _ => false,
                };
                if !inside && !posting.is_remote {
                    return false;
                }
            }
            None => {}
        }

        if !self.experience_levels.is_empty() {
            match posting.experience_level {
                Some(level) if self.experience_levels.contains(&level) => {}
                _ => return false,
            }
        }

        if !self.keywords.is_empty() {
            let title = posting.title.to_lowercase();
            let description = posting.description.to_lowercase();
            let all = self
                .keywords
                .iter()
                .all(|kw| title.contains(kw.as_str()) || description.contains(kw.as_str()));
            if !all {
                return false;
            }
        }

        true
    }
}

/// Translates [`MatchFilters`] into a [`FilterPredicate`]. No I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilder;

impl QueryBuilder {
    /// Validate and compile filters plus exclusions into a predicate.
    ///
    /// Identical inputs always yield an identical predicate.
    pub fn build(filters: &MatchFilters, exclusions: &ExclusionSet) -> Result<FilterPredicate> {
        Self::validate_page(filters)?;

        let radius = Self::build_radius(filters)?;
        let location = match radius {
            Some(radius) => Some(LocationPredicate::Radius(radius)),
            None => normalize_text(filters.city.as_deref())
                .map(|name| LocationPredicate::City { name }),
        };

        let mut keywords: Vec<String> = filters
            .keywords
            .iter()
            .filter_map(|k| normalize_text(Some(k)))
            .collect();
        keywords.sort();
        keywords.dedup();

        let mut experience_levels = filters
            .experience_levels
            .iter()
            .map(|l| l.parse::<ExperienceLevel>())
            .collect::<Result<Vec<_>>>()?;
        experience_levels.sort();
        experience_levels.dedup();

        Ok(FilterPredicate {
            country: normalize_text(filters.country.as_deref()),
            location,
            keywords,
            experience_levels,
            remote_only: filters.remote_only,
            excluded_ids: exclusions.normalized_ids()?,
        })
    }

    /// Reject page sizes outside `1..=MAX_PAGE_LIMIT`.
    ///
    /// An offset past the end is not an error; it yields an empty page.
    pub fn validate_page(filters: &MatchFilters) -> Result<()> {
        if filters.limit == 0 || filters.limit > defaults::MAX_PAGE_LIMIT {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {}, got {}",
                defaults::MAX_PAGE_LIMIT,
                filters.limit
            )));
        }
        Ok(())
    }

    /// Reject empty or non-finite profile vectors before any I/O.
    pub fn validate_vector(vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::validation("profile vector is empty"));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::validation("profile vector contains non-finite values"));
        }
        Ok(())
    }

    fn build_radius(filters: &MatchFilters) -> Result<Option<GeoRadius>> {
        match (filters.latitude, filters.longitude, filters.radius_km) {
            (None, None, None) => Ok(None),
            (Some(latitude), Some(longitude), Some(radius_km)) => {
                if !(-90.0..=90.0).contains(&latitude) {
                    return Err(Error::Validation(format!(
                        "latitude {} outside [-90, 90]",
                        latitude
                    )));
                }
                if !(-180.0..=180.0).contains(&longitude) {
                    return Err(Error::Validation(format!(
                        "longitude {} outside [-180, 180]",
                        longitude
                    )));
                }
                if !radius_km.is_finite() || radius_km <= 0.0 {
                    return Err(Error::Validation(format!(
                        "radius must be a positive distance in km, got {}",
                        radius_km
                    )));
                }
                Ok(Some(GeoRadius {
                    latitude,
                    longitude,
                    radius_km,
                }))
            }
            _ => Err(Error::validation(
                "latitude, longitude and radius_km must be supplied together",
            )),
        }
    }
}

fn normalize_text(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}
