//! SQL WHERE clause generation for [`FilterPredicate`].
//!
//! Clauses reference the `job_posting` table under the alias `j` and use
//! positional parameters starting after `param_offset`, so the fragment can be
//! spliced into a query that already binds its own leading parameters.

use jobmatch_core::{FilterPredicate, LocationPredicate};

use crate::escape_like;

/// Type-safe parameter binding for SQL queries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    /// Text parameter.
    String(String),
    /// Array of text (for `= ANY` matching).
    StringArray(Vec<String>),
    /// Array of bigint (for `<> ALL` exclusion).
    BigIntArray(Vec<i64>),
    /// Double precision parameter.
    Float(f64),
}

/// Generates the WHERE clause fragment for a compiled predicate.
///
/// # Example
///
/// ```rust,ignore
/// use jobmatch_db::predicate_sql::PredicateSqlBuilder;
///
/// let (sql, params) = PredicateSqlBuilder::new(&predicate, 1).build();
/// // sql: "LOWER(j.country) = $2 AND j.id <> ALL($3::bigint[])"
/// ```
pub struct PredicateSqlBuilder<'a> {
    predicate: &'a FilterPredicate,
    param_offset: usize,
}

impl<'a> PredicateSqlBuilder<'a> {
    /// # Parameters
    ///
    /// * `predicate` - The compiled filter predicate
    /// * `param_offset` - Number of parameters already bound in the enclosing query
    pub fn new(predicate: &'a FilterPredicate, param_offset: usize) -> Self {
        Self {
            predicate,
            param_offset,
        }
    }

    /// Build the clause and its parameters, in binding order.
    ///
    /// An unconstrained predicate yields `("TRUE", [])`.
    pub fn build(&self) -> (String, Vec<QueryParam>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        let mut idx = self.param_offset;
        let p = self.predicate;

        if !p.excluded_ids.is_empty() {
            idx += 1;
            clauses.push(format!("j.id <> ALL(${}::bigint[])", idx));
            params.push(QueryParam::BigIntArray(
                p.excluded_ids.iter().map(|id| id.0).collect(),
            ));
        }

        if p.remote_only {
            clauses.push("j.is_remote".to_string());
        }

        if let Some(country) = &p.country {
            idx += 1;
            clauses.push(format!("LOWER(TRIM(j.country)) = ${}", idx));
            params.push(QueryParam::String(country.clone()));
        }

        match &p.location {
            Some(LocationPredicate::City { name }) => {
                idx += 1;
                clauses.push(format!(
                    "(LOWER(TRIM(j.city)) = ${} OR j.is_remote)",
                    idx
                ));
                params.push(QueryParam::String(name.clone()));
            }
            Some(LocationPredicate::Radius(radius)) => {
                let (lon, lat, meters) = (idx + 1, idx + 2, idx + 3);
                idx += 3;
                clauses.push(format!(
                    "(j.is_remote OR (j.latitude IS NOT NULL AND j.longitude IS NOT NULL AND \
                     ST_DWithin(ST_SetSRID(ST_MakePoint(j.longitude, j.latitude), 4326)::geography, \
                     ST_SetSRID(ST_MakePoint(${}, ${}), 4326)::geography, ${})))",
                    lon, lat, meters
                ));
                params.push(QueryParam::Float(radius.longitude));
                params.push(QueryParam::Float(radius.latitude));
                params.push(QueryParam::Float(radius.radius_km * 1000.0));
            }
            None => {}
        }

        if !p.experience_levels.is_empty() {
            idx += 1;
            clauses.push(format!("j.experience_level = ANY(${}::text[])", idx));
            params.push(QueryParam::StringArray(
                p.experience_levels
                    .iter()
                    .map(|l| l.as_str().to_string())
                    .collect(),
            ));
        }

        // One clause per keyword: every keyword must be present.
        for keyword in &p.keywords {
            idx += 1;
            clauses.push(format!(
                "(j.title ILIKE ${0} ESCAPE '\\' OR j.description ILIKE ${0} ESCAPE '\\')",
                idx
            ));
            params.push(QueryParam::String(format!("%{}%", escape_like(keyword))));
        }

        if clauses.is_empty() {
            return ("TRUE".to_string(), params);
        }
        (clauses.join(" AND "), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmatch_core::{ExperienceLevel, GeoRadius, JobId};

    #[test]
    fn test_unconstrained_predicate() {
        let predicate = FilterPredicate::default();
        let (sql, params) = PredicateSqlBuilder::new(&predicate, 1).build();
        assert_eq!(sql, "TRUE");
        assert!(params.is_empty());
    }

    #[test]
    fn test_country_and_exclusions_numbered_after_offset() {
        let predicate = FilterPredicate {
            country: Some("germany".into()),
            excluded_ids: vec![JobId(3), JobId(9)],
            ..Default::default()
        };
        let (sql, params) = PredicateSqlBuilder::new(&predicate, 2).build();
        assert_eq!(
            sql,
            "j.id <> ALL($3::bigint[]) AND LOWER(TRIM(j.country)) = $4"
        );
        assert_eq!(
            params,
            vec![
                QueryParam::BigIntArray(vec![3, 9]),
                QueryParam::String("germany".into()),
            ]
        );
    }

    #[test]
    fn test_city_admits_remote() {
        let predicate = FilterPredicate {
            location: Some(LocationPredicate::City {
                name: "berlin".into(),
            }),
            ..Default::default()
        };
        let (sql, _) = PredicateSqlBuilder::new(&predicate, 0).build();
        assert_eq!(sql, "(LOWER(TRIM(j.city)) = $1 OR j.is_remote)");
    }

    #[test]
    fn test_radius_binds_meters() {
        let predicate = FilterPredicate {
            location: Some(LocationPredicate::Radius(GeoRadius {
                latitude: 52.52,
                longitude: 13.405,
                radius_km: 25.0,
            })),
            ..Default::default()
        };
        let (sql, params) = PredicateSqlBuilder::new(&predicate, 1).build();
        assert!(sql.contains("ST_MakePoint($2, $3)"));
        assert!(sql.contains(", $4)))"));
        assert!(sql.starts_with("(j.is_remote OR"));
        assert_eq!(params[0], QueryParam::Float(13.405));
        assert_eq!(params[1], QueryParam::Float(52.52));
        assert_eq!(params[2], QueryParam::Float(25_000.0));
    }

    #[test]
    fn test_each_keyword_gets_own_clause() {
        let predicate = FilterPredicate {
            keywords: vec!["fastapi".into(), "python".into()],
            ..Default::default()
        };
        let (sql, params) = PredicateSqlBuilder::new(&predicate, 1).build();
        assert_eq!(sql.matches("ILIKE").count(), 4);
        assert!(sql.contains("$2"));
        assert!(sql.contains("$3"));
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], QueryParam::String("%fastapi%".into()));
    }

    #[test]
    fn test_keyword_wildcards_escaped() {
        let predicate = FilterPredicate {
            keywords: vec!["100%_remote".into()],
            ..Default::default()
        };
        let (_, params) = PredicateSqlBuilder::new(&predicate, 0).build();
        assert_eq!(params[0], QueryParam::String("%100\\%\\_remote%".into()));
    }

    #[test]
    fn test_experience_levels_any() {
        let predicate = FilterPredicate {
            experience_levels: vec![ExperienceLevel::Entry, ExperienceLevel::MidSenior],
            remote_only: true,
            ..Default::default()
        };
        let (sql, params) = PredicateSqlBuilder::new(&predicate, 1).build();
        assert_eq!(sql, "j.is_remote AND j.experience_level = ANY($2::text[])");
        assert_eq!(
            params,
            vec![QueryParam::StringArray(vec![
                ExperienceLevel::Entry.as_str().to_string(),
                ExperienceLevel::MidSenior.as_str().to_string(),
            ])]
        );
    }

    #[test]
    fn test_param_count_matches_placeholders() {
        let predicate = FilterPredicate {
            country: Some("germany".into()),
            location: Some(LocationPredicate::Radius(GeoRadius {
                latitude: 48.1,
                longitude: 11.6,
                radius_km: 10.0,
            })),
            keywords: vec!["rust".into()],
            experience_levels: vec![ExperienceLevel::Director],
            remote_only: false,
            excluded_ids: vec![JobId(1)],
        };
        let offset = 1;
        let (sql, params) = PredicateSqlBuilder::new(&predicate, offset).build();
        let highest = offset + params.len();
        assert!(sql.contains(&format!("${}", highest)));
        assert!(!sql.contains(&format!("${}", highest + 1)));
    }
}
