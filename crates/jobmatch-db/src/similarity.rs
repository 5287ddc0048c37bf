//! pgvector-backed candidate search.
//!
//! Expects a `job_posting` table with an `embedding vector(N)` column plus the
//! metadata columns read below. All three distance operators are evaluated
//! in one pass and cast to `float8` in SQL so they arrive as `f64` regardless
//! of the column's storage type.

use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, warn};

use jobmatch_core::{
    CandidateRecord, CandidateSearcher, Error, ExperienceLevel, FilterPredicate, JobId,
    JobMetadata, QueryBuilder, RawDistances, Result,
};

use crate::pool::{ConnectionPoolManager, PgConnector};
use crate::predicate_sql::{PredicateSqlBuilder, QueryParam};

/// Map a sqlx failure from the similarity query into the engine taxonomy.
///
/// Backend rejections keep their diagnostic code; transport failures are
/// reported as retryable unavailability.
pub(crate) fn map_query_error(e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::Database(db) => Error::Query {
            message: db.message().to_string(),
            code: db.code().map(|c| c.into_owned()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::ResourceUnavailable(e.to_string()),
        other => Error::Query {
            message: other.to_string(),
            code: None,
        },
    }
}

/// Build the distances for one result row.
///
/// pgvector reports a cosine distance of NaN when either vector has zero
/// norm. Such a posting is treated as orthogonal (cosine distance 1.0), as in
/// the in-memory catalog, instead of failing the whole search.
fn row_distances(l2: f64, cosine: f64, neg_inner_product: f64) -> Result<RawDistances> {
    let cosine = if cosine.is_nan() { 1.0 } else { cosine };
    RawDistances::new(l2, cosine, neg_inner_product)
}

/// Filtered nearest-neighbour search over `job_posting.embedding`.
#[derive(Clone)]
pub struct PgSimilaritySearcher {
    pool: ConnectionPoolManager<PgConnector>,
}

impl PgSimilaritySearcher {
    pub fn new(pool: ConnectionPoolManager<PgConnector>) -> Self {
        Self { pool }
    }

    /// SQL text for a predicate whose clause is `where_clause`, with the
    /// limit bound at `$limit_param`.
    fn query_sql(where_clause: &str, limit_param: usize) -> String {
        format!(
            r#"
            SELECT j.id, j.title, j.company, j.country, j.city, j.is_remote,
                   j.experience_level, j.posted_at,
                   (j.embedding <-> $1::vector)::float8 AS l2_distance,
                   (j.embedding <=> $1::vector)::float8 AS cosine_distance,
                   (j.embedding <#> $1::vector)::float8 AS neg_inner_product
            FROM job_posting j
            WHERE j.embedding IS NOT NULL
              AND {}
            ORDER BY j.embedding <=> $1::vector, j.id
            LIMIT ${}
            "#,
            where_clause, limit_param
        )
    }

    fn candidate_from_row(row: &PgRow) -> Result<CandidateRecord> {
        let distance = |column: &str| -> Result<f64> {
            row.try_get::<Option<f64>, _>(column)
                .map_err(map_query_error)?
                .ok_or_else(|| Error::Query {
                    message: format!("{} is NULL", column),
                    code: None,
                })
        };
        let distances = row_distances(
            distance("l2_distance")?,
            distance("cosine_distance")?,
            distance("neg_inner_product")?,
        )?;

        let level: Option<String> = row.get("experience_level");
        let experience_level = level.and_then(|raw| match ExperienceLevel::from_str(&raw) {
            Ok(level) => Some(level),
            Err(_) => {
                warn!(level = %raw, "Ignoring unknown stored experience level");
                None
            }
        });

        Ok(CandidateRecord {
            id: JobId(row.get::<i64, _>("id")),
            distances,
            metadata: JobMetadata {
                title: row.get("title"),
                company: row.get("company"),
                country: row.get("country"),
                city: row.get("city"),
                is_remote: row.get("is_remote"),
                experience_level,
                posted_at: row.get("posted_at"),
            },
        })
    }
}

#[async_trait]
impl CandidateSearcher for PgSimilaritySearcher {
    async fn search(
        &self,
        vector: &[f32],
        predicate: &FilterPredicate,
        limit: usize,
    ) -> Result<Vec<CandidateRecord>> {
        QueryBuilder::validate_vector(vector)?;
        let start = Instant::now();

        let (where_clause, params) = PredicateSqlBuilder::new(predicate, 1).build();
        let sql = Self::query_sql(&where_clause, params.len() + 2);

        let mut q = sqlx::query(&sql);
        q = q.bind(Vector::from(vector.to_vec())); // $1
        for param in &params {
            q = match param {
                QueryParam::String(s) => q.bind(s),
                QueryParam::StringArray(arr) => q.bind(arr),
                QueryParam::BigIntArray(ids) => q.bind(ids),
                QueryParam::Float(v) => q.bind(v),
            };
        }
        q = q.bind(limit as i64);

        let mut conn = self.pool.acquire().await?;
        let rows = match q.fetch_all(&mut *conn).await {
            Ok(rows) => rows,
            Err(e) => {
                let err = map_query_error(e);
                warn!(
                    subsystem = "db",
                    component = "similarity",
                    op = "search",
                    predicate = ?predicate,
                    error = %err,
                    "Similarity query failed"
                );
                if matches!(err, Error::ResourceUnavailable(_)) {
                    conn.invalidate();
                }
                return Err(err);
            }
        };
        drop(conn);

        let candidates = rows
            .iter()
            .map(Self::candidate_from_row)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            subsystem = "db",
            component = "similarity",
            op = "search",
            result_count = candidates.len(),
            limit,
            duration_ms = start.elapsed().as_millis() as u64,
            "Similarity search complete"
        );
        Ok(candidates)
    }
}
