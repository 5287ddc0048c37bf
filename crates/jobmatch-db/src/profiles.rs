//! Requester profiles and exclusion lists stored in PostgreSQL.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;
use tracing::{debug, warn};
use uuid::Uuid;

use jobmatch_core::{Error, ExclusionSet, ProfileStore, RawJobId, Result};

use crate::pool::{ConnectionPoolManager, PgConnector};

fn upstream(what: &str, requester_id: Uuid, e: impl std::fmt::Display) -> Error {
    warn!(
        subsystem = "db",
        component = "profiles",
        requester_id = %requester_id,
        error = %e,
        "Failed to load {}", what
    );
    Error::Upstream(format!("failed to load {} for {}: {}", what, requester_id, e))
}

/// [`ProfileStore`] over the `job_seeker_profile`, `job_application` and
/// `job_cooldown` tables.
///
/// Cooldown rows store the job reference as text (it is written by an
/// external scheduler); they are passed through as [`RawJobId::Text`] and
/// normalized with everything else.
#[derive(Clone)]
pub struct PgProfileStore {
    pool: ConnectionPoolManager<PgConnector>,
}

impl PgProfileStore {
    pub fn new(pool: ConnectionPoolManager<PgConnector>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn profile_vector(&self, requester_id: Uuid) -> Result<Vec<f32>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| upstream("profile", requester_id, e))?;

        let row = sqlx::query(
            "SELECT embedding FROM job_seeker_profile WHERE requester_id = $1 AND embedding IS NOT NULL",
        )
        .bind(requester_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| upstream("profile", requester_id, e))?;

        let row = row.ok_or(Error::ProfileNotFound(requester_id))?;
        let vector: Vector = row
            .try_get("embedding")
            .map_err(|e| upstream("profile", requester_id, e))?;
        Ok(vector.to_vec())
    }

    async fn exclusions(&self, requester_id: Uuid) -> Result<ExclusionSet> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| upstream("exclusions", requester_id, e))?;

        let applied: Vec<i64> =
            sqlx::query_scalar("SELECT job_id FROM job_application WHERE requester_id = $1")
                .bind(requester_id)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| upstream("applied jobs", requester_id, e))?;

        let cooled: Vec<String> = sqlx::query_scalar(
            "SELECT job_ref FROM job_cooldown WHERE requester_id = $1 AND cooled_until > NOW()",
        )
        .bind(requester_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| upstream("cooled jobs", requester_id, e))?;

        debug!(
            subsystem = "db",
            component = "profiles",
            requester_id = %requester_id,
            applied = applied.len(),
            cooled = cooled.len(),
            "Loaded exclusions"
        );

        Ok(ExclusionSet::new()
            .with_applied(applied.into_iter().map(RawJobId::Int))
            .with_cooled(cooled.into_iter().map(RawJobId::Text)))
    }
}
