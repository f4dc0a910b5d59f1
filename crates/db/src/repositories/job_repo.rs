//! Repository for the `jobs` table.
//!
//! Every status write is a compare-and-set: the `WHERE` clause names the
//! statuses the row must currently be in, and callers learn from the
//! returned `bool` whether their write won. The worker and the event
//! reconciler both write `status_id` without any shared lock, so this is
//! the only place their race is resolved.

use sqlx::PgPool;

use crate::models::job::{CreateJob, Job, JobCounts, JobListQuery};
use crate::models::status::{JobStatus, StatusId};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, project_id, version_id, spider, settings, status_id, unit_id, \
    created_at, updated_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

fn status_ids(statuses: &[JobStatus]) -> Vec<StatusId> {
    statuses.iter().map(|s| s.id()).collect()
}

/// Provides CRUD and lifecycle operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job.
    pub async fn create(pool: &PgPool, input: &CreateJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, project_id, version_id, spider, settings, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(&input.id)
            .bind(&input.project_id)
            .bind(&input.version_id)
            .bind(&input.spider)
            .bind(&input.settings)
            .bind(JobStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs newest first with optional project and status filters.
    pub async fn list(pool: &PgPool, params: &JobListQuery) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE ($1::TEXT IS NULL OR project_id = $1) \
               AND ($2::SMALLINT IS NULL OR status_id = $2) \
             ORDER BY created_at DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(&params.project_id)
            .bind(params.status_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// All jobs currently marked running.
    pub async fn list_running(pool: &PgPool) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE status_id = $1 ORDER BY created_at");
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Running.id())
            .fetch_all(pool)
            .await
    }

    /// Move a job to `to` if its current status is one of `from`.
    ///
    /// Returns `true` if the row changed.
    pub async fn transition(
        pool: &PgPool,
        id: &str,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status_id = $2 WHERE id = $1 AND status_id = ANY($3)",
        )
        .bind(id)
        .bind(to.id())
        .bind(status_ids(from))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the engine id of the unit about to carry a pending job.
    ///
    /// Returns `false` if the job is no longer pending.
    pub async fn attach_unit(pool: &PgPool, id: &str, unit_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET unit_id = $2 WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(unit_id)
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Forget the unit of a still-pending job, if it is still `unit_id`.
    ///
    /// Done before an execute retry removes a unit left by an earlier
    /// attempt, so that unit's exit can no longer finish the job.
    pub async fn detach_unit(pool: &PgPool, id: &str, unit_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET unit_id = NULL WHERE id = $1 AND unit_id = $2 AND status_id = $3",
        )
        .bind(id)
        .bind(unit_id)
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job finished because its unit `unit_id` terminated.
    ///
    /// Applies only while the job is pending or running and still carried
    /// by that same unit, so a stale event from a replaced unit is a no-op.
    pub async fn finish_unit(pool: &PgPool, id: &str, unit_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status_id = $3 \
             WHERE id = $1 AND unit_id = $2 AND status_id = ANY($4)",
        )
        .bind(id)
        .bind(unit_id)
        .bind(JobStatus::Finished.id())
        .bind(status_ids(&JobStatus::ACTIVE))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reset a job to pending with no unit, from any status.
    ///
    /// Only the restart command calls this, after tearing the old unit down.
    pub async fn rearm(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE jobs SET status_id = $2, unit_id = NULL WHERE id = $1")
            .bind(id)
            .bind(JobStatus::Pending.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count jobs per status.
    pub async fn count_by_status(pool: &PgPool) -> Result<JobCounts, sqlx::Error> {
        let rows = sqlx::query_as::<_, (StatusId, i64)>(
            "SELECT status_id, COUNT(*) FROM jobs GROUP BY status_id",
        )
        .fetch_all(pool)
        .await?;
        Ok(JobCounts::from_rows(rows))
    }

    /// Delete a job row. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
