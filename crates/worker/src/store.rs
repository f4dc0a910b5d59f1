//! Persistence seam for the worker, reconciler and log gateway.

use async_trait::async_trait;
use spiderd_db::models::job::Job;
use spiderd_db::models::status::JobStatus;
use spiderd_db::models::version::Version;
use spiderd_db::repositories::{JobRepo, ProjectRepo, VersionRepo};
use sqlx::PgPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Job, version and project records as the lifecycle components need them.
///
/// Every status write is a compare-and-set that reports whether it applied.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    async fn find_version(&self, id: &str) -> Result<Option<Version>, StoreError>;

    /// Move a job to `to` if its status is one of `from`.
    async fn transition(
        &self,
        id: &str,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<bool, StoreError>;

    /// Record the unit carrying a still-pending job.
    async fn attach_unit(&self, id: &str, unit_id: &str) -> Result<bool, StoreError>;

    /// Clear a pending job's unit if it is still `unit_id`.
    async fn detach_unit(&self, id: &str, unit_id: &str) -> Result<bool, StoreError>;

    /// Finish an active job whose recorded unit is `unit_id`.
    async fn finish_unit(&self, id: &str, unit_id: &str) -> Result<bool, StoreError>;

    /// Reset a job to pending with no unit.
    async fn rearm(&self, id: &str) -> Result<bool, StoreError>;

    async fn delete_job(&self, id: &str) -> Result<bool, StoreError>;

    async fn set_version_spiders(&self, id: &str, spiders: &[String]) -> Result<bool, StoreError>;

    async fn list_running(&self) -> Result<Vec<Job>, StoreError>;

    async fn list_versions(&self, project_id: &str) -> Result<Vec<Version>, StoreError>;

    /// Delete a version and, by cascade, its jobs.
    async fn delete_version(&self, id: &str) -> Result<bool, StoreError>;

    /// Delete a project and, by cascade, its versions and jobs.
    async fn delete_project(&self, id: &str) -> Result<bool, StoreError>;
}

/// [`JobStore`] over the Postgres repositories.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_version(&self, id: &str) -> Result<Option<Version>, StoreError> {
        Ok(VersionRepo::find_by_id(&self.pool, id).await?)
    }

    async fn transition(
        &self,
        id: &str,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<bool, StoreError> {
        Ok(JobRepo::transition(&self.pool, id, from, to).await?)
    }

    async fn attach_unit(&self, id: &str, unit_id: &str) -> Result<bool, StoreError> {
        Ok(JobRepo::attach_unit(&self.pool, id, unit_id).await?)
    }

    async fn detach_unit(&self, id: &str, unit_id: &str) -> Result<bool, StoreError> {
        Ok(JobRepo::detach_unit(&self.pool, id, unit_id).await?)
    }

    async fn finish_unit(&self, id: &str, unit_id: &str) -> Result<bool, StoreError> {
        Ok(JobRepo::finish_unit(&self.pool, id, unit_id).await?)
    }

    async fn rearm(&self, id: &str) -> Result<bool, StoreError> {
        Ok(JobRepo::rearm(&self.pool, id).await?)
    }

    async fn delete_job(&self, id: &str) -> Result<bool, StoreError> {
        Ok(JobRepo::delete(&self.pool, id).await?)
    }

    async fn set_version_spiders(&self, id: &str, spiders: &[String]) -> Result<bool, StoreError> {
        Ok(VersionRepo::set_spiders(&self.pool, id, spiders).await?)
    }

    async fn list_running(&self) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_running(&self.pool).await?)
    }

    async fn list_versions(&self, project_id: &str) -> Result<Vec<Version>, StoreError> {
        Ok(VersionRepo::list_by_project(&self.pool, project_id).await?)
    }

    async fn delete_version(&self, id: &str) -> Result<bool, StoreError> {
        Ok(VersionRepo::delete(&self.pool, id).await?)
    }

    async fn delete_project(&self, id: &str) -> Result<bool, StoreError> {
        Ok(ProjectRepo::delete(&self.pool, id).await?)
    }
}
