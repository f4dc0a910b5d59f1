//! Job entity model and DTOs.

use serde::{Deserialize, Serialize};
use spiderd_core::types::{RecordId, Timestamp};
use sqlx::FromRow;

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: RecordId,
    pub project_id: RecordId,
    pub version_id: RecordId,
    pub spider: String,
    pub settings: String,
    pub status_id: StatusId,
    /// Engine id of the unit carrying the job, once one was created.
    pub unit_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Typed view of `status_id`. `None` only for ids missing from the enum.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }
}

/// DTO for inserting a new pending job.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub id: RecordId,
    pub project_id: RecordId,
    pub version_id: RecordId,
    pub spider: String,
    pub settings: String,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub project_id: Option<RecordId>,
    /// Filter by status ID (e.g. 1 = pending, 2 = running).
    pub status_id: Option<StatusId>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Number of jobs in each status, for the daemon status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: i64,
    pub running: i64,
    pub finished: i64,
    pub cancelled: i64,
    pub failed: i64,
}

impl JobCounts {
    /// Fold `(status_id, count)` rows into per-status totals. Unknown ids
    /// are ignored.
    pub fn from_rows(rows: impl IntoIterator<Item = (StatusId, i64)>) -> Self {
        let mut counts = Self::default();
        for (status_id, count) in rows {
            match JobStatus::from_id(status_id) {
                Some(JobStatus::Pending) => counts.pending += count,
                Some(JobStatus::Running) => counts.running += count,
                Some(JobStatus::Finished) => counts.finished += count,
                Some(JobStatus::Cancelled) => counts.cancelled += count,
                Some(JobStatus::Failed) => counts.failed += count,
                None => {}
            }
        }
        counts
    }
}
