//! Queue row model for the `commands` table.

use serde::Serialize;
use spiderd_core::types::Timestamp;
use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `commands` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommandRow {
    pub dedup_key: String,
    pub kind: String,
    pub subject_id: String,
    pub status_id: StatusId,
    /// Number of claims so far, including the current one.
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub available_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for enqueueing a command.
#[derive(Debug, Clone)]
pub struct NewCommand {
    pub dedup_key: String,
    pub kind: String,
    pub subject_id: String,
    pub max_attempts: i32,
}
