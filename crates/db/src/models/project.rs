//! Project entity model and DTOs.

use serde::{Deserialize, Serialize};
use spiderd_core::types::{RecordId, Timestamp};
use sqlx::FromRow;

/// A project row from the `projects` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: RecordId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a new project.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub id: RecordId,
}
