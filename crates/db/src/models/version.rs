//! Version entity model and DTOs.

use serde::{Deserialize, Serialize};
use spiderd_core::types::{RecordId, Timestamp};
use sqlx::types::Json;
use sqlx::FromRow;

/// A version row from the `versions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Version {
    pub id: RecordId,
    pub project_id: RecordId,
    /// Image reference the version's units run.
    pub image: String,
    /// Task names the image exposes. Empty until inspected.
    pub spiders: Json<Vec<String>>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Version {
    /// Whether `spider` is one of this version's task names.
    pub fn has_spider(&self, spider: &str) -> bool {
        self.spiders.iter().any(|s| s == spider)
    }
}

/// DTO for registering a new version.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVersion {
    pub id: RecordId,
    pub project_id: RecordId,
    pub image: String,
}
