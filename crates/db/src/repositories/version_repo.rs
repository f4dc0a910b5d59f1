//! Repository for the `versions` table.

use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::version::{CreateVersion, Version};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, project_id, image, spiders, created_at, updated_at";

/// Provides CRUD operations for versions.
pub struct VersionRepo;

impl VersionRepo {
    /// Insert a new version with no known task names.
    pub async fn create(pool: &PgPool, input: &CreateVersion) -> Result<Version, sqlx::Error> {
        let query = format!(
            "INSERT INTO versions (id, project_id, image) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Version>(&query)
            .bind(&input.id)
            .bind(&input.project_id)
            .bind(&input.image)
            .fetch_one(pool)
            .await
    }

    /// Find a version by its ID.
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Version>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM versions WHERE id = $1");
        sqlx::query_as::<_, Version>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List a project's versions, newest first.
    pub async fn list_by_project(
        pool: &PgPool,
        project_id: &str,
    ) -> Result<Vec<Version>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM versions WHERE project_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, Version>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    /// Replace the version's discovered task names.
    ///
    /// Returns `false` if the version no longer exists.
    pub async fn set_spiders(
        pool: &PgPool,
        id: &str,
        spiders: &[String],
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE versions SET spiders = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(spiders))
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a version. Its jobs cascade.
    pub async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM versions WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
