//! Handlers for the `/versions` resource.
//!
//! Registering a version queues an inspection that fills in its spider
//! names; until it completes the version accepts no jobs. Deletion is
//! queued the same way, under the same key, so the two never overlap.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use spiderd_core::commands::Command;
use spiderd_core::error::CoreError;
use spiderd_core::naming::validate_field;
use spiderd_db::models::version::CreateVersion;
use spiderd_db::repositories::{ProjectRepo, VersionRepo};

use crate::error::{AppError, AppResult};
use crate::response::{DataResponse, DeletionQueued};
use crate::state::AppState;

/// POST /api/v1/versions
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<CreateVersion>,
) -> AppResult<impl IntoResponse> {
    validate_field("version id", &input.id)?;
    if input.image.trim().is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "image must not be empty".into(),
        )));
    }
    ensure_project(&state, &input.project_id).await?;

    let version = VersionRepo::create(&state.pool, &input).await?;

    let inspect = Command::InspectVersion {
        version_id: version.id.clone(),
    };
    if let Err(e) = state.dispatcher.enqueue(inspect).await {
        VersionRepo::delete(&state.pool, &version.id).await?;
        return Err(e.into());
    }

    tracing::info!(version_id = %version.id, image = %version.image, "Version registered");
    Ok((StatusCode::CREATED, Json(DataResponse { data: version })))
}

/// GET /api/v1/versions/{project_id}
pub async fn list_by_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    ensure_project(&state, &project_id).await?;
    let versions = VersionRepo::list_by_project(&state.pool, &project_id).await?;
    Ok(Json(DataResponse { data: versions }))
}

/// DELETE /api/v1/versions/{project_id}/{version_id}
///
/// Queues removal of the version's image and row.
pub async fn delete(
    State(state): State<AppState>,
    Path((project_id, version_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let version = VersionRepo::find_by_id(&state.pool, &version_id)
        .await?
        .filter(|v| v.project_id == project_id)
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Version",
            id: version_id.clone(),
        }))?;

    let command = Command::DeleteVersion {
        version_id: version.id.clone(),
    };
    let kind = command.kind().as_str();
    state.dispatcher.enqueue(command).await?;
    tracing::info!(project_id = %project_id, version_id = %version.id, "Version deletion queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: DeletionQueued {
                id: version.id,
                command: kind,
            },
        }),
    ))
}

async fn ensure_project(state: &AppState, project_id: &str) -> AppResult<()> {
    match ProjectRepo::find_by_id(&state.pool, project_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::Core(CoreError::NotFound {
            entity: "Project",
            id: project_id.to_string(),
        })),
    }
}
