//! Handlers for the `/projects` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use spiderd_core::commands::Command;
use spiderd_core::error::CoreError;
use spiderd_core::naming::validate_field;
use spiderd_db::models::project::CreateProject;
use spiderd_db::repositories::ProjectRepo;

use crate::error::{AppError, AppResult};
use crate::response::{DataResponse, DeletionQueued};
use crate::state::AppState;

/// POST /api/v1/projects
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<CreateProject>,
) -> AppResult<impl IntoResponse> {
    validate_field("project id", &input.id)?;
    let project = ProjectRepo::create(&state.pool, &input).await?;
    tracing::info!(project_id = %project.id, "Project created");
    Ok((StatusCode::CREATED, Json(DataResponse { data: project })))
}

/// GET /api/v1/projects
pub async fn list(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let projects = ProjectRepo::list(&state.pool).await?;
    Ok(Json(DataResponse { data: projects }))
}

/// DELETE /api/v1/projects/{id}
///
/// Queues the deletion. The worker removes every version's image (and the
/// units using it), then the row; versions and jobs go with it by cascade.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if ProjectRepo::find_by_id(&state.pool, &id).await?.is_none() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Project",
            id,
        }));
    }

    let command = Command::DeleteProject {
        project_id: id.clone(),
    };
    let kind = command.kind().as_str();
    state.dispatcher.enqueue(command).await?;
    tracing::info!(project_id = %id, "Project deletion queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: DeletionQueued { id, command: kind },
        }),
    ))
}
