//! Handlers for the `/jobs` resource.
//!
//! Handlers never touch the engine for jobs. They validate, persist the
//! row, and hand lifecycle changes to the command queue; the worker does
//! the rest.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use spiderd_core::commands::Command;
use spiderd_core::error::CoreError;
use spiderd_core::naming::{new_job_id, unit_name, validate_job_id, UnitIdentity};
use spiderd_db::models::job::{CreateJob, JobListQuery};
use spiderd_db::repositories::{JobRepo, ProjectRepo, VersionRepo};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Caller-chosen id. Generated when absent.
    pub id: Option<String>,
    pub project_id: String,
    pub version_id: String,
    pub spider: String,
    #[serde(default)]
    pub settings: String,
}

/// Lifecycle change requested through `PATCH /api/v1/jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Cancel,
    Restart,
}

/// Body of `PATCH /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct UpdateJobRequest {
    pub id: String,
    pub status: JobAction,
}

/// Acknowledgement for an enqueued lifecycle command.
#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    pub job_id: String,
    pub command: &'static str,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Creates the job `pending` and enqueues its `execute` command. If the
/// enqueue fails the row is removed again.
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    let id = match input.id {
        Some(id) => {
            validate_job_id(&id)?;
            id
        }
        None => new_job_id(),
    };

    if ProjectRepo::find_by_id(&state.pool, &input.project_id)
        .await?
        .is_none()
    {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Project",
            id: input.project_id,
        }));
    }

    let version = VersionRepo::find_by_id(&state.pool, &input.version_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Version",
            id: input.version_id.clone(),
        }))?;

    if version.project_id != input.project_id {
        return Err(AppError::Core(CoreError::Validation(format!(
            "version {} does not belong to project {}",
            version.id, input.project_id
        ))));
    }
    if !version.has_spider(&input.spider) {
        return Err(AppError::Core(CoreError::Validation(format!(
            "version {} has no spider named '{}'",
            version.id, input.spider
        ))));
    }

    unit_name(&UnitIdentity {
        job_id: &id,
        project_id: &input.project_id,
        version_id: &input.version_id,
        task: &input.spider,
    })?;

    let job = JobRepo::create(
        &state.pool,
        &CreateJob {
            id,
            project_id: input.project_id,
            version_id: input.version_id,
            spider: input.spider,
            settings: input.settings,
        },
    )
    .await?;

    let execute = Command::Execute {
        job_id: job.id.clone(),
    };
    if let Err(e) = state.dispatcher.enqueue(execute).await {
        JobRepo::delete(&state.pool, &job.id).await?;
        return Err(e.into());
    }

    tracing::info!(job_id = %job.id, spider = %job.spider, "Job created");
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// GET /api/v1/jobs
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = JobRepo::list(&state.pool, &params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = JobRepo::find_by_id(&state.pool, &id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound { entity: "Job", id }))?;
    Ok(Json(DataResponse { data: job }))
}

/// PATCH /api/v1/jobs
///
/// Enqueues `cancel` or `restart`. Responds 409 while another command for
/// the same job is queued or running.
pub async fn update(
    State(state): State<AppState>,
    Json(input): Json<UpdateJobRequest>,
) -> AppResult<impl IntoResponse> {
    ensure_job(&state, &input.id).await?;

    let command = match input.status {
        JobAction::Cancel => Command::Cancel {
            job_id: input.id.clone(),
        },
        JobAction::Restart => Command::Restart {
            job_id: input.id.clone(),
        },
    };
    let kind = command.kind().as_str();
    state.dispatcher.enqueue(command).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: CommandAccepted {
                job_id: input.id,
                command: kind,
            },
        }),
    ))
}

/// DELETE /api/v1/jobs/{id}
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    ensure_job(&state, &id).await?;

    let command = Command::Delete { job_id: id.clone() };
    let kind = command.kind().as_str();
    state.dispatcher.enqueue(command).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: CommandAccepted {
                job_id: id,
                command: kind,
            },
        }),
    ))
}

async fn ensure_job(state: &AppState, id: &str) -> AppResult<()> {
    match JobRepo::find_by_id(&state.pool, id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: id.to_string(),
        })),
    }
}
