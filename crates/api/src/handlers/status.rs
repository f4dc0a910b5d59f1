//! Handler for the daemon status report.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use spiderd_db::repositories::JobRepo;
use spiderd_engine::ExecutionDriver;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Payload of `GET /api/v1/status`.
#[derive(Debug, Serialize)]
pub struct DaemonStatus {
    /// Host name the container engine reports.
    pub node_name: String,
    pub status: &'static str,
    pub pending: i64,
    pub running: i64,
    pub finished: i64,
}

/// GET /api/v1/status
///
/// Fails with 503 when the engine cannot be reached, unlike `/health`,
/// which degrades instead.
pub async fn daemon_status(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<DaemonStatus>>> {
    let node_name = state.driver.node_name().await?;
    let counts = JobRepo::count_by_status(&state.pool).await?;

    Ok(Json(DataResponse {
        data: DaemonStatus {
            node_name,
            status: "ok",
            pending: counts.pending,
            running: counts.running,
            finished: counts.finished,
        },
    }))
}
