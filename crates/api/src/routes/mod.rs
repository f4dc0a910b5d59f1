pub mod health;
pub mod jobs;
pub mod projects;
pub mod status;
pub mod versions;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /status                                          node name and job counts
///
/// /projects                                        list, create
/// /projects/{id}                                   delete (queued, 202)
///
/// /versions                                        register (POST)
/// /versions/{project_id}                           list by project
/// /versions/{project_id}/{version_id}              delete (queued, 202)
///
/// /jobs                                            list, create, update (PATCH)
/// /jobs/{id}                                       get, delete
/// /jobs/{id}/logs                                  output stream (SSE)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(status::router())
        .nest("/projects", projects::router())
        .nest("/versions", versions::router())
        .nest("/jobs", jobs::router())
}
