//! Route definitions for the `/versions` resource.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::versions;
use crate::state::AppState;

/// Routes mounted at `/versions`.
///
/// ```text
/// POST   /                              -> create
/// GET    /{project_id}                  -> list_by_project
/// DELETE /{project_id}/{version_id}     -> delete
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(versions::create))
        .route("/{project_id}", get(versions::list_by_project))
        .route("/{project_id}/{version_id}", delete(versions::delete))
}
