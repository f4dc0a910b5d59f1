//! Route definitions for the `/projects` resource.

use axum::routing::{delete, get};
use axum::Router;

use crate::handlers::projects;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// GET    /        -> list
/// POST   /        -> create
/// DELETE /{id}    -> delete
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(projects::list).post(projects::create))
        .route("/{id}", delete(projects::delete))
}
