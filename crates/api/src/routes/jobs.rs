//! Route definitions for the `/jobs` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::{jobs, logs};
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /            -> list
/// POST   /            -> create
/// PATCH  /            -> update (cancel | restart)
/// GET    /{id}        -> get_by_id
/// DELETE /{id}        -> delete
/// GET    /{id}/logs   -> stream (SSE)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(jobs::list).post(jobs::create).patch(jobs::update),
        )
        .route("/{id}", get(jobs::get_by_id).delete(jobs::delete))
        .route("/{id}/logs", get(logs::stream))
}
