//! Route definition for the daemon status report.

use axum::routing::get;
use axum::Router;

use crate::handlers::status;
use crate::state::AppState;

/// `GET /status -> daemon_status`
pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(status::daemon_status))
}
