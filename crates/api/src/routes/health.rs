use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use spiderd_engine::ExecutionDriver;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the database is reachable.
    pub db_healthy: bool,
    /// Whether the container engine answers a ping.
    pub engine_healthy: bool,
}

/// GET /health -- returns service, database and engine health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (db, engine) = tokio::join!(
        spiderd_db::health_check(&state.pool),
        state.driver.ping(),
    );
    let db_healthy = db.is_ok();
    let engine_healthy = engine.is_ok();

    let status = if db_healthy && engine_healthy {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        engine_healthy,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
