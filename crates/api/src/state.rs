use std::sync::Arc;

use spiderd_engine::ExecutionDriver;
use spiderd_worker::dispatcher::TaskDispatcher;
use spiderd_worker::logs::LogGateway;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is a pool handle or behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: spiderd_db::DbPool,
    /// Engine access for health and status checks.
    pub driver: Arc<dyn ExecutionDriver>,
    /// Producer side of the command queue.
    pub dispatcher: TaskDispatcher,
    pub logs: LogGateway,
}
