//! Job orchestration: the task dispatcher, the worker pool that executes
//! lifecycle commands, the event reconciler, and the log streaming gateway.
//!
//! The API process uses [`dispatcher::TaskDispatcher`] and
//! [`logs::LogGateway`]; the `spiderd-worker` binary runs
//! [`pool::WorkerPool`] and [`reconciler::ReconcilerSupervisor`].

pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod logs;
pub mod pool;
pub mod queue;
pub mod reconciler;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
