//! Execution driver for the spider job orchestrator.
//!
//! Defines the [`ExecutionDriver`](driver::ExecutionDriver) seam the
//! worker and API program against, and its bollard-backed implementation
//! [`DockerDriver`](docker::DockerDriver). Every engine call runs under a
//! per-operation deadline from [`EngineConfig`](config::EngineConfig).

pub mod config;
pub mod deadline;
pub mod docker;
pub mod driver;
pub mod error;
pub mod events;

pub use config::{EngineConfig, EngineConfigError};
pub use docker::DockerDriver;
pub use driver::ExecutionDriver;
pub use error::DriverError;
