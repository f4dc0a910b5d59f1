//! The execution-driver seam.
//!
//! [`ExecutionDriver`] is the only way the rest of the system touches the
//! container engine. Every method is bounded by a deadline in the concrete
//! implementation, so a hung engine surfaces as [`DriverError::Timeout`]
//! instead of stalling a worker.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::DriverError;

/// Label key marking units created by this system.
pub const MANAGED_BY_LABEL: &str = "managed-by";

/// `managed-by` value for job units. The event reconciler only listens to
/// units carrying it.
pub const MANAGED_BY_JOBS: &str = "spiderd";

/// `managed-by` value for short-lived version inspection units.
pub const MANAGED_BY_INSPECT: &str = "spiderd-inspect";

/// Everything needed to create one unit.
#[derive(Debug, Clone, Default)]
pub struct UnitSpec {
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub labels: HashMap<String, String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
}

/// A unit as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSummary {
    pub id: String,
    /// Name without the engine's leading `/`.
    pub name: String,
    pub image: String,
    pub running: bool,
}

/// Point-in-time state of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitState {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// What [`ExecutionDriver::wait`] blocks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    NotRunning,
    NextExit,
    Removed,
}

impl WaitCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            WaitCondition::NotRunning => "not-running",
            WaitCondition::NextExit => "next-exit",
            WaitCondition::Removed => "removed",
        }
    }
}

/// Which output channel a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One demultiplexed piece of unit output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub stream: OutputStream,
    pub bytes: Bytes,
}

impl LogChunk {
    pub fn stdout(bytes: impl Into<Bytes>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            bytes: bytes.into(),
        }
    }

    pub fn stderr(bytes: impl Into<Bytes>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            bytes: bytes.into(),
        }
    }
}

/// Terminal lifecycle actions the reconciler cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitEventAction {
    Die,
    Stop,
    OutOfMemory,
}

impl UnitEventAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "die" => Some(Self::Die),
            "stop" => Some(Self::Stop),
            "oom" => Some(Self::OutOfMemory),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Die => "die",
            Self::Stop => "stop",
            Self::OutOfMemory => "oom",
        }
    }
}

/// A terminal lifecycle event for one managed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEvent {
    pub unit_id: String,
    pub name: String,
    pub action: UnitEventAction,
}

pub type LogStream = BoxStream<'static, Result<LogChunk, DriverError>>;
pub type EventStream = BoxStream<'static, Result<UnitEvent, DriverError>>;

/// Operations on execution units.
#[async_trait]
pub trait ExecutionDriver: Send + Sync {
    /// Create (but do not start) a unit. Returns the engine-assigned id.
    async fn create(&self, spec: &UnitSpec) -> Result<String, DriverError>;

    async fn start(&self, unit_id: &str) -> Result<(), DriverError>;

    /// Terminate gracefully, killing after `grace`. Stopping a unit that is
    /// not running succeeds.
    async fn stop(&self, unit_id: &str, grace: Duration) -> Result<(), DriverError>;

    /// Block until `condition` holds and return the exit code.
    async fn wait(&self, unit_id: &str, condition: WaitCondition) -> Result<i64, DriverError>;

    async fn remove(&self, unit_id: &str, force: bool) -> Result<(), DriverError>;

    async fn inspect(&self, unit_id: &str) -> Result<UnitState, DriverError>;

    /// All units, running or not, whose name starts with `prefix`.
    async fn list_by_name_prefix(&self, prefix: &str) -> Result<Vec<UnitSummary>, DriverError>;

    /// All units created from `image`.
    async fn list_by_image(&self, image: &str) -> Result<Vec<UnitSummary>, DriverError>;

    /// Stop and remove every unit using `image`, then remove the image.
    /// A missing image is not an error.
    async fn remove_image(&self, image: &str) -> Result<(), DriverError>;

    async fn ping(&self) -> Result<(), DriverError>;

    /// Host name the engine reports for itself.
    async fn node_name(&self) -> Result<String, DriverError>;

    /// Combined, demultiplexed output of a unit. With `follow` the stream
    /// stays open until the unit stops.
    fn open_log_stream(&self, unit_id: &str, follow: bool) -> LogStream;

    /// Terminal events for job units. The stream ending means the
    /// subscription was lost.
    fn events(&self) -> EventStream;

    /// The unit named exactly `name`, if any.
    async fn find_by_name(&self, name: &str) -> Result<Option<UnitSummary>, DriverError> {
        Ok(self
            .list_by_name_prefix(name)
            .await?
            .into_iter()
            .find(|u| u.name == name))
    }
}
