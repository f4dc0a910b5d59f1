use std::time::Duration;

/// Errors returned by an [`ExecutionDriver`](crate::driver::ExecutionDriver).
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The engine endpoint could not be reached at all.
    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    /// A unit with the requested name already exists.
    #[error("Unit name conflict: {0}")]
    UnitNameConflict(String),

    /// Units still using the image could not be torn down.
    #[error("Image {image} is in use: {reason}")]
    ImageInUse { image: String, reason: String },

    /// An engine call exceeded its deadline.
    #[error("Engine call {operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Any other error response from the engine.
    #[error("Engine error ({status}): {message}")]
    Engine { status: u16, message: String },
}

impl DriverError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriverError::EngineUnavailable(_) | DriverError::Timeout { .. } | DriverError::Engine { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::UnitNotFound(_))
    }
}

impl From<bollard::errors::Error> for DriverError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error;

        match err {
            Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => DriverError::UnitNotFound(message),
            Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => DriverError::UnitNameConflict(message),
            Error::DockerResponseServerError {
                status_code,
                message,
            } => DriverError::Engine {
                status: status_code,
                message,
            },
            Error::RequestTimeoutError => DriverError::Timeout {
                operation: "request",
                after: Duration::ZERO,
            },
            other => DriverError::EngineUnavailable(other.to_string()),
        }
    }
}
