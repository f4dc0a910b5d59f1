use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use spiderd_core::error::CoreError;
use spiderd_engine::DriverError;
use spiderd_worker::dispatcher::DispatchError;
use spiderd_worker::logs::LogStreamError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and the errors of the engine,
/// dispatcher and log gateway. Implements [`IntoResponse`] to produce
/// consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `spiderd_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Engine(#[from] DriverError),

    #[error(transparent)]
    LogStream(#[from] LogStreamError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
            },

            // --- Database errors ---
            AppError::Database(err) => classify_sqlx_error(err),

            // --- Command queue ---
            AppError::Dispatch(DispatchError::AlreadyQueued { key }) => (
                StatusCode::CONFLICT,
                "COMMAND_PENDING",
                format!("A command for {key} is already queued or in progress"),
            ),
            AppError::Dispatch(DispatchError::Queue(err)) => {
                tracing::error!(error = %err, "Command queue error");
                internal()
            }

            // --- Engine ---
            AppError::Engine(err) => classify_driver_error(err),

            // --- Log streaming ---
            AppError::LogStream(err) => match err {
                LogStreamError::JobNotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Job with id {id} not found"),
                ),
                LogStreamError::Driver(err) => classify_driver_error(err),
                LogStreamError::InvalidIdentity(_) | LogStreamError::Store(_) => {
                    tracing::error!(error = %err, "Log stream error");
                    internal()
                }
            },
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Classify an engine error into an HTTP status, error code, and message.
///
/// - Unreachable or slow engine maps to 503.
/// - Units or images still in use map to 409.
/// - A vanished unit maps to 404.
/// - Any other engine response maps to 502.
fn classify_driver_error(err: &DriverError) -> (StatusCode, &'static str, String) {
    match err {
        DriverError::EngineUnavailable(_) | DriverError::Timeout { .. } => {
            tracing::warn!(error = %err, "Engine unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "ENGINE_UNAVAILABLE",
                "The container engine is unavailable".to_string(),
            )
        }
        DriverError::ImageInUse { .. } | DriverError::UnitNameConflict(_) => {
            (StatusCode::CONFLICT, "CONFLICT", err.to_string())
        }
        DriverError::UnitNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        DriverError::Engine { .. } => {
            tracing::error!(error = %err, "Engine error");
            (
                StatusCode::BAD_GATEWAY,
                "ENGINE_ERROR",
                "The container engine rejected the request".to_string(),
            )
        }
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique violations of a `uq_` constraint or a primary key map to 409.
/// - Foreign key violations map to 400.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            let constraint = db_err.constraint().unwrap_or("unknown");
            match db_err.code().as_deref() {
                // PostgreSQL unique constraint violation
                Some("23505") if constraint.starts_with("uq_") || constraint.ends_with("_pkey") => {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
                // PostgreSQL foreign key violation
                Some("23503") => {
                    return (
                        StatusCode::BAD_REQUEST,
                        "VALIDATION_ERROR",
                        format!("Referenced record does not exist: {constraint}"),
                    );
                }
                _ => {}
            }
            tracing::error!(error = %db_err, "Database error");
            internal()
        }
        other => {
            tracing::error!(error = %other, "Database error");
            internal()
        }
    }
}
