use std::future::Future;
use std::time::Duration;

use crate::error::DriverError;

/// Run an engine call under a deadline, mapping expiry to
/// [`DriverError::Timeout`].
pub async fn with_deadline<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_secs = after.as_secs(), "Engine call timed out");
            Err(DriverError::Timeout { operation, after })
        }
    }
}
