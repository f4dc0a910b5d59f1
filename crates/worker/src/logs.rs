//! Log streaming gateway.
//!
//! Resolves a job's unit by name and relays its followed output until the
//! unit's output ends or the caller cancels. Dropping the returned stream
//! also drops the engine stream.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use spiderd_core::error::CoreError;
use spiderd_core::naming::{unit_name, UnitIdentity};
use spiderd_engine::driver::ExecutionDriver;
use spiderd_engine::DriverError;
use tokio_util::sync::CancellationToken;

use crate::store::{JobStore, StoreError};

/// One item of a job's log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A chunk of combined stdout/stderr output.
    Output(Bytes),
    /// The unit's output ended. Always the last item when present.
    End,
}

pub type JobLogStream = BoxStream<'static, LogEvent>;

#[derive(Debug, thiserror::Error)]
pub enum LogStreamError {
    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Invalid unit identity: {0}")]
    InvalidIdentity(#[from] CoreError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct LogGateway {
    store: Arc<dyn JobStore>,
    driver: Arc<dyn ExecutionDriver>,
}

impl LogGateway {
    pub fn new(store: Arc<dyn JobStore>, driver: Arc<dyn ExecutionDriver>) -> Self {
        Self { store, driver }
    }

    /// Open the followed output of `job_id`'s current unit.
    ///
    /// A job without a unit yields only [`LogEvent::End`]. When `cancel`
    /// fires the stream ends without the marker.
    pub async fn open_job_log_stream(
        &self,
        job_id: &str,
        cancel: CancellationToken,
    ) -> Result<JobLogStream, LogStreamError> {
        let job = self
            .store
            .find_job(job_id)
            .await?
            .ok_or_else(|| LogStreamError::JobNotFound(job_id.to_string()))?;

        let name = unit_name(&UnitIdentity {
            job_id: &job.id,
            project_id: &job.project_id,
            version_id: &job.version_id,
            task: &job.spider,
        })?;

        let Some(unit) = self.driver.find_by_name(&name).await? else {
            tracing::debug!(job_id, "No unit for job, ending log stream");
            return Ok(stream::iter([LogEvent::End]).boxed());
        };

        tracing::debug!(job_id, unit = %unit.id, "Log stream opened");
        let output = self.driver.open_log_stream(&unit.id, true);
        let job_id = job_id.to_string();

        let relay = stream::unfold(Some(output), move |state| {
            let cancel = cancel.clone();
            let job_id = job_id.clone();
            async move {
                let mut output = state?;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(job_id = %job_id, "Log stream cancelled by caller");
                        None
                    }
                    next = output.next() => match next {
                        Some(Ok(chunk)) => Some((LogEvent::Output(chunk.bytes), Some(output))),
                        None => Some((LogEvent::End, None)),
                        Some(Err(e)) if e.is_not_found() => Some((LogEvent::End, None)),
                        Some(Err(e)) => {
                            tracing::warn!(job_id = %job_id, error = %e, "Log stream failed");
                            None
                        }
                    },
                }
            }
        });

        Ok(relay.boxed())
    }
}
