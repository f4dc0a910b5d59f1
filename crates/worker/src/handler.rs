//! Single exhaustive handler for lifecycle commands.
//!
//! Each arm drives the execution driver and records the outcome through
//! compare-and-set writes on the job row, so a handler racing the event
//! reconciler never moves a job out of a terminal status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use spiderd_core::commands::Command;
use spiderd_core::error::CoreError;
use spiderd_core::naming::{new_job_id, unit_name, UnitIdentity};
use spiderd_db::models::job::Job;
use spiderd_db::models::status::JobStatus;
use spiderd_db::models::version::Version;
use spiderd_engine::driver::{
    ExecutionDriver, OutputStream, UnitSpec, WaitCondition, MANAGED_BY_INSPECT, MANAGED_BY_JOBS,
    MANAGED_BY_LABEL,
};
use spiderd_engine::DriverError;

use crate::store::{JobStore, StoreError};

/// Program every unit runs.
const ENTRYPOINT: &str = "scrapy";

/// Environment variable carrying the job's free-form settings.
const SETTINGS_ENV: &str = "JOB_SETTINGS";

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{entity} {id} not found")]
    RecordNotFound { entity: &'static str, id: String },

    #[error("Invalid unit identity: {0}")]
    InvalidIdentity(CoreError),

    #[error("Inspection of version {version_id} exited with code {code}")]
    InspectFailed { version_id: String, code: i64 },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Driver(e) => e.is_transient(),
            HandlerError::Store(_) => true,
            HandlerError::RecordNotFound { .. }
            | HandlerError::InvalidIdentity(_)
            | HandlerError::InspectFailed { .. } => false,
        }
    }
}

/// What a successfully handled command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Started { unit_id: String },
    /// A unit started by an earlier attempt was still running and now
    /// carries the job.
    Adopted { unit_id: String },
    Cancelled,
    /// The job had already finished or failed; nothing to do.
    AlreadyTerminal,
    Deleted,
    Inspected { spiders: usize },
    /// The job moved on while the command was queued.
    Skipped { reason: &'static str },
}

pub struct CommandHandler {
    store: Arc<dyn JobStore>,
    driver: Arc<dyn ExecutionDriver>,
    stop_grace: Duration,
}

impl CommandHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        driver: Arc<dyn ExecutionDriver>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            store,
            driver,
            stop_grace,
        }
    }

    pub async fn handle(&self, command: &Command) -> Result<Outcome, HandlerError> {
        match command {
            Command::Execute { job_id } => self.execute(job_id).await,
            Command::Cancel { job_id } => self.cancel(job_id).await,
            Command::Restart { job_id } => self.restart(job_id).await,
            Command::Delete { job_id } => self.delete(job_id).await,
            Command::InspectVersion { version_id } => self.inspect_version(version_id).await,
            Command::DeleteVersion { version_id } => self.delete_version(version_id).await,
            Command::DeleteProject { project_id } => self.delete_project(project_id).await,
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn execute(&self, job_id: &str) -> Result<Outcome, HandlerError> {
        let job = self.require_job(job_id).await?;
        if job.status() != Some(JobStatus::Pending) {
            return Ok(Outcome::Skipped {
                reason: "job is not pending",
            });
        }

        let version = self
            .store
            .find_version(&job.version_id)
            .await?
            .ok_or_else(|| HandlerError::RecordNotFound {
                entity: "version",
                id: job.version_id.clone(),
            })?;

        let name = job_unit_name(&job)?;
        let existing = self.driver.find_by_name(&name).await?;

        // An earlier attempt attached and started this unit, then failed
        // before recording the job as running.
        if let (Some(unit), Some(recorded)) = (&existing, job.unit_id.as_deref()) {
            if unit.id == recorded && unit.running {
                return self.adopt_unit(job_id, &unit.id).await;
            }
        }

        // The recorded unit is about to be replaced; its exit must not
        // finish this run.
        if let Some(recorded) = job.unit_id.as_deref() {
            if !self.store.detach_unit(job_id, recorded).await? {
                return Ok(Outcome::Skipped {
                    reason: "job left pending before its unit was replaced",
                });
            }
        }

        // Leftover from an attempt that failed after create.
        if let Some(stale) = existing {
            tracing::warn!(job_id, unit = %stale.id, "Removing stale unit before execute");
            ignore_not_found(self.driver.remove(&stale.id, true).await)?;
        }

        let unit_id = self.driver.create(&job_unit_spec(&job, &version, name)).await?;

        if !self.store.attach_unit(job_id, &unit_id).await? {
            self.discard_unit(&unit_id).await;
            return Ok(Outcome::Skipped {
                reason: "job left pending before its unit started",
            });
        }

        if let Err(e) = self.driver.start(&unit_id).await {
            self.discard_unit(&unit_id).await;
            return Err(e.into());
        }

        if self
            .store
            .transition(job_id, &[JobStatus::Pending], JobStatus::Running)
            .await?
        {
            tracing::info!(job_id, unit = %unit_id, "Job running");
        } else {
            tracing::info!(job_id, unit = %unit_id, "Job left pending while its unit started");
        }

        Ok(Outcome::Started { unit_id })
    }

    async fn cancel(&self, job_id: &str) -> Result<Outcome, HandlerError> {
        let job = self.require_job(job_id).await?;
        if matches!(
            job.status(),
            Some(JobStatus::Finished | JobStatus::Failed)
        ) {
            return Ok(Outcome::AlreadyTerminal);
        }

        // A failed stop leaves the status untouched for the retry.
        self.stop_unit(&job).await?;

        if self
            .store
            .transition(job_id, &JobStatus::ACTIVE, JobStatus::Cancelled)
            .await?
        {
            tracing::info!(job_id, "Job cancelled");
            return Ok(Outcome::Cancelled);
        }

        // Either an earlier attempt already cancelled it, or it reached
        // another terminal status while stopping.
        let current = self.require_job(job_id).await?;
        if current.status() == Some(JobStatus::Cancelled) {
            Ok(Outcome::Cancelled)
        } else {
            tracing::info!(job_id, status = ?current.status(), "Job settled before cancel");
            Ok(Outcome::AlreadyTerminal)
        }
    }

    async fn restart(&self, job_id: &str) -> Result<Outcome, HandlerError> {
        let job = self.require_job(job_id).await?;
        self.tear_down_unit(&job).await?;

        if !self.store.rearm(job_id).await? {
            return Err(HandlerError::RecordNotFound {
                entity: "job",
                id: job_id.to_string(),
            });
        }
        tracing::info!(job_id, "Job re-armed for restart");

        self.execute(job_id).await
    }

    async fn delete(&self, job_id: &str) -> Result<Outcome, HandlerError> {
        let Some(job) = self.store.find_job(job_id).await? else {
            return Ok(Outcome::Deleted);
        };

        self.tear_down_unit(&job).await?;
        self.store.delete_job(job_id).await?;
        tracing::info!(job_id, "Job deleted");
        Ok(Outcome::Deleted)
    }

    async fn delete_version(&self, version_id: &str) -> Result<Outcome, HandlerError> {
        let Some(version) = self.store.find_version(version_id).await? else {
            return Ok(Outcome::Deleted);
        };

        self.driver.remove_image(&version.image).await?;
        self.store.delete_version(version_id).await?;
        tracing::info!(version_id, image = %version.image, "Version deleted");
        Ok(Outcome::Deleted)
    }

    async fn delete_project(&self, project_id: &str) -> Result<Outcome, HandlerError> {
        let versions = self.store.list_versions(project_id).await?;
        for version in &versions {
            self.driver.remove_image(&version.image).await?;
        }

        self.store.delete_project(project_id).await?;
        tracing::info!(project_id, versions = versions.len(), "Project deleted");
        Ok(Outcome::Deleted)
    }

    async fn inspect_version(&self, version_id: &str) -> Result<Outcome, HandlerError> {
        let version = self
            .store
            .find_version(version_id)
            .await?
            .ok_or_else(|| HandlerError::RecordNotFound {
                entity: "version",
                id: version_id.to_string(),
            })?;

        let spec = UnitSpec {
            name: format!("{MANAGED_BY_INSPECT}-{}", new_job_id()),
            image: version.image.clone(),
            entrypoint: vec![ENTRYPOINT.to_string()],
            cmd: vec!["list".to_string()],
            labels: HashMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_INSPECT.to_string())]),
            env: Vec::new(),
        };
        let unit_id = self.driver.create(&spec).await?;

        let result = self.run_inspection(version_id, &unit_id).await;
        if let Err(e) = self.driver.remove(&unit_id, true).await {
            tracing::warn!(version_id, unit = %unit_id, error = %e, "Failed to remove inspection unit");
        }
        let spiders = result?;

        if !self.store.set_version_spiders(version_id, &spiders).await? {
            return Err(HandlerError::RecordNotFound {
                entity: "version",
                id: version_id.to_string(),
            });
        }
        tracing::info!(version_id, spiders = spiders.len(), "Version inspected");
        Ok(Outcome::Inspected {
            spiders: spiders.len(),
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn require_job(&self, job_id: &str) -> Result<Job, HandlerError> {
        self.store
            .find_job(job_id)
            .await?
            .ok_or_else(|| HandlerError::RecordNotFound {
                entity: "job",
                id: job_id.to_string(),
            })
    }

    async fn adopt_unit(&self, job_id: &str, unit_id: &str) -> Result<Outcome, HandlerError> {
        if !self
            .store
            .transition(job_id, &[JobStatus::Pending], JobStatus::Running)
            .await?
        {
            return Ok(Outcome::Skipped {
                reason: "job left pending before its unit was adopted",
            });
        }
        tracing::info!(job_id, unit = %unit_id, "Adopted running unit from an earlier attempt");
        Ok(Outcome::Adopted {
            unit_id: unit_id.to_string(),
        })
    }

    /// Stop the job's unit if it exists.
    async fn stop_unit(&self, job: &Job) -> Result<(), HandlerError> {
        let name = job_unit_name(job)?;
        if let Some(unit) = self.driver.find_by_name(&name).await? {
            ignore_not_found(self.driver.stop(&unit.id, self.stop_grace).await)?;
        }
        Ok(())
    }

    /// Stop and remove the job's unit if it exists.
    async fn tear_down_unit(&self, job: &Job) -> Result<(), HandlerError> {
        let name = job_unit_name(job)?;
        if let Some(unit) = self.driver.find_by_name(&name).await? {
            ignore_not_found(self.driver.stop(&unit.id, self.stop_grace).await)?;
            ignore_not_found(self.driver.remove(&unit.id, true).await)?;
            tracing::debug!(job_id = %job.id, unit = %unit.id, "Unit torn down");
        }
        Ok(())
    }

    /// Best-effort removal of a unit that will never run.
    async fn discard_unit(&self, unit_id: &str) {
        if let Err(e) = self.driver.remove(unit_id, true).await {
            tracing::warn!(unit = %unit_id, error = %e, "Failed to remove discarded unit");
        }
    }

    async fn run_inspection(
        &self,
        version_id: &str,
        unit_id: &str,
    ) -> Result<Vec<String>, HandlerError> {
        self.driver.start(unit_id).await?;

        let code = self.driver.wait(unit_id, WaitCondition::NotRunning).await?;
        if code != 0 {
            return Err(HandlerError::InspectFailed {
                version_id: version_id.to_string(),
                code,
            });
        }

        let stdout: Vec<u8> = self
            .driver
            .open_log_stream(unit_id, false)
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                if chunk.stream == OutputStream::Stdout {
                    acc.extend_from_slice(&chunk.bytes);
                }
                Ok(acc)
            })
            .await?;

        Ok(parse_spider_list(&stdout))
    }
}

fn job_unit_name(job: &Job) -> Result<String, HandlerError> {
    unit_name(&UnitIdentity {
        job_id: &job.id,
        project_id: &job.project_id,
        version_id: &job.version_id,
        task: &job.spider,
    })
    .map_err(HandlerError::InvalidIdentity)
}

fn job_unit_spec(job: &Job, version: &Version, name: String) -> UnitSpec {
    let mut env = Vec::new();
    if !job.settings.is_empty() {
        env.push(format!("{SETTINGS_ENV}={}", job.settings));
    }

    UnitSpec {
        name,
        image: version.image.clone(),
        entrypoint: vec![ENTRYPOINT.to_string()],
        cmd: vec!["crawl".to_string(), job.spider.clone()],
        labels: HashMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_JOBS.to_string())]),
        env,
    }
}

/// A unit that is already gone needs no stopping or removal.
fn ignore_not_found(result: Result<(), DriverError>) -> Result<(), DriverError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Task names from `scrapy list` output: one per non-empty line.
pub fn parse_spider_list(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::testing::{FakeDriver, MemoryJobStore};

    struct Fixture {
        store: Arc<MemoryJobStore>,
        driver: Arc<FakeDriver>,
        handler: CommandHandler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryJobStore::default());
        let driver = Arc::new(FakeDriver::default());
        store.insert_version("v1", "p1", "registry/p1:v1", &["news"]);
        store.insert_job("abc123", "p1", "v1", "news");
        let handler = CommandHandler::new(store.clone(), driver.clone(), Duration::from_secs(15));
        Fixture {
            store,
            driver,
            handler,
        }
    }

    fn execute() -> Command {
        Command::Execute {
            job_id: "abc123".into(),
        }
    }

    fn cancel() -> Command {
        Command::Cancel {
            job_id: "abc123".into(),
        }
    }

    const UNIT: &str = "abc123_p1_v1_news";

    #[tokio::test]
    async fn execute_starts_named_unit_and_marks_running() {
        let f = fixture();

        let outcome = f.handler.handle(&execute()).await.unwrap();
        let (unit_id, running) = f.driver.unit_named(UNIT).unwrap();

        assert_eq!(outcome, Outcome::Started { unit_id: unit_id.clone() });
        assert!(running);
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Running));
        assert_eq!(f.store.job("abc123").unwrap().unit_id, Some(unit_id));
        assert_eq!(f.store.writes("abc123"), vec![JobStatus::Running]);
    }

    #[tokio::test]
    async fn execute_with_deleted_version_is_fatal_and_leaves_job_pending() {
        let f = fixture();
        f.store.remove_version("v1");

        let err = f.handler.handle(&execute()).await.unwrap_err();

        assert_matches!(&err, HandlerError::RecordNotFound { entity: "version", .. });
        assert!(!err.is_retryable());
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Pending));
        assert_eq!(f.driver.count("create"), 0);
    }

    #[tokio::test]
    async fn execute_engine_failure_is_retryable_and_leaves_job_pending() {
        let f = fixture();
        f.driver
            .fail_next("create", DriverError::EngineUnavailable("connection refused".into()));

        let err = f.handler.handle(&execute()).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn execute_start_failure_discards_unit() {
        let f = fixture();
        f.driver.fail_next(
            "start",
            DriverError::Timeout {
                operation: "start",
                after: Duration::from_secs(10),
            },
        );

        let err = f.handler.handle(&execute()).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(f.driver.unit_count(), 0);
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Pending));

        // The retry starts cleanly.
        f.handler.handle(&execute()).await.unwrap();
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Running));
    }

    #[tokio::test]
    async fn execute_removes_leftover_unit_with_same_name() {
        let f = fixture();
        let stale = f.driver.add_unit(UNIT, "registry/p1:v1", false);

        f.handler.handle(&execute()).await.unwrap();

        let (unit_id, _) = f.driver.unit_named(UNIT).unwrap();
        assert_ne!(unit_id, stale);
        assert_eq!(f.driver.unit_count(), 1);
    }

    #[tokio::test]
    async fn redelivered_execute_adopts_running_unit_of_lost_attempt() {
        let f = fixture();
        let unit_id = f.driver.add_unit(UNIT, "registry/p1:v1", true);
        f.store.force("abc123", JobStatus::Pending, Some(&unit_id));

        let outcome = f.handler.handle(&execute()).await.unwrap();

        assert_eq!(outcome, Outcome::Adopted { unit_id: unit_id.clone() });
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Running));
        assert_eq!(f.store.job("abc123").unwrap().unit_id, Some(unit_id));
        assert_eq!(f.driver.count("remove"), 0);
        assert_eq!(f.driver.count("create"), 0);
    }

    #[tokio::test]
    async fn redelivered_execute_detaches_exited_unit_before_replacing_it() {
        let f = fixture();
        let old = f.driver.add_unit(UNIT, "registry/p1:v1", false);
        f.store.force("abc123", JobStatus::Pending, Some(&old));

        let outcome = f.handler.handle(&execute()).await.unwrap();

        let (new, running) = f.driver.unit_named(UNIT).unwrap();
        assert_ne!(new, old);
        assert!(running);
        assert_eq!(outcome, Outcome::Started { unit_id: new.clone() });
        assert_eq!(f.store.job("abc123").unwrap().unit_id, Some(new));
        // The old unit's exit can no longer touch the job.
        assert!(!f.store.finish_unit("abc123", &old).await.unwrap());
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Running));
    }

    #[tokio::test]
    async fn execute_skips_job_that_is_no_longer_pending() {
        let f = fixture();
        f.store.force("abc123", JobStatus::Cancelled, None);

        let outcome = f.handler.handle(&execute()).await.unwrap();

        assert_matches!(outcome, Outcome::Skipped { .. });
        assert_eq!(f.driver.count("create"), 0);
    }

    #[tokio::test]
    async fn execute_passes_settings_and_crawl_command() {
        let job = Job {
            settings: "DOWNLOAD_DELAY=2".into(),
            ..fixture().store.job("abc123").unwrap()
        };
        let version = fixture().store.version("v1").unwrap();

        let spec = job_unit_spec(&job, &version, UNIT.into());

        assert_eq!(spec.entrypoint, vec!["scrapy"]);
        assert_eq!(spec.cmd, vec!["crawl", "news"]);
        assert_eq!(spec.env, vec!["JOB_SETTINGS=DOWNLOAD_DELAY=2"]);
        assert_eq!(spec.labels.get(MANAGED_BY_LABEL).map(String::as_str), Some(MANAGED_BY_JOBS));
    }

    #[tokio::test]
    async fn cancel_running_job_stops_unit() {
        let f = fixture();
        f.handler.handle(&execute()).await.unwrap();

        let outcome = f.handler.handle(&cancel()).await.unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Cancelled));
        let (_, running) = f.driver.unit_named(UNIT).unwrap();
        assert!(!running);
    }

    #[tokio::test]
    async fn cancel_pending_job_without_unit_succeeds() {
        let f = fixture();

        let outcome = f.handler.handle(&cancel()).await.unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Cancelled));
        assert_eq!(f.driver.count("stop"), 0);
    }

    #[tokio::test]
    async fn cancel_finished_job_is_a_quiet_no_op() {
        let f = fixture();
        f.store.force("abc123", JobStatus::Finished, Some("unit-9"));

        let outcome = f.handler.handle(&cancel()).await.unwrap();

        assert_eq!(outcome, Outcome::AlreadyTerminal);
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Finished));
        assert!(f.store.writes("abc123").is_empty());
    }

    #[tokio::test]
    async fn cancel_retry_after_stop_failure_completes() {
        let f = fixture();
        f.handler.handle(&execute()).await.unwrap();
        f.driver
            .fail_next("stop", DriverError::EngineUnavailable("socket closed".into()));

        let err = f.handler.handle(&cancel()).await.unwrap_err();
        assert!(err.is_retryable());
        // Still running: the unit was never stopped.
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Running));
        let (_, running) = f.driver.unit_named(UNIT).unwrap();
        assert!(running);

        assert_eq!(f.handler.handle(&cancel()).await.unwrap(), Outcome::Cancelled);
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Cancelled));
        let (_, running) = f.driver.unit_named(UNIT).unwrap();
        assert!(!running);
    }

    #[tokio::test]
    async fn cancel_stops_unit_before_recording_cancelled() {
        let f = fixture();
        f.handler.handle(&execute()).await.unwrap();

        f.handler.handle(&cancel()).await.unwrap();

        assert_eq!(
            f.store.writes("abc123"),
            vec![JobStatus::Running, JobStatus::Cancelled]
        );
        assert_eq!(f.driver.count("stop"), 1);
    }

    #[tokio::test]
    async fn cancel_tolerates_unit_vanishing_before_stop() {
        let f = fixture();
        f.handler.handle(&execute()).await.unwrap();
        f.driver
            .fail_next("stop", DriverError::UnitNotFound(UNIT.into()));

        assert_eq!(f.handler.handle(&cancel()).await.unwrap(), Outcome::Cancelled);
    }

    #[tokio::test]
    async fn missing_job_is_fatal_for_cancel() {
        let f = fixture();
        let err = f
            .handler
            .handle(&Command::Cancel {
                job_id: "nope".into(),
            })
            .await
            .unwrap_err();
        assert_matches!(err, HandlerError::RecordNotFound { entity: "job", .. });
    }

    #[tokio::test]
    async fn restart_replaces_unit_of_finished_job() {
        let f = fixture();
        f.handler.handle(&execute()).await.unwrap();
        let (first, _) = f.driver.unit_named(UNIT).unwrap();
        f.store.force("abc123", JobStatus::Finished, Some(&first));

        let outcome = f
            .handler
            .handle(&Command::Restart {
                job_id: "abc123".into(),
            })
            .await
            .unwrap();

        let (second, running) = f.driver.unit_named(UNIT).unwrap();
        assert_ne!(first, second);
        assert!(running);
        assert_eq!(outcome, Outcome::Started { unit_id: second.clone() });
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Running));
        assert_eq!(f.store.job("abc123").unwrap().unit_id, Some(second));
        assert_eq!(f.driver.unit_count(), 1);
    }

    #[tokio::test]
    async fn delete_tears_down_unit_and_row() {
        let f = fixture();
        f.handler.handle(&execute()).await.unwrap();

        let outcome = f
            .handler
            .handle(&Command::Delete {
                job_id: "abc123".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Deleted);
        assert!(f.store.job("abc123").is_none());
        assert_eq!(f.driver.unit_count(), 0);
    }

    #[tokio::test]
    async fn delete_of_missing_job_succeeds() {
        let f = fixture();
        let outcome = f
            .handler
            .handle(&Command::Delete {
                job_id: "gone".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Deleted);
    }

    #[tokio::test]
    async fn delete_version_removes_image_then_row() {
        let f = fixture();
        f.handler.handle(&execute()).await.unwrap();

        let outcome = f
            .handler
            .handle(&Command::DeleteVersion {
                version_id: "v1".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Deleted);
        assert_eq!(f.driver.removed_images(), vec!["registry/p1:v1"]);
        assert!(f.store.version("v1").is_none());
        assert!(f.store.job("abc123").is_none());
    }

    #[tokio::test]
    async fn delete_version_keeps_row_when_engine_is_down() {
        let f = fixture();
        f.driver
            .fail_next("remove_image", DriverError::EngineUnavailable("down".into()));

        let err = f
            .handler
            .handle(&Command::DeleteVersion {
                version_id: "v1".into(),
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(f.store.version("v1").is_some());
    }

    #[tokio::test]
    async fn delete_project_removes_every_version_image() {
        let f = fixture();
        f.store.insert_version("v2", "p1", "registry/p1:v2", &[]);
        f.store.insert_version("w1", "p2", "registry/p2:w1", &[]);

        let outcome = f
            .handler
            .handle(&Command::DeleteProject {
                project_id: "p1".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Deleted);
        let mut removed = f.driver.removed_images();
        removed.sort();
        assert_eq!(removed, vec!["registry/p1:v1", "registry/p1:v2"]);
        assert!(!f.store.has_project("p1"));
        assert!(f.store.version("v1").is_none());
        assert!(f.store.version("w1").is_some());
    }

    #[tokio::test]
    async fn delete_of_missing_version_succeeds() {
        let f = fixture();
        let outcome = f
            .handler
            .handle(&Command::DeleteVersion {
                version_id: "gone".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Deleted);
        assert!(f.driver.removed_images().is_empty());
    }

    #[tokio::test]
    async fn inspect_stores_listed_spiders_and_removes_unit() {
        let f = fixture();
        f.driver
            .script_image("registry/p1:v1", 0, "news\nquotes\n\n  sports  \n");

        let outcome = f
            .handler
            .handle(&Command::InspectVersion {
                version_id: "v1".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Inspected { spiders: 3 });
        assert_eq!(
            f.store.version("v1").unwrap().spiders.0,
            vec!["news", "quotes", "sports"]
        );
        assert_eq!(f.driver.unit_count(), 0);
    }

    #[tokio::test]
    async fn inspect_failure_is_fatal_and_keeps_spiders() {
        let f = fixture();
        f.driver.script_image("registry/p1:v1", 1, "Traceback\n");

        let err = f
            .handler
            .handle(&Command::InspectVersion {
                version_id: "v1".into(),
            })
            .await
            .unwrap_err();

        assert_matches!(err, HandlerError::InspectFailed { code: 1, .. });
        assert!(!err.is_retryable());
        assert_eq!(f.store.version("v1").unwrap().spiders.0, vec!["news"]);
        assert_eq!(f.driver.unit_count(), 0);
    }

    #[test]
    fn name_conflict_is_not_retryable() {
        let err = HandlerError::Driver(DriverError::UnitNameConflict(UNIT.into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn spider_list_ignores_blank_lines() {
        assert_eq!(parse_spider_list(b"a\r\nb\n\n"), vec!["a", "b"]);
        assert!(parse_spider_list(b"").is_empty());
    }
}
