//! Worker pool: claims commands from the queue and runs them concurrently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::handler::{CommandHandler, HandlerError, Outcome};
use crate::queue::{ClaimedCommand, CommandQueue};

/// How long shutdown waits for in-flight commands.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub lease: Duration,
    /// Ceiling on attempts, whatever the command was enqueued with.
    pub max_attempts: u32,
}

impl From<&WorkerConfig> for PoolConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            poll_interval: config.poll_interval,
            retry_delay: config.retry_delay,
            lease: config.lease,
            max_attempts: config.max_attempts,
        }
    }
}

/// What happens to a command after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Complete,
    Retry,
    Abandon,
}

/// Decide a command's fate from its result and attempt count.
pub fn disposition(
    result: &Result<Outcome, HandlerError>,
    attempt: u32,
    max_attempts: u32,
) -> Disposition {
    match result {
        Ok(_) => Disposition::Complete,
        Err(e) if e.is_retryable() && attempt < max_attempts => Disposition::Retry,
        Err(_) => Disposition::Abandon,
    }
}

pub struct WorkerPool {
    queue: Arc<dyn CommandQueue>,
    handler: Arc<CommandHandler>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn CommandQueue>, handler: CommandHandler, config: PoolConfig) -> Self {
        Self {
            queue,
            handler: Arc::new(handler),
            config,
        }
    }

    /// Claim and process commands until `cancel` fires, then drain.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let mut sweep = tokio::time::interval((self.config.lease / 2).max(Duration::from_secs(1)));

        tracing::info!(concurrency, "Worker pool started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => self.recover_stale().await,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Command task panicked");
                    }
                }
                permit = permits.clone().acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    match self.queue.claim().await {
                        Ok(Some(claimed)) => {
                            let pool = Arc::clone(&self);
                            tasks.spawn(async move {
                                pool.process(claimed).await;
                                drop(permit);
                            });
                        }
                        Ok(None) => {
                            drop(permit);
                            idle(&cancel, self.config.poll_interval).await;
                        }
                        Err(e) => {
                            drop(permit);
                            tracing::error!(error = %e, "Failed to claim command");
                            idle(&cancel, self.config.poll_interval).await;
                        }
                    }
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "Worker pool draining");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Command task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(aborted = tasks.len(), "Drain timed out, aborting in-flight commands");
            tasks.abort_all();
        }
        tracing::info!("Worker pool stopped");
    }

    /// Run one claimed command and settle it on the queue.
    pub async fn process(&self, claimed: ClaimedCommand) {
        let key = claimed.key();
        let command = &claimed.command;
        let attempt = claimed.attempt;
        let max_attempts = claimed.max_attempts.min(self.config.max_attempts).max(1);

        tracing::debug!(%command, attempt, "Processing command");
        let result = self.handler.handle(command).await;

        let settled = match (disposition(&result, attempt, max_attempts), &result) {
            (Disposition::Complete, Ok(outcome)) => {
                tracing::info!(%command, ?outcome, "Command completed");
                self.queue.complete(&key).await
            }
            (Disposition::Retry, Err(e)) => {
                tracing::warn!(%command, attempt, max_attempts, error = %e, "Command failed, will retry");
                self.queue
                    .retry(&key, &e.to_string(), self.config.retry_delay)
                    .await
            }
            (_, Err(e)) => {
                tracing::error!(
                    %command,
                    attempt,
                    max_attempts,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Command abandoned",
                );
                self.queue.abandon(&key, &e.to_string()).await
            }
            (_, Ok(_)) => self.queue.complete(&key).await,
        };

        if let Err(e) = settled {
            // The claim lease will hand the command out again.
            tracing::error!(%command, error = %e, "Failed to settle command");
        }
    }

    async fn recover_stale(&self) {
        match self.queue.recover_stale(self.config.lease).await {
            Ok(0) => {}
            Ok(recovered) => tracing::warn!(recovered, "Re-queued commands with expired claims"),
            Err(e) => tracing::error!(error = %e, "Failed to recover stale commands"),
        }
    }
}

async fn idle(cancel: &CancellationToken, interval: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(interval) => {}
    }
}

#[cfg(test)]
mod tests {
    use spiderd_core::commands::Command;
    use spiderd_db::models::status::JobStatus;
    use spiderd_engine::DriverError;

    use super::*;
    use crate::dispatcher::TaskDispatcher;
    use crate::testing::{FakeDriver, MemoryCommandQueue, MemoryJobStore};

    struct Fixture {
        store: Arc<MemoryJobStore>,
        driver: Arc<FakeDriver>,
        queue: Arc<MemoryCommandQueue>,
        dispatcher: TaskDispatcher,
        pool: Arc<WorkerPool>,
    }

    fn fixture() -> Fixture {
        fixture_with_max_attempts(5)
    }

    fn fixture_with_max_attempts(max_attempts: u32) -> Fixture {
        let store = Arc::new(MemoryJobStore::default());
        let driver = Arc::new(FakeDriver::default());
        let queue = Arc::new(MemoryCommandQueue::default());
        store.insert_version("v1", "p1", "registry/p1:v1", &["news"]);
        store.insert_job("abc123", "p1", "v1", "news");

        let handler = CommandHandler::new(store.clone(), driver.clone(), Duration::from_secs(15));
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            handler,
            PoolConfig {
                concurrency: 4,
                poll_interval: Duration::from_millis(10),
                retry_delay: Duration::ZERO,
                lease: Duration::from_secs(600),
                max_attempts,
            },
        ));
        let dispatcher = TaskDispatcher::new(queue.clone(), 2);

        Fixture {
            store,
            driver,
            queue,
            dispatcher,
            pool,
        }
    }

    fn execute() -> Command {
        Command::Execute {
            job_id: "abc123".into(),
        }
    }

    async fn claim_and_process(f: &Fixture) {
        let claimed = f.queue.claim().await.unwrap().unwrap();
        f.pool.process(claimed).await;
    }

    #[test]
    fn disposition_table() {
        let ok: Result<Outcome, HandlerError> = Ok(Outcome::Cancelled);
        let transient = Err(HandlerError::Driver(DriverError::EngineUnavailable("down".into())));
        let fatal = Err(HandlerError::RecordNotFound {
            entity: "job",
            id: "x".into(),
        });

        assert_eq!(disposition(&ok, 1, 2), Disposition::Complete);
        assert_eq!(disposition(&transient, 1, 2), Disposition::Retry);
        assert_eq!(disposition(&transient, 2, 2), Disposition::Abandon);
        assert_eq!(disposition(&fatal, 1, 2), Disposition::Abandon);
        assert_eq!(disposition(&transient, 1, 1), Disposition::Abandon);
    }

    #[tokio::test]
    async fn successful_command_releases_its_key() {
        let f = fixture();
        f.dispatcher.enqueue(execute()).await.unwrap();

        claim_and_process(&f).await;

        assert!(f.queue.is_empty());
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Running));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once_then_abandoned() {
        let f = fixture();
        for _ in 0..2 {
            f.driver
                .fail_next("create", DriverError::EngineUnavailable("down".into()));
        }
        f.dispatcher.enqueue(execute()).await.unwrap();

        claim_and_process(&f).await;
        assert!(f.queue.contains("abc123"));
        assert!(f.queue.last_error("abc123").is_some());

        claim_and_process(&f).await;
        assert!(f.queue.is_empty());
        assert_eq!(f.queue.abandoned().len(), 1);
        assert_eq!(f.driver.count("create"), 2);
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn worker_ceiling_caps_enqueued_attempts() {
        let f = fixture_with_max_attempts(1);
        f.driver
            .fail_next("create", DriverError::EngineUnavailable("down".into()));
        // Enqueued with two attempts, but this worker allows only one.
        f.dispatcher.enqueue(execute()).await.unwrap();

        claim_and_process(&f).await;

        assert!(f.queue.is_empty());
        assert_eq!(f.queue.abandoned().len(), 1);
        assert_eq!(f.driver.count("create"), 1);
    }

    #[tokio::test]
    async fn missing_record_is_abandoned_without_retry() {
        let f = fixture();
        f.store.remove_version("v1");
        f.dispatcher.enqueue(execute()).await.unwrap();

        claim_and_process(&f).await;

        assert!(f.queue.is_empty());
        let abandoned = f.queue.abandoned();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].0, "abc123");
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn run_processes_queue_until_cancelled() {
        let f = fixture();
        f.store.insert_job("def456", "p1", "v1", "news");
        f.dispatcher.enqueue(execute()).await.unwrap();
        f.dispatcher
            .enqueue(Command::Execute {
                job_id: "def456".into(),
            })
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(f.pool.clone().run(cancel.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !f.queue.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        handle.await.unwrap();

        assert!(f.queue.is_empty());
        assert_eq!(f.store.status("abc123"), Some(JobStatus::Running));
        assert_eq!(f.store.status("def456"), Some(JobStatus::Running));
    }

    #[tokio::test]
    async fn concurrent_execute_creates_exactly_one_unit() {
        let f = fixture();
        let (a, b) = tokio::join!(f.dispatcher.enqueue(execute()), f.dispatcher.enqueue(execute()));
        assert!(a.is_ok() ^ b.is_ok());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(f.pool.clone().run(cancel.clone()));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !f.queue.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(f.driver.count("create"), 1);
    }
}
