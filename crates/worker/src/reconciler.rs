//! Event reconciler: folds unit terminations back into job status.
//!
//! [`EventReconciler`] consumes one engine event subscription and applies
//! `finished` through the unit-matching compare-and-set. It never
//! reconnects by itself; [`ReconcilerSupervisor`] owns that, resubscribing
//! with exponential backoff whenever a session ends.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use spiderd_core::naming::parse_job_id;
use spiderd_engine::driver::{ExecutionDriver, UnitEvent};
use spiderd_engine::DriverError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::JobStore;

#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    #[error("Engine event stream closed")]
    StreamClosed,

    #[error("Engine event stream failed: {0}")]
    Stream(#[source] DriverError),
}

pub struct EventReconciler {
    store: Arc<dyn JobStore>,
    driver: Arc<dyn ExecutionDriver>,
}

impl EventReconciler {
    pub fn new(store: Arc<dyn JobStore>, driver: Arc<dyn ExecutionDriver>) -> Self {
        Self { store, driver }
    }

    /// Run one subscription session.
    ///
    /// Returns `Ok(())` only when `cancel` fires. The subscription is opened
    /// before the resync sweep so no termination falls between the two.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), ReconcilerError> {
        let mut events = self.driver.events();
        self.resync().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        self.apply(&event).await;
                    }
                    Some(Err(e)) => return Err(ReconcilerError::Stream(e)),
                    None => return Err(ReconcilerError::StreamClosed),
                },
            }
        }
    }

    /// Apply one event. Returns whether a job was finished by it.
    pub async fn apply(&self, event: &UnitEvent) -> bool {
        let action = event.action.as_str();
        let Some(job_id) = parse_job_id(&event.name) else {
            tracing::debug!(unit = %event.unit_id, name = %event.name, action, "Ignoring unit with foreign name");
            return false;
        };

        let job = match self.store.find_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::info!(job_id, unit = %event.unit_id, action, "No job for unit event, skipping");
                return false;
            }
            Err(e) => {
                tracing::warn!(job_id, action, error = %e, "Failed to load job for unit event");
                return false;
            }
        };

        if job.status().is_some_and(|s| s.is_terminal()) {
            tracing::debug!(job_id, action, "Job already terminal");
            return false;
        }

        match self.store.finish_unit(job_id, &event.unit_id).await {
            Ok(true) => {
                tracing::info!(job_id, unit = %event.unit_id, action, "Job finished");
                true
            }
            Ok(false) => {
                tracing::debug!(job_id, unit = %event.unit_id, action, "Event for replaced unit or settled job");
                false
            }
            Err(e) => {
                tracing::warn!(job_id, action, error = %e, "Failed to finish job");
                false
            }
        }
    }

    /// Finish running jobs whose unit is gone or stopped. Returns how many
    /// were finished.
    pub async fn resync(&self) -> usize {
        let running = match self.store.list_running().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Resync skipped, failed to list running jobs");
                return 0;
            }
        };

        let mut finished = 0;
        for job in running {
            let Some(unit_id) = job.unit_id.as_deref() else {
                continue;
            };

            let gone = match self.driver.inspect(unit_id).await {
                Ok(state) => !state.running,
                Err(e) if e.is_not_found() => true,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Resync aborted, engine unavailable");
                    break;
                }
            };

            if gone {
                match self.store.finish_unit(&job.id, unit_id).await {
                    Ok(true) => {
                        tracing::info!(job_id = %job.id, unit = %unit_id, "Job finished during resync");
                        finished += 1;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Failed to finish job"),
                }
            }
        }
        finished
    }
}

/// Delays between event subscriptions.
///
/// Each lost session doubles the previous delay up to `max`. A session that
/// stayed up for `healthy_after` starts again from `initial`.
#[derive(Debug, Clone)]
pub struct ResubscribePolicy {
    pub initial: Duration,
    pub max: Duration,
    pub healthy_after: Duration,
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            healthy_after: Duration::from_secs(60),
        }
    }
}

impl ResubscribePolicy {
    /// Delay before the next subscription, given the delay used before the
    /// session that just ended and how long that session lasted.
    pub fn delay_after(&self, previous: Option<Duration>, session: Duration) -> Duration {
        match previous {
            Some(previous) if session < self.healthy_after => {
                previous.saturating_mul(2).min(self.max)
            }
            _ => self.initial,
        }
    }
}

/// Keeps one [`EventReconciler`] subscribed for the life of the process.
pub struct ReconcilerSupervisor {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconcilerSupervisor {
    /// Spawn the supervised reconciler.
    pub fn start(reconciler: EventReconciler, policy: ResubscribePolicy) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(reconciler, policy, cancel.clone()));
        Arc::new(Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the reconciler and wait for it, at most 5 seconds.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        tracing::info!("Event reconciler stopped");
    }
}

async fn supervise(reconciler: EventReconciler, policy: ResubscribePolicy, cancel: CancellationToken) {
    let mut previous = None;
    let mut session: u64 = 0;

    loop {
        session += 1;
        tracing::info!(session, "Subscribing to engine events");
        let started = tokio::time::Instant::now();

        let error = match reconciler.run(&cancel).await {
            Ok(()) => break,
            Err(e) => e,
        };

        let delay = policy.delay_after(previous, started.elapsed());
        previous = Some(delay);
        tracing::warn!(
            session,
            error = %error,
            retry_in_ms = delay.as_millis() as u64,
            "Event subscription lost, resubscribing",
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
