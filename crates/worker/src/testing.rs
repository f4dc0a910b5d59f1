//! In-memory implementations of the worker seams, for tests.
//!
//! [`MemoryJobStore`] and [`MemoryCommandQueue`] mirror the compare-and-set
//! and dedup semantics of their Postgres counterparts. [`FakeDriver`] keeps
//! a table of units, records every call, and can be scripted to fail.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use spiderd_core::commands::Command;
use spiderd_db::models::job::Job;
use spiderd_db::models::status::JobStatus;
use spiderd_db::models::version::Version;
use spiderd_engine::driver::{
    EventStream, ExecutionDriver, LogChunk, LogStream, UnitEvent, UnitSpec, UnitState,
    UnitSummary, WaitCondition,
};
use spiderd_engine::DriverError;
use sqlx::types::Json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::queue::{ClaimedCommand, CommandQueue, QueueError};
use crate::store::{JobStore, StoreError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Node name reported by [`FakeDriver`].
pub const FAKE_NODE_NAME: &str = "fake-node";

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    jobs: HashMap<String, Job>,
    versions: HashMap<String, Version>,
    projects: HashSet<String>,
    /// Every status write that applied, in order.
    writes: Vec<(String, JobStatus)>,
}

/// [`JobStore`] over hash maps.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<StoreState>,
}

impl MemoryJobStore {
    pub fn insert_version(&self, id: &str, project_id: &str, image: &str, spiders: &[&str]) {
        let now = Utc::now();
        let mut state = lock(&self.state);
        state.projects.insert(project_id.to_string());
        state.versions.insert(
            id.to_string(),
            Version {
                id: id.to_string(),
                project_id: project_id.to_string(),
                image: image.to_string(),
                spiders: Json(spiders.iter().map(|s| s.to_string()).collect()),
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Insert a pending job.
    pub fn insert_job(&self, id: &str, project_id: &str, version_id: &str, spider: &str) {
        let now = Utc::now();
        lock(&self.state).jobs.insert(
            id.to_string(),
            Job {
                id: id.to_string(),
                project_id: project_id.to_string(),
                version_id: version_id.to_string(),
                spider: spider.to_string(),
                settings: String::new(),
                status_id: JobStatus::Pending.id(),
                unit_id: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn has_project(&self, id: &str) -> bool {
        lock(&self.state).projects.contains(id)
    }

    pub fn remove_version(&self, id: &str) {
        lock(&self.state).versions.remove(id);
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        lock(&self.state).jobs.get(id).cloned()
    }

    pub fn version(&self, id: &str) -> Option<Version> {
        lock(&self.state).versions.get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.job(id).and_then(|j| j.status())
    }

    /// Overwrite a job's status and unit without any checks.
    pub fn force(&self, id: &str, status: JobStatus, unit_id: Option<&str>) {
        if let Some(job) = lock(&self.state).jobs.get_mut(id) {
            job.status_id = status.id();
            job.unit_id = unit_id.map(str::to_string);
        }
    }

    /// Applied status writes for one job, in order.
    pub fn writes(&self, id: &str) -> Vec<JobStatus> {
        lock(&self.state)
            .writes
            .iter()
            .filter(|(job_id, _)| job_id == id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.job(id))
    }

    async fn find_version(&self, id: &str) -> Result<Option<Version>, StoreError> {
        Ok(self.version(id))
    }

    async fn transition(
        &self,
        id: &str,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<bool, StoreError> {
        let mut state = lock(&self.state);
        let Some(job) = state.jobs.get_mut(id) else {
            return Ok(false);
        };
        if !from.iter().any(|s| s.id() == job.status_id) {
            return Ok(false);
        }
        job.status_id = to.id();
        state.writes.push((id.to_string(), to));
        Ok(true)
    }

    async fn attach_unit(&self, id: &str, unit_id: &str) -> Result<bool, StoreError> {
        let mut state = lock(&self.state);
        match state.jobs.get_mut(id) {
            Some(job) if job.status_id == JobStatus::Pending.id() => {
                job.unit_id = Some(unit_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn detach_unit(&self, id: &str, unit_id: &str) -> Result<bool, StoreError> {
        let mut state = lock(&self.state);
        match state.jobs.get_mut(id) {
            Some(job)
                if job.status_id == JobStatus::Pending.id()
                    && job.unit_id.as_deref() == Some(unit_id) =>
            {
                job.unit_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_unit(&self, id: &str, unit_id: &str) -> Result<bool, StoreError> {
        let mut state = lock(&self.state);
        let Some(job) = state.jobs.get_mut(id) else {
            return Ok(false);
        };
        let active = JobStatus::ACTIVE.iter().any(|s| s.id() == job.status_id);
        if !active || job.unit_id.as_deref() != Some(unit_id) {
            return Ok(false);
        }
        job.status_id = JobStatus::Finished.id();
        state.writes.push((id.to_string(), JobStatus::Finished));
        Ok(true)
    }

    async fn rearm(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = lock(&self.state);
        let Some(job) = state.jobs.get_mut(id) else {
            return Ok(false);
        };
        job.status_id = JobStatus::Pending.id();
        job.unit_id = None;
        state.writes.push((id.to_string(), JobStatus::Pending));
        Ok(true)
    }

    async fn delete_job(&self, id: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.state).jobs.remove(id).is_some())
    }

    async fn set_version_spiders(&self, id: &str, spiders: &[String]) -> Result<bool, StoreError> {
        match lock(&self.state).versions.get_mut(id) {
            Some(version) => {
                version.spiders = Json(spiders.to_vec());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_running(&self) -> Result<Vec<Job>, StoreError> {
        Ok(lock(&self.state)
            .jobs
            .values()
            .filter(|j| j.status_id == JobStatus::Running.id())
            .cloned()
            .collect())
    }

    async fn list_versions(&self, project_id: &str) -> Result<Vec<Version>, StoreError> {
        Ok(lock(&self.state)
            .versions
            .values()
            .filter(|v| v.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn delete_version(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = lock(&self.state);
        let removed = state.versions.remove(id).is_some();
        state.jobs.retain(|_, job| job.version_id != id);
        Ok(removed)
    }

    async fn delete_project(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = lock(&self.state);
        let removed = state.projects.remove(id);
        state.versions.retain(|_, version| version.project_id != id);
        state.jobs.retain(|_, job| job.project_id != id);
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// MemoryCommandQueue
// ---------------------------------------------------------------------------

struct QueueEntry {
    command: Command,
    seq: u64,
    attempts: u32,
    max_attempts: u32,
    claimed_at: Option<Instant>,
    available_at: Instant,
    last_error: Option<String>,
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<String, QueueEntry>,
    next_seq: u64,
    abandoned: Vec<(String, String)>,
}

/// [`CommandQueue`] over a hash map keyed by dedup key.
#[derive(Default)]
pub struct MemoryCommandQueue {
    state: Mutex<QueueState>,
}

impl MemoryCommandQueue {
    /// Number of pending or claimed commands.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.state).entries.contains_key(key)
    }

    pub fn last_error(&self, key: &str) -> Option<String> {
        lock(&self.state)
            .entries
            .get(key)
            .and_then(|e| e.last_error.clone())
    }

    /// Keys of abandoned commands with their final error.
    pub fn abandoned(&self) -> Vec<(String, String)> {
        lock(&self.state).abandoned.clone()
    }

    /// Commands currently queued, oldest first.
    pub fn commands(&self) -> Vec<Command> {
        let state = lock(&self.state);
        let mut entries: Vec<_> = state.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.command.clone()).collect()
    }
}

#[async_trait]
impl CommandQueue for MemoryCommandQueue {
    async fn push(&self, command: &Command, max_attempts: u32) -> Result<bool, QueueError> {
        let mut state = lock(&self.state);
        let key = command.dedup_key();
        if state.entries.contains_key(&key) {
            return Ok(false);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            QueueEntry {
                command: command.clone(),
                seq,
                attempts: 0,
                max_attempts: max_attempts.max(1),
                claimed_at: None,
                available_at: Instant::now(),
                last_error: None,
            },
        );
        Ok(true)
    }

    async fn claim(&self) -> Result<Option<ClaimedCommand>, QueueError> {
        let mut state = lock(&self.state);
        let now = Instant::now();
        let Some(entry) = state
            .entries
            .values_mut()
            .filter(|e| e.claimed_at.is_none() && e.available_at <= now)
            .min_by_key(|e| e.seq)
        else {
            return Ok(None);
        };

        entry.attempts += 1;
        entry.claimed_at = Some(now);
        Ok(Some(ClaimedCommand {
            command: entry.command.clone(),
            attempt: entry.attempts,
            max_attempts: entry.max_attempts,
        }))
    }

    async fn complete(&self, key: &str) -> Result<(), QueueError> {
        lock(&self.state).entries.remove(key);
        Ok(())
    }

    async fn retry(&self, key: &str, error: &str, delay: Duration) -> Result<(), QueueError> {
        if let Some(entry) = lock(&self.state).entries.get_mut(key) {
            entry.claimed_at = None;
            entry.available_at = Instant::now() + delay;
            entry.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn abandon(&self, key: &str, error: &str) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        state.entries.remove(key);
        state.abandoned.push((key.to_string(), error.to_string()));
        Ok(())
    }

    async fn recover_stale(&self, lease: Duration) -> Result<u64, QueueError> {
        let mut state = lock(&self.state);
        let now = Instant::now();
        let mut recovered = 0;
        for entry in state.entries.values_mut() {
            if entry.claimed_at.is_some_and(|at| at + lease <= now) {
                entry.claimed_at = None;
                entry.available_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

// ---------------------------------------------------------------------------
// FakeDriver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeUnit {
    name: String,
    image: String,
    running: bool,
    exit_code: Option<i64>,
    logs: Vec<LogChunk>,
}

/// What a unit created from a given image does when started.
#[derive(Debug, Clone)]
struct ImageScript {
    exit_code: i64,
    output: Vec<LogChunk>,
}

#[derive(Default)]
struct FakeState {
    units: HashMap<String, FakeUnit>,
    next_id: u64,
    calls: Vec<String>,
    failures: HashMap<&'static str, VecDeque<DriverError>>,
    images: HashMap<String, ImageScript>,
    removed_images: Vec<String>,
    subscribers: Vec<mpsc::UnboundedSender<Result<UnitEvent, DriverError>>>,
    subscriptions: usize,
}

/// Scripted in-memory [`ExecutionDriver`].
///
/// Units started from an image registered with
/// [`FakeDriver::script_image`] run to completion immediately; all others
/// keep running until stopped.
#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
    open_logs: Arc<AtomicUsize>,
}

impl FakeDriver {
    /// Queue an error for the next call to `operation` (e.g. `"create"`).
    pub fn fail_next(&self, operation: &'static str, error: DriverError) {
        lock(&self.state)
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Units started from `image` exit with `exit_code` after writing
    /// `stdout`.
    pub fn script_image(&self, image: &str, exit_code: i64, stdout: &str) {
        lock(&self.state).images.insert(
            image.to_string(),
            ImageScript {
                exit_code,
                output: vec![LogChunk::stdout(stdout.to_string())],
            },
        );
    }

    /// Add an existing unit. Returns its id.
    pub fn add_unit(&self, name: &str, image: &str, running: bool) -> String {
        let mut state = lock(&self.state);
        let id = Self::allocate_id(&mut state);
        state.units.insert(
            id.clone(),
            FakeUnit {
                name: name.to_string(),
                image: image.to_string(),
                running,
                exit_code: (!running).then_some(0),
                logs: Vec::new(),
            },
        );
        id
    }

    /// Append output to a unit's log.
    pub fn push_log(&self, unit_id: &str, chunk: LogChunk) {
        if let Some(unit) = lock(&self.state).units.get_mut(unit_id) {
            unit.logs.push(chunk);
        }
    }

    pub fn set_running(&self, unit_id: &str, running: bool) {
        if let Some(unit) = lock(&self.state).units.get_mut(unit_id) {
            unit.running = running;
        }
    }

    /// Id and running flag of the unit named `name`.
    pub fn unit_named(&self, name: &str) -> Option<(String, bool)> {
        lock(&self.state)
            .units
            .iter()
            .find(|(_, u)| u.name == name)
            .map(|(id, u)| (id.clone(), u.running))
    }

    pub fn unit_count(&self) -> usize {
        lock(&self.state).units.len()
    }

    /// Every call made so far, as `operation:argument`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Number of calls to `operation`.
    pub fn count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn removed_images(&self) -> Vec<String> {
        lock(&self.state).removed_images.clone()
    }

    /// Deliver an event to every live subscription.
    pub fn emit(&self, event: UnitEvent) {
        lock(&self.state)
            .subscribers
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// End every live subscription.
    pub fn close_events(&self) {
        lock(&self.state).subscribers.clear();
    }

    /// Number of `events()` subscriptions opened so far.
    pub fn subscriptions(&self) -> usize {
        lock(&self.state).subscriptions
    }

    /// Log streams opened and not yet dropped.
    pub fn open_log_streams(&self) -> usize {
        self.open_logs.load(Ordering::SeqCst)
    }

    fn allocate_id(state: &mut FakeState) -> String {
        state.next_id += 1;
        format!("unit-{}", state.next_id)
    }

    /// Record a call and pop a scripted failure for it, if any.
    fn enter(&self, operation: &'static str, argument: &str) -> Result<MutexGuard<'_, FakeState>, DriverError> {
        let mut state = lock(&self.state);
        state.calls.push(format!("{operation}:{argument}"));
        if let Some(error) = state.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }

    fn summary(id: &str, unit: &FakeUnit) -> UnitSummary {
        UnitSummary {
            id: id.to_string(),
            name: unit.name.clone(),
            image: unit.image.clone(),
            running: unit.running,
        }
    }
}

#[async_trait]
impl ExecutionDriver for FakeDriver {
    async fn create(&self, spec: &UnitSpec) -> Result<String, DriverError> {
        let mut state = self.enter("create", &spec.name)?;
        if state.units.values().any(|u| u.name == spec.name) {
            return Err(DriverError::UnitNameConflict(spec.name.clone()));
        }
        let id = Self::allocate_id(&mut state);
        state.units.insert(
            id.clone(),
            FakeUnit {
                name: spec.name.clone(),
                image: spec.image.clone(),
                running: false,
                exit_code: None,
                logs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start(&self, unit_id: &str) -> Result<(), DriverError> {
        let mut state = self.enter("start", unit_id)?;
        let image = match state.units.get(unit_id) {
            Some(unit) => unit.image.clone(),
            None => return Err(DriverError::UnitNotFound(unit_id.to_string())),
        };
        let script = state.images.get(&image).cloned();
        if let Some(unit) = state.units.get_mut(unit_id) {
            match script {
                Some(script) => {
                    unit.running = false;
                    unit.exit_code = Some(script.exit_code);
                    unit.logs.extend(script.output);
                }
                None => {
                    unit.running = true;
                    unit.exit_code = None;
                }
            }
        }
        Ok(())
    }

    async fn stop(&self, unit_id: &str, _grace: Duration) -> Result<(), DriverError> {
        let mut state = self.enter("stop", unit_id)?;
        let unit = state
            .units
            .get_mut(unit_id)
            .ok_or_else(|| DriverError::UnitNotFound(unit_id.to_string()))?;
        if unit.running {
            unit.running = false;
            unit.exit_code = Some(143);
        }
        Ok(())
    }

    async fn wait(&self, unit_id: &str, _condition: WaitCondition) -> Result<i64, DriverError> {
        let state = self.enter("wait", unit_id)?;
        let unit = state
            .units
            .get(unit_id)
            .ok_or_else(|| DriverError::UnitNotFound(unit_id.to_string()))?;
        if unit.running {
            return Err(DriverError::Timeout {
                operation: "wait",
                after: Duration::from_secs(10),
            });
        }
        Ok(unit.exit_code.unwrap_or(0))
    }

    async fn remove(&self, unit_id: &str, _force: bool) -> Result<(), DriverError> {
        let mut state = self.enter("remove", unit_id)?;
        state
            .units
            .remove(unit_id)
            .map(|_| ())
            .ok_or_else(|| DriverError::UnitNotFound(unit_id.to_string()))
    }

    async fn inspect(&self, unit_id: &str) -> Result<UnitState, DriverError> {
        let state = self.enter("inspect", unit_id)?;
        let unit = state
            .units
            .get(unit_id)
            .ok_or_else(|| DriverError::UnitNotFound(unit_id.to_string()))?;
        Ok(UnitState {
            running: unit.running,
            exit_code: unit.exit_code,
        })
    }

    async fn list_by_name_prefix(&self, prefix: &str) -> Result<Vec<UnitSummary>, DriverError> {
        let state = self.enter("list", prefix)?;
        Ok(state
            .units
            .iter()
            .filter(|(_, u)| u.name.starts_with(prefix))
            .map(|(id, u)| Self::summary(id, u))
            .collect())
    }

    async fn list_by_image(&self, image: &str) -> Result<Vec<UnitSummary>, DriverError> {
        let state = self.enter("list_by_image", image)?;
        Ok(state
            .units
            .iter()
            .filter(|(_, u)| u.image == image)
            .map(|(id, u)| Self::summary(id, u))
            .collect())
    }

    async fn remove_image(&self, image: &str) -> Result<(), DriverError> {
        let mut state = self.enter("remove_image", image)?;
        state.units.retain(|_, u| u.image != image);
        state.removed_images.push(image.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), DriverError> {
        self.enter("ping", "")?;
        Ok(())
    }

    async fn node_name(&self) -> Result<String, DriverError> {
        self.enter("info", "")?;
        Ok(FAKE_NODE_NAME.to_string())
    }

    fn open_log_stream(&self, unit_id: &str, follow: bool) -> LogStream {
        let inner: LogStream = match self.enter("logs", unit_id) {
            Err(error) => stream::iter([Err(error)]).boxed(),
            Ok(state) => match state.units.get(unit_id) {
                None => stream::iter([Err(DriverError::UnitNotFound(unit_id.to_string()))]).boxed(),
                Some(unit) => {
                    let chunks = stream::iter(unit.logs.clone().into_iter().map(Ok));
                    if follow && unit.running {
                        chunks.chain(stream::pending()).boxed()
                    } else {
                        chunks.boxed()
                    }
                }
            },
        };

        self.open_logs.fetch_add(1, Ordering::SeqCst);
        TrackedStream {
            inner,
            open: Arc::clone(&self.open_logs),
        }
        .boxed()
    }

    fn events(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        state.subscriptions += 1;
        state.subscribers.push(tx);

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }
}

/// Log stream that decrements a live-stream counter when dropped.
struct TrackedStream {
    inner: BoxStream<'static, Result<LogChunk, DriverError>>,
    open: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = Result<LogChunk, DriverError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
