//! Contracts for the coordinator's external collaborators: the cluster-wide
//! task scheduler and the best-effort event sink.
//!
//! Retry/ownership semantics:
//! - the scheduler may be called concurrently by many coordinators (one per
//!   job) and must be safe under that;
//! - the event sink is best-effort: emissions return nothing and
//!   implementations are expected to drop lines rather than block the
//!   coordinator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use gmr_common::{Result, TaskId};

use crate::messages::CoordinatorHandle;
use crate::state::{TaskRun, TaskSpec};

#[derive(Debug, Clone)]
/// One task handed to the cluster scheduler: the immutable spec plus this
/// attempt's run record.
pub struct TaskSubmission {
    /// Immutable task description.
    pub spec: TaskSpec,
    /// This attempt: run id, requested host, resolved input snapshot.
    pub run: TaskRun,
}

#[async_trait]
/// Cluster-wide task scheduler contract.
pub trait ClusterScheduler: Send + Sync {
    /// Register a job and the handle its task results are delivered to.
    async fn new_job(&self, job_name: &str, coordinator: CoordinatorHandle) -> Result<()>;

    /// Admit one task run for execution. Results arrive later through the
    /// job's coordinator handle.
    async fn new_task(&self, submission: TaskSubmission) -> Result<()>;
}

#[async_trait]
/// Best-effort job event channel.
pub trait EventSink: Send + Sync {
    /// Register a job under `prefix` and return its unique name. The handle
    /// lets sinks observe the coordinator; it addresses the job by its
    /// prefix until the assigned name is known.
    async fn new_job(&self, prefix: &str, coordinator: CoordinatorHandle) -> Result<String>;

    /// Emit a job-level event line.
    async fn event(&self, job: &str, line: &str);

    /// Emit a task-scoped event line.
    async fn task_event(&self, job: &str, task: TaskId, line: &str);
}

#[derive(Debug, Default)]
/// Event sink that assigns names and discards every line.
pub struct NullEventSink {
    next: AtomicU64,
}

impl NullEventSink {
    /// Construct a sink with its name counter at zero.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventSink for NullEventSink {
    async fn new_job(&self, prefix: &str, _coordinator: CoordinatorHandle) -> Result<String> {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(format!("{prefix}@{seq}"))
    }

    async fn event(&self, _job: &str, _line: &str) {}

    async fn task_event(&self, _job: &str, _task: TaskId, _line: &str) {}
}

#[derive(Debug, Default)]
/// Event sink retaining every line in memory, for tests and demos.
pub struct MemoryEventSink {
    next: AtomicU64,
    lines: Mutex<Vec<String>>,
}

impl MemoryEventSink {
    /// Construct an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every line emitted so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn new_job(&self, prefix: &str, _coordinator: CoordinatorHandle) -> Result<String> {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(format!("{prefix}@{seq}"))
    }

    async fn event(&self, job: &str, line: &str) {
        self.push(format!("{job} {line}"));
    }

    async fn task_event(&self, job: &str, task: TaskId, line: &str) {
        self.push(format!("{job} task {task} {line}"));
    }
}
