//! Per-job coordinator: the owner of all mutable job state.
//!
//! Architecture role:
//! - drives one accepted job pack from first stage to terminal state
//! - decomposes the pipeline into tasks and hands them to the cluster
//!   scheduler
//! - absorbs transient task failures with capped randomized backoff
//! - regenerates inputs whose replicas are exhausted by walking the task
//!   dependency DAG backward
//!
//! Key modules:
//! - [`coordinator`]
//! - [`state`]
//! - [`stage`]
//! - [`failure`]
//! - [`submit`]
//! - [`scheduler`]
//! - [`messages`]
//!
//! A coordinator is a single logical agent per job: one spawned task consumes
//! a bounded mailbox and processes messages strictly serially, so no locks
//! guard the job state. Everything else talks to it through
//! [`CoordinatorHandle`].

pub mod coordinator;
pub mod failure;
pub mod messages;
pub mod scheduler;
pub mod stage;
pub mod state;
pub mod submit;

pub use coordinator::{
    submit_job, CoordinatorOptions, JobCoordinator, JobOutcome, RunningJob,
};
pub use messages::{CoordinatorHandle, CoordinatorMessage, SubmitMode, TaskResult};
pub use scheduler::{
    ClusterScheduler, EventSink, MemoryEventSink, NullEventSink, TaskSubmission,
};
pub use state::{DataInfo, JobMeta, JobState, StageInfo, TaskInfo, TaskRun, TaskSpec};
