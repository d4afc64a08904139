//! Coordinator mailbox messages and the handle used to deliver them.
//!
//! Contract:
//! - messages from one sender arrive in order; senders never observe partial
//!   processing because the agent handles messages one at a time;
//! - the mailbox is bounded; external senders await capacity, the agent's own
//!   posts fail fast on overflow instead of deadlocking on itself.

use gmr_common::{GmrError, InputId, Result, TaskId};
use gmr_pipeline::TaskOutput;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Whether a submission is the task's first run or a re-run after failure or
/// regeneration.
pub enum SubmitMode {
    /// First submission; the group's preferred host is passed for locality.
    FirstRun,
    /// Re-submission; host selection is delegated to the scheduler.
    ReRun,
}

#[derive(Debug, Clone)]
/// Result reported by a worker for one task run.
pub enum TaskResult {
    /// The run completed and produced the listed outputs.
    Done {
        /// Outputs in position order.
        outputs: Vec<TaskOutput>,
    },
    /// Transient failure; the task is eligible for retry.
    Error {
        /// Worker-reported failure description.
        reason: String,
    },
    /// Unrecoverable failure; the whole job is aborted.
    Fatal {
        /// Worker-reported failure description.
        reason: String,
    },
    /// An input could not be fetched from the listed hosts.
    InputError {
        /// The unreachable input.
        input: InputId,
        /// Hosts the fetch was attempted from.
        hosts: Vec<String>,
    },
}

#[derive(Debug, Clone)]
/// Messages accepted by the coordinator agent.
pub enum CoordinatorMessage {
    /// Submit the listed tasks to the cluster scheduler.
    SubmitTasks {
        /// First run or re-run.
        mode: SubmitMode,
        /// Tasks to submit.
        tasks: Vec<TaskId>,
    },
    /// A stage's last task completed (also posted for the synthetic input
    /// stage). Idempotent: redundant signals for an already-advanced stage
    /// are ignored.
    StageDone {
        /// The completed stage.
        stage: String,
    },
    /// A worker reported the result of one task run.
    TaskDone {
        /// The task the result belongs to.
        task: TaskId,
        /// Host the run executed on.
        host: String,
        /// Reported result.
        result: TaskResult,
    },
    /// The final stage completed; terminate normally.
    PipelineDone,
    /// Terminate with the given reason after best-effort cleanup.
    KillJob {
        /// Reason recorded in the terminal state.
        reason: String,
    },
}

/// Clonable address of one job coordinator.
///
/// Held by the cluster scheduler (to proxy worker results back) and by the
/// intake layer (to kill jobs). A send fails only when the coordinator has
/// terminated.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    job: String,
    tx: mpsc::Sender<CoordinatorMessage>,
}

impl CoordinatorHandle {
    pub(crate) fn new(job: String, tx: mpsc::Sender<CoordinatorMessage>) -> Self {
        Self { job, tx }
    }

    /// Name of the job this handle addresses.
    pub fn job_name(&self) -> &str {
        &self.job
    }

    /// Deliver a message, waiting for mailbox capacity.
    pub async fn send(&self, message: CoordinatorMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| GmrError::Coordinator(format!("job '{}' coordinator is gone", self.job)))
    }

    /// Deliver a worker result for one task run.
    pub async fn task_done(&self, task: TaskId, host: &str, result: TaskResult) -> Result<()> {
        self.send(CoordinatorMessage::TaskDone {
            task,
            host: host.to_string(),
            result,
        })
        .await
    }

    /// Request job termination with `reason`.
    pub async fn kill(&self, reason: &str) -> Result<()> {
        self.send(CoordinatorMessage::KillJob {
            reason: reason.to_string(),
        })
        .await
    }

    /// Self-post from inside the agent. Never awaits: the agent must not
    /// block on its own mailbox.
    pub(crate) fn post(&self, message: CoordinatorMessage) -> Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                GmrError::Coordinator(format!("job '{}' mailbox overflowed", self.job))
            }
            mpsc::error::TrySendError::Closed(_) => {
                GmrError::Coordinator(format!("job '{}' coordinator is gone", self.job))
            }
        })
    }
}
