//! Typed identifiers shared across coordinator components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable task identifier, unique within one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one submission attempt, monotonic within one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The task (or the job submission itself) that produced a piece of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputProducer {
    /// The data arrived with the job pack; no task regenerates it.
    JobInput,
    /// The data is an output of the given task.
    Task(TaskId),
}

/// Uniquely names one piece of data in a job: the producing task paired with
/// a position within that task's output list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InputId {
    /// Producer of the data.
    pub producer: InputProducer,
    /// Position within the producer's outputs.
    pub position: u32,
}

impl InputId {
    /// Input id for a job-initial input at `position`.
    pub fn job_input(position: u32) -> Self {
        Self {
            producer: InputProducer::JobInput,
            position,
        }
    }

    /// Input id for output `position` of task `task_id`.
    pub fn task_output(task_id: TaskId, position: u32) -> Self {
        Self {
            producer: InputProducer::Task(task_id),
            position,
        }
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.producer {
            InputProducer::JobInput => write!(f, "input:{}", self.position),
            InputProducer::Task(t) => write!(f, "t{}:{}", t, self.position),
        }
    }
}
