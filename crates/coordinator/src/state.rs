//! In-memory job state: tasks, data locations, and stage accounting.
//!
//! Contract:
//! - the coordinator agent is the exclusive mutator; everything else sees
//!   immutable snapshots;
//! - task ids and run ids are strictly monotonic and never reused;
//! - for every started stage, `all == |done| + |running| + |stopped|` holds
//!   after every transition;
//! - ordered maps keep iteration (and therefore task allocation and
//!   submission order) deterministic for identical inputs.

use std::collections::{BTreeMap, BTreeSet};

use gmr_common::metrics::global_metrics;
use gmr_common::{GmrError, InputId, Result, RunId, TaskId};
use gmr_pipeline::{DataInput, GroupKey, Grouping, Replica, ScheduleOptions, TaskOutput};
use gmr_pipeline::INPUT_STAGE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Immutable description of one task, built by the stage builder.
pub struct TaskSpec {
    /// Task identifier, unique within the job.
    pub task_id: TaskId,
    /// Stage the task belongs to.
    pub stage: String,
    /// Bucket identity: label plus preferred host for first-run locality.
    pub group: GroupKey,
    /// Grouping that shaped the task's stage.
    pub grouping: Grouping,
    /// Inputs consumed by the task.
    pub inputs: Vec<InputId>,
    /// Owning job name.
    pub job_name: String,
    /// Job environment forwarded to the worker.
    pub job_env: BTreeMap<String, String>,
    /// Worker binary handle.
    pub worker: String,
    /// Job scheduling preferences.
    pub schedule: ScheduleOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One submission attempt of a task.
pub struct TaskRun {
    /// Run identifier, monotonic within the job.
    pub run_id: RunId,
    /// The submitted task.
    pub task_id: TaskId,
    /// Requested host, or `None` to let the scheduler choose.
    pub host: Option<String>,
    /// Input locations resolved at submission time.
    pub inputs: Vec<(InputId, DataInput)>,
    /// Hosts previous runs of this task failed on.
    pub failed_hosts: BTreeSet<String>,
}

#[derive(Debug)]
/// Mutable record of one task.
pub struct TaskInfo {
    /// Immutable spec.
    pub spec: TaskSpec,
    /// Outputs recorded on completion; empty before.
    pub outputs: Vec<TaskOutput>,
    /// Transient failures charged to this task so far.
    pub failed_count: u32,
    /// Hosts the task failed on; a host is removed only by succeeding on it.
    pub failed_hosts: BTreeSet<String>,
    /// Tasks parked until this task's outputs are (re)produced.
    pub waiters: BTreeSet<TaskId>,
}

#[derive(Debug, Default)]
/// Per-stage task accounting.
pub struct StageInfo {
    /// Total task count, fixed when the stage is started.
    pub all: usize,
    /// Completed tasks in completion order.
    pub done: Vec<TaskId>,
    /// Tasks currently submitted to the scheduler.
    pub running: BTreeSet<TaskId>,
    /// Tasks between submissions (created, failed, or parked).
    pub stopped: BTreeSet<TaskId>,
}

impl StageInfo {
    /// Whether every task of the stage has completed.
    pub fn is_complete(&self) -> bool {
        self.done.len() == self.all
    }
}

#[derive(Debug)]
/// Location and failure record of one input.
pub struct DataInfo {
    /// Original descriptor the input was registered with.
    pub source: DataInput,
    /// Live locations: host to replica address.
    pub locations: BTreeMap<String, String>,
    /// Fetch failures per host; monotonic non-decreasing.
    pub failures: BTreeMap<String, u32>,
}

impl DataInfo {
    /// Register an input, indexing its local replicas by host.
    pub fn new(source: DataInput) -> Self {
        let mut locations = BTreeMap::new();
        for replica in &source.replicas {
            if let Some(host) = &replica.host {
                locations
                    .entry(host.clone())
                    .or_insert_with(|| replica.url.clone());
            }
        }
        Self {
            source,
            locations,
            failures: BTreeMap::new(),
        }
    }

    /// Charge one fetch failure to `host`.
    pub fn record_failure(&mut self, host: &str) {
        *self.failures.entry(host.to_string()).or_insert(0) += 1;
    }

    /// Hosts still under the per-input failure cap.
    pub fn usable_locations(&self, cap: u32) -> Vec<&str> {
        self.locations
            .keys()
            .filter(|host| self.failures.get(*host).copied().unwrap_or(0) < cap)
            .map(String::as_str)
            .collect()
    }

    /// Replace the live locations with a regenerated output's replicas.
    ///
    /// Failure counts are kept: they are per host, not per replica
    /// generation.
    pub fn refresh_locations(&mut self, output: &TaskOutput) {
        self.locations.clear();
        for replica in &output.replicas {
            if let Some(host) = &replica.host {
                self.locations
                    .entry(host.clone())
                    .or_insert_with(|| replica.url.clone());
            }
        }
    }

    /// Snapshot the input as seen by a new run: live local locations plus
    /// any remote-only replicas from the original descriptor.
    pub fn snapshot(&self) -> DataInput {
        let mut replicas = self
            .locations
            .iter()
            .map(|(host, url)| Replica {
                host: Some(host.clone()),
                url: url.clone(),
            })
            .collect::<Vec<_>>();
        replicas.extend(
            self.source
                .replicas
                .iter()
                .filter(|r| r.host.is_none())
                .cloned(),
        );
        DataInput {
            label: self.source.label.clone(),
            replicas,
        }
    }
}

#[derive(Debug, Clone)]
/// Job metadata copied into every task spec.
pub struct JobMeta {
    /// Job name assigned at registration.
    pub name: String,
    /// Job environment.
    pub env: BTreeMap<String, String>,
    /// Worker binary handle.
    pub worker: String,
    /// Scheduling preferences.
    pub schedule: ScheduleOptions,
}

#[derive(Debug)]
/// The coordinator's private store: three ordered maps and two counters.
pub struct JobState {
    job: String,
    next_task_id: u64,
    next_run_id: u64,
    tasks: BTreeMap<TaskId, TaskInfo>,
    data_map: BTreeMap<InputId, DataInfo>,
    stage_info: BTreeMap<String, StageInfo>,
}

impl JobState {
    /// Empty state for the named job.
    pub fn new(job: String) -> Self {
        Self {
            job,
            next_task_id: 0,
            next_run_id: 0,
            tasks: BTreeMap::new(),
            data_map: BTreeMap::new(),
            stage_info: BTreeMap::new(),
        }
    }

    /// Owning job name.
    pub fn job_name(&self) -> &str {
        &self.job
    }

    /// Allocate the next task id.
    pub fn allocate_task_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        id
    }

    /// Allocate the next run id.
    pub fn allocate_run_id(&mut self) -> RunId {
        let id = RunId(self.next_run_id);
        self.next_run_id += 1;
        id
    }

    /// Next task id to be allocated (test observability).
    pub fn next_task_id(&self) -> u64 {
        self.next_task_id
    }

    /// Next run id to be allocated (test observability).
    pub fn next_run_id(&self) -> u64 {
        self.next_run_id
    }

    /// Record a freshly built task.
    pub fn insert_task(&mut self, spec: TaskSpec) {
        self.tasks.insert(
            spec.task_id,
            TaskInfo {
                spec,
                outputs: Vec::new(),
                failed_count: 0,
                failed_hosts: BTreeSet::new(),
                waiters: BTreeSet::new(),
            },
        );
    }

    /// Look up a task.
    pub fn task(&self, id: TaskId) -> Result<&TaskInfo> {
        self.tasks
            .get(&id)
            .ok_or_else(|| GmrError::Coordinator(format!("unknown task {id}")))
    }

    /// Look up a task for mutation.
    pub fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskInfo> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| GmrError::Coordinator(format!("unknown task {id}")))
    }

    /// Register an input's locations if not already present.
    pub fn insert_data(&mut self, id: InputId, info: DataInfo) {
        self.data_map.entry(id).or_insert(info);
    }

    /// Look up an input record.
    pub fn data(&self, id: InputId) -> Result<&DataInfo> {
        self.data_map
            .get(&id)
            .ok_or_else(|| GmrError::Coordinator(format!("unknown input {id}")))
    }

    /// Look up an input record for mutation.
    pub fn data_mut(&mut self, id: InputId) -> Result<&mut DataInfo> {
        self.data_map
            .get_mut(&id)
            .ok_or_else(|| GmrError::Coordinator(format!("unknown input {id}")))
    }

    /// Input record for mutation, if the input is registered.
    pub fn data_entry(&mut self, id: InputId) -> Option<&mut DataInfo> {
        self.data_map.get_mut(&id)
    }

    /// Whether the stage has been started.
    pub fn stage_started(&self, name: &str) -> bool {
        self.stage_info.contains_key(name)
    }

    /// Look up a started stage.
    pub fn stage(&self, name: &str) -> Result<&StageInfo> {
        self.stage_info
            .get(name)
            .ok_or_else(|| GmrError::Coordinator(format!("stage '{name}' not started")))
    }

    /// Start a stage: fix its task count and park every task for its first
    /// submission.
    pub fn start_stage(&mut self, name: &str, task_ids: &[TaskId]) {
        let info = StageInfo {
            all: task_ids.len(),
            done: Vec::new(),
            running: BTreeSet::new(),
            stopped: task_ids.iter().copied().collect(),
        };
        self.publish_stage_metrics(name, &info);
        self.stage_info.insert(name.to_string(), info);
    }

    /// Record the synthetic, already-complete stage holding the job's
    /// initial inputs.
    pub fn init_input_stage(&mut self) {
        self.stage_info
            .insert(INPUT_STAGE.to_string(), StageInfo::default());
    }

    /// Whether the task is currently submitted to the scheduler.
    pub fn is_running(&self, id: TaskId) -> bool {
        self.tasks
            .get(&id)
            .and_then(|t| self.stage_info.get(&t.spec.stage))
            .is_some_and(|s| s.running.contains(&id))
    }

    /// Move a task into `running` from `stopped`, or from `done` when it is
    /// being regenerated.
    pub fn mark_running(&mut self, id: TaskId) -> Result<()> {
        let stage = self.task(id)?.spec.stage.clone();
        let info = self.stage_info_mut(&stage)?;
        if !info.stopped.remove(&id) {
            info.done.retain(|d| *d != id);
        }
        info.running.insert(id);
        self.sync_stage_metrics(&stage)?;
        Ok(())
    }

    /// Move a task from `running` into `stopped`.
    pub fn mark_stopped(&mut self, id: TaskId) -> Result<()> {
        let stage = self.task(id)?.spec.stage.clone();
        let info = self.stage_info_mut(&stage)?;
        info.running.remove(&id);
        info.stopped.insert(id);
        self.sync_stage_metrics(&stage)?;
        Ok(())
    }

    /// Move a task from `running` into `done`.
    pub fn mark_done(&mut self, id: TaskId) -> Result<()> {
        let stage = self.task(id)?.spec.stage.clone();
        let info = self.stage_info_mut(&stage)?;
        info.running.remove(&id);
        if !info.done.contains(&id) {
            info.done.push(id);
        }
        self.sync_stage_metrics(&stage)?;
        Ok(())
    }

    /// Resolve the current location snapshot of a task's inputs.
    pub fn resolve_inputs(&self, id: TaskId) -> Result<Vec<(InputId, DataInput)>> {
        self.task(id)?
            .spec
            .inputs
            .iter()
            .map(|input| Ok((*input, self.data(*input)?.snapshot())))
            .collect()
    }

    fn stage_info_mut(&mut self, name: &str) -> Result<&mut StageInfo> {
        self.stage_info
            .get_mut(name)
            .ok_or_else(|| GmrError::Coordinator(format!("stage '{name}' not started")))
    }

    fn sync_stage_metrics(&self, name: &str) -> Result<()> {
        let info = self.stage(name)?;
        self.publish_stage_metrics(name, info);
        Ok(())
    }

    fn publish_stage_metrics(&self, name: &str, info: &StageInfo) {
        global_metrics().set_stage_tasks(
            &self.job,
            name,
            info.running.len() as u64,
            info.done.len() as u64,
            info.stopped.len() as u64,
        );
    }
}
