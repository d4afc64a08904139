//! Stage builder: materialize the next stage's tasks from the previous
//! stage's outputs.
//!
//! Contract:
//! - each grouping bucket becomes exactly one task; bucket order is
//!   deterministic, so task-id allocation is reproducible for identical
//!   inputs;
//! - every input consumed by the new stage gets a location record before any
//!   of the stage's tasks is submitted;
//! - an empty bucket list is legal: the stage is started with zero tasks and
//!   the caller closes it immediately.

use gmr_common::{InputId, TaskId};
use gmr_pipeline::grouping::group_outputs;
use gmr_pipeline::{DataInput, PipelineStage};
use tracing::info;

use crate::state::{DataInfo, JobMeta, JobState, TaskSpec};

/// Build and register the tasks of `stage` from the previous stage's
/// outputs. Returns the new task ids in submission order.
pub fn start_stage(
    state: &mut JobState,
    stage: &PipelineStage,
    prev_outputs: Vec<(InputId, DataInput)>,
    job: &JobMeta,
) -> Vec<TaskId> {
    let buckets = group_outputs(stage.grouping, prev_outputs);
    let mut task_ids = Vec::with_capacity(buckets.len());
    for (key, members) in buckets {
        let task_id = state.allocate_task_id();
        let mut inputs = Vec::with_capacity(members.len());
        for (input_id, data_input) in members {
            inputs.push(input_id);
            state.insert_data(input_id, DataInfo::new(data_input));
        }
        state.insert_task(TaskSpec {
            task_id,
            stage: stage.name.clone(),
            group: key,
            grouping: stage.grouping,
            inputs,
            job_name: job.name.clone(),
            job_env: job.env.clone(),
            worker: job.worker.clone(),
            schedule: job.schedule.clone(),
        });
        task_ids.push(task_id);
    }
    state.start_stage(&stage.name, &task_ids);
    info!(
        job = %job.name,
        stage = %stage.name,
        tasks = task_ids.len(),
        operator = "StageBuilder",
        "stage started"
    );
    task_ids
}
