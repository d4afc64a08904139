//! Submission dispatcher: package `(spec, run)` pairs and hand them to the
//! cluster scheduler.
//!
//! Contract:
//! - the run-id counter advances unconditionally, once per submission
//!   attempt batch entry;
//! - first runs pass the group's preferred host, re-runs pass no host and
//!   leave placement to the scheduler;
//! - each admission call is bounded by the submission timeout and retried a
//!   fixed number of times before the failure escalates to the job level.

use std::sync::Arc;

use gmr_common::{GmrError, Result, TaskId};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::coordinator::CoordinatorOptions;
use crate::messages::SubmitMode;
use crate::scheduler::{ClusterScheduler, TaskSubmission};
use crate::state::{JobState, TaskRun};

/// Submit `tasks` to the scheduler in order, marking each as running.
///
/// Errors only when a submission exhausts its retry budget; the caller
/// aborts the job in that case.
pub async fn submit_tasks(
    state: &mut JobState,
    scheduler: &Arc<dyn ClusterScheduler>,
    options: &CoordinatorOptions,
    mode: SubmitMode,
    tasks: &[TaskId],
) -> Result<()> {
    for &task in tasks {
        if state.is_running(task) {
            debug!(
                job = %state.job_name(),
                task = %task,
                operator = "SubmitDispatcher",
                "task already running; skipping submission"
            );
            continue;
        }
        let info = state.task(task)?;
        let spec = info.spec.clone();
        let failed_hosts = info.failed_hosts.clone();
        let host = match mode {
            SubmitMode::FirstRun => spec.group.host.clone(),
            SubmitMode::ReRun => None,
        };
        let run = TaskRun {
            run_id: state.allocate_run_id(),
            task_id: task,
            host,
            inputs: state.resolve_inputs(task)?,
            failed_hosts,
        };
        let run_id = run.run_id;
        dispatch(scheduler, options, TaskSubmission { spec, run }).await?;
        state.mark_running(task)?;
        debug!(
            job = %state.job_name(),
            task = %task,
            run = %run_id,
            mode = ?mode,
            operator = "SubmitDispatcher",
            "task submitted"
        );
    }
    Ok(())
}

async fn dispatch(
    scheduler: &Arc<dyn ClusterScheduler>,
    options: &CoordinatorOptions,
    submission: TaskSubmission,
) -> Result<()> {
    let task = submission.spec.task_id;
    let mut pause = options.submit_retry_pause;
    let mut last_error = String::new();
    for attempt in 1..=options.submit_attempts {
        match timeout(options.submit_timeout, scheduler.new_task(submission.clone())).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => {
                last_error = format!(
                    "submission timed out after {} ms",
                    options.submit_timeout.as_millis()
                );
            }
        }
        if attempt < options.submit_attempts {
            warn!(
                task = %task,
                attempt,
                error = %last_error,
                operator = "SubmitDispatcher",
                "task submission failed; retrying"
            );
            sleep(pause).await;
            pause = pause.saturating_mul(2);
        }
    }
    Err(GmrError::Scheduler(format!(
        "task {task} submission failed after {} attempts: {last_error}",
        options.submit_attempts
    )))
}
