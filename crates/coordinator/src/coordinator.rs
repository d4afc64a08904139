//! The coordinator agent: one spawned task per job, owning all mutable job
//! state and processing mailbox messages strictly serially.
//!
//! Lifecycle:
//! - intake hands [`submit_job`] the validated pack bytes;
//! - init compiles the pipeline, registers with the event sink (which
//!   assigns the unique job name) and the cluster scheduler, persists the
//!   pack under `<job_home>/<job_name>`, and synthesizes the completed
//!   input stage;
//! - the agent loop drives stages to completion and terminates on
//!   `PipelineDone`, `KillJob`, or an unrecoverable handler error.
//!
//! Failure semantics:
//! - `fatal` aborts the job with the reported reason;
//! - `error` retries with capped randomized backoff, charged to the task;
//! - `input_error` fails over to remaining replicas or regenerates the
//!   producing tasks via a backward DAG walk, charged to the `(input, host)`
//!   pair.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gmr_common::config::{env_or_default, env_u64_or_default};
use gmr_common::metrics::global_metrics;
use gmr_common::{FaultPolicy, GmrError, InputId, InputProducer, Result, TaskId};
use gmr_pipeline::{DataInput, JobPack, Pipeline, TaskOutput, INPUT_STAGE};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::failure::{self, InputErrorOutcome, RetryDecision};
use crate::messages::{CoordinatorHandle, CoordinatorMessage, SubmitMode, TaskResult};
use crate::scheduler::{ClusterScheduler, EventSink};
use crate::stage;
use crate::state::{JobMeta, JobState};
use crate::submit;

#[derive(Debug, Clone)]
/// Coordinator behavior/configuration knobs.
pub struct CoordinatorOptions {
    /// Retry and replica-failure policy.
    pub policy: FaultPolicy,
    /// Directory job packs are persisted under (`GMR_JOB_HOME`).
    pub job_home: PathBuf,
    /// Per-call bound on scheduler admission (`GMR_SUBMIT_TIMEOUT_MS`).
    pub submit_timeout: Duration,
    /// Admission attempts before the failure escalates to the job level.
    pub submit_attempts: u32,
    /// Pause before the first admission retry; doubles per attempt.
    pub submit_retry_pause: Duration,
    /// Bound on event-sink/scheduler registration at job start
    /// (`GMR_JOB_START_TIMEOUT_MS`).
    pub start_timeout: Duration,
    /// Mailbox depth; the agent aborts on overflow of its own posts.
    pub mailbox_capacity: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            policy: FaultPolicy::default(),
            job_home: PathBuf::from("./gmr_jobs"),
            submit_timeout: Duration::from_secs(30),
            submit_attempts: 3,
            submit_retry_pause: Duration::from_secs(1),
            start_timeout: Duration::from_secs(60),
            mailbox_capacity: 1024,
        }
    }
}

impl CoordinatorOptions {
    /// Build options from `GMR_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            policy: FaultPolicy::from_env(),
            job_home: PathBuf::from(env_or_default("GMR_JOB_HOME", "./gmr_jobs")),
            submit_timeout: Duration::from_millis(env_u64_or_default(
                "GMR_SUBMIT_TIMEOUT_MS",
                d.submit_timeout.as_millis() as u64,
            )),
            start_timeout: Duration::from_millis(env_u64_or_default(
                "GMR_JOB_START_TIMEOUT_MS",
                d.start_timeout.as_millis() as u64,
            )),
            ..d
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Terminal state of a job.
pub enum JobOutcome {
    /// The pipeline's last stage completed.
    Completed {
        /// Outputs of the final stage's tasks, in completion order.
        results: Vec<TaskOutput>,
    },
    /// The job was aborted: killed on request, fatal task failure, or an
    /// exhausted retry budget.
    Killed {
        /// Terminal reason.
        reason: String,
    },
}

/// A started job: its assigned name, the handle messages are delivered
/// through, and the awaitable terminal outcome.
#[derive(Debug)]
pub struct RunningJob {
    name: String,
    handle: CoordinatorHandle,
    outcome: JoinHandle<JobOutcome>,
}

impl RunningJob {
    /// Unique job name assigned at registration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle for delivering task results or a kill request.
    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Wait for the job's terminal state.
    pub async fn wait(self) -> Result<JobOutcome> {
        self.outcome
            .await
            .map_err(|e| GmrError::Coordinator(format!("coordinator task failed: {e}")))
    }
}

/// Validate a job pack, register the job, and spawn its coordinator.
///
/// Returns once the job is registered and its first stage is queued; any
/// error here means no coordinator was spawned and no state persists.
pub async fn submit_job(
    pack_bytes: &[u8],
    scheduler: Arc<dyn ClusterScheduler>,
    events: Arc<dyn EventSink>,
    options: CoordinatorOptions,
) -> Result<RunningJob> {
    let pack = JobPack::from_bytes(pack_bytes)?;
    let pipeline = pack.pipeline()?;
    let (tx, rx) = mpsc::channel(options.mailbox_capacity);

    let registration = async {
        let provisional = CoordinatorHandle::new(pack.prefix.clone(), tx.clone());
        let name = events.new_job(&pack.prefix, provisional).await?;
        let handle = CoordinatorHandle::new(name.clone(), tx.clone());
        scheduler.new_job(&name, handle.clone()).await?;
        Ok::<_, GmrError>((name, handle))
    };
    let (name, handle) = timeout(options.start_timeout, registration)
        .await
        .map_err(|_| {
            GmrError::Scheduler(format!(
                "job '{}' registration timed out after {} ms",
                pack.prefix,
                options.start_timeout.as_millis()
            ))
        })??;

    save_pack(&options.job_home, &name, pack_bytes)?;

    let mut state = JobState::new(name.clone());
    state.init_input_stage();
    let coordinator = JobCoordinator {
        name: name.clone(),
        meta: JobMeta {
            name: name.clone(),
            env: pack.env.clone(),
            worker: pack.worker.clone(),
            schedule: pack.schedule.clone(),
        },
        pack,
        pipeline,
        options,
        scheduler,
        events,
        handle: handle.clone(),
        state,
        rng: StdRng::from_entropy(),
    };
    coordinator.handle.post(CoordinatorMessage::StageDone {
        stage: INPUT_STAGE.to_string(),
    })?;

    global_metrics().inc_jobs_started();
    coordinator.events.event(&name, "job_started").await;
    info!(job = %name, operator = "Coordinator", "job started");

    let outcome = tokio::spawn(coordinator.run(rx));
    Ok(RunningJob {
        name,
        handle,
        outcome,
    })
}

fn save_pack(job_home: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(job_home)?;
    std::fs::write(job_home.join(name), bytes)?;
    Ok(())
}

enum Step {
    Continue,
    Stop(JobOutcome),
}

/// The per-job agent. All fields are private to the mailbox task; tests in
/// this crate drive [`JobCoordinator::receive`] directly.
pub struct JobCoordinator {
    name: String,
    pack: JobPack,
    meta: JobMeta,
    pipeline: Pipeline,
    options: CoordinatorOptions,
    scheduler: Arc<dyn ClusterScheduler>,
    events: Arc<dyn EventSink>,
    handle: CoordinatorHandle,
    state: JobState,
    rng: StdRng,
}

impl JobCoordinator {
    async fn run(mut self, mut rx: mpsc::Receiver<CoordinatorMessage>) -> JobOutcome {
        loop {
            let Some(message) = rx.recv().await else {
                let outcome = JobOutcome::Killed {
                    reason: "coordinator mailbox closed".to_string(),
                };
                self.finish(&outcome).await;
                return outcome;
            };
            let step = match self.receive(message).await {
                Ok(step) => step,
                Err(e) => Step::Stop(JobOutcome::Killed {
                    reason: e.to_string(),
                }),
            };
            if let Step::Stop(outcome) = step {
                self.finish(&outcome).await;
                return outcome;
            }
        }
    }

    async fn receive(&mut self, message: CoordinatorMessage) -> Result<Step> {
        match message {
            CoordinatorMessage::SubmitTasks { mode, tasks } => {
                self.handle_submit_tasks(mode, &tasks).await
            }
            CoordinatorMessage::StageDone { stage } => self.handle_stage_done(&stage).await,
            CoordinatorMessage::TaskDone { task, host, result } => {
                self.handle_task_done(task, &host, result).await
            }
            CoordinatorMessage::PipelineDone => self.handle_pipeline_done(),
            CoordinatorMessage::KillJob { reason } => Ok(Step::Stop(JobOutcome::Killed { reason })),
        }
    }

    async fn handle_submit_tasks(&mut self, mode: SubmitMode, tasks: &[TaskId]) -> Result<Step> {
        submit::submit_tasks(&mut self.state, &self.scheduler, &self.options, mode, tasks).await?;
        Ok(Step::Continue)
    }

    async fn handle_stage_done(&mut self, done_stage: &str) -> Result<Step> {
        let Some(next) = self.pipeline.next_stage(done_stage)?.cloned() else {
            self.handle.post(CoordinatorMessage::PipelineDone)?;
            return Ok(Step::Continue);
        };
        if self.state.stage_started(&next.name) {
            debug!(
                job = %self.name,
                stage = %next.name,
                operator = "Coordinator",
                "stage already started; ignoring redundant stage-done"
            );
            return Ok(Step::Continue);
        }
        let prev_outputs = self.gather_stage_outputs(done_stage)?;
        let task_ids = stage::start_stage(&mut self.state, &next, prev_outputs, &self.meta);
        self.events
            .event(&self.name, &format!("stage {} started", next.name))
            .await;
        if task_ids.is_empty() {
            // A stage with no work closes immediately.
            self.handle
                .post(CoordinatorMessage::StageDone { stage: next.name })?;
        } else {
            self.handle.post(CoordinatorMessage::SubmitTasks {
                mode: SubmitMode::FirstRun,
                tasks: task_ids,
            })?;
        }
        Ok(Step::Continue)
    }

    async fn handle_task_done(
        &mut self,
        task: TaskId,
        host: &str,
        result: TaskResult,
    ) -> Result<Step> {
        if !self.state.is_running(task) {
            debug!(
                job = %self.name,
                task = %task,
                operator = "Coordinator",
                "ignoring result for a task that is not running"
            );
            return Ok(Step::Continue);
        }
        match result {
            TaskResult::Fatal { reason } => {
                self.state.mark_stopped(task)?;
                self.events
                    .task_event(&self.name, task, &format!("fatal on {host}: {reason}"))
                    .await;
                Ok(Step::Stop(JobOutcome::Killed { reason }))
            }
            TaskResult::Error { reason } => {
                self.state.mark_stopped(task)?;
                self.retry_or_abort(task, host, &reason).await
            }
            TaskResult::InputError { input, .. }
                if input.producer == InputProducer::JobInput =>
            {
                // TODO: route job-input fetch failures through the replica
                // failure counts instead of the generic retry path; as it
                // stands the reported host list is dropped here.
                self.state.mark_stopped(task)?;
                self.retry_or_abort(task, host, &format!("input {input} unreachable"))
                    .await
            }
            TaskResult::InputError { input, hosts } => {
                self.state.mark_stopped(task)?;
                self.handle_input_error(task, input, &hosts).await
            }
            TaskResult::Done { outputs } => self.task_complete(task, host, outputs).await,
        }
    }

    async fn handle_input_error(
        &mut self,
        task: TaskId,
        input: InputId,
        hosts: &[String],
    ) -> Result<Step> {
        let outcome = failure::on_input_error(
            &mut self.state,
            &self.pipeline,
            &self.options.policy,
            task,
            input,
            hosts,
        )?;
        match outcome {
            InputErrorOutcome::Retry => {
                self.events
                    .task_event(
                        &self.name,
                        task,
                        &format!("input {input} unreachable on {hosts:?}; trying another replica"),
                    )
                    .await;
                self.handle.post(CoordinatorMessage::SubmitTasks {
                    mode: SubmitMode::ReRun,
                    tasks: vec![task],
                })?;
                Ok(Step::Continue)
            }
            InputErrorOutcome::Regenerate { frontier } => {
                global_metrics().inc_input_regenerations(&self.name);
                warn!(
                    job = %self.name,
                    task = %task,
                    input = %input,
                    frontier = frontier.len(),
                    operator = "FailureHandler",
                    "input replicas exhausted; regenerating"
                );
                self.events
                    .task_event(
                        &self.name,
                        task,
                        &format!("regenerating input {input} via {} tasks", frontier.len()),
                    )
                    .await;
                if !frontier.is_empty() {
                    self.handle.post(CoordinatorMessage::SubmitTasks {
                        mode: SubmitMode::ReRun,
                        tasks: frontier,
                    })?;
                }
                // The consumer stays parked in its ancestors' waiter sets
                // and is woken by the completion path.
                Ok(Step::Continue)
            }
        }
    }

    async fn retry_or_abort(&mut self, task: TaskId, host: &str, reason: &str) -> Result<Step> {
        let decision = failure::retry_task(
            &mut self.state,
            &self.options.policy,
            &mut self.rng,
            task,
            host,
            reason,
        )?;
        match decision {
            RetryDecision::Abort { reason } => {
                self.events
                    .task_event(&self.name, task, &format!("giving up: {reason}"))
                    .await;
                Ok(Step::Stop(JobOutcome::Killed { reason }))
            }
            RetryDecision::Backoff { fail_count, delay } => {
                let stage = self.state.task(task)?.spec.stage.clone();
                global_metrics().inc_task_retries(&self.name, &stage);
                warn!(
                    job = %self.name,
                    task = %task,
                    fail_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    operator = "FailureHandler",
                    "task failed; retrying after backoff"
                );
                self.events
                    .task_event(
                        &self.name,
                        task,
                        &format!("failed on {host} ({reason}); retry {fail_count} scheduled"),
                    )
                    .await;
                // The sleep runs off-agent; the re-submission arrives later
                // as a normal message and becomes a no-op if the job ended.
                let handle = self.handle.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    let _ = handle
                        .send(CoordinatorMessage::SubmitTasks {
                            mode: SubmitMode::ReRun,
                            tasks: vec![task],
                        })
                        .await;
                });
                Ok(Step::Continue)
            }
        }
    }

    async fn task_complete(
        &mut self,
        task: TaskId,
        host: &str,
        outputs: Vec<TaskOutput>,
    ) -> Result<Step> {
        let stage_name = {
            let info = self.state.task_mut(task)?;
            // a success on this host renders its earlier failures moot
            info.failed_hosts.remove(host);
            info.outputs = outputs.clone();
            info.spec.stage.clone()
        };
        let waiters = std::mem::take(&mut self.state.task_mut(task)?.waiters);
        // Re-point consumers already wired to this task's outputs at the
        // regenerated replicas.
        for output in &outputs {
            let id = InputId::task_output(task, output.position);
            if let Some(data) = self.state.data_entry(id) {
                data.refresh_locations(output);
            }
        }
        self.state.mark_done(task)?;
        debug!(
            job = %self.name,
            task = %task,
            host = %host,
            outputs = outputs.len(),
            operator = "Coordinator",
            "task completed"
        );
        if !waiters.is_empty() {
            self.handle.post(CoordinatorMessage::SubmitTasks {
                mode: SubmitMode::ReRun,
                tasks: waiters.into_iter().collect(),
            })?;
        }
        if self.state.stage(&stage_name)?.is_complete() {
            self.events
                .event(&self.name, &format!("stage {stage_name} done"))
                .await;
            self.handle.post(CoordinatorMessage::StageDone {
                stage: stage_name,
            })?;
        }
        Ok(Step::Continue)
    }

    fn handle_pipeline_done(&mut self) -> Result<Step> {
        let last = self.pipeline.last_stage().to_string();
        let done = self.state.stage(&last)?.done.clone();
        let mut results = Vec::new();
        for task in done {
            results.extend(self.state.task(task)?.outputs.iter().cloned());
        }
        Ok(Step::Stop(JobOutcome::Completed { results }))
    }

    fn gather_stage_outputs(&self, stage: &str) -> Result<Vec<(InputId, DataInput)>> {
        if stage == INPUT_STAGE {
            return Ok(self
                .pack
                .initial_inputs()?
                .into_iter()
                .enumerate()
                .map(|(i, input)| (InputId::job_input(i as u32), input))
                .collect());
        }
        let mut outputs = Vec::new();
        for &task in &self.state.stage(stage)?.done {
            for output in &self.state.task(task)?.outputs {
                outputs.push((
                    InputId::task_output(task, output.position),
                    output.as_data_input(),
                ));
            }
        }
        Ok(outputs)
    }

    async fn finish(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed { results } => {
                global_metrics().inc_jobs_finished("ready");
                self.events.event(&self.name, "READY").await;
                info!(
                    job = %self.name,
                    results = results.len(),
                    operator = "Coordinator",
                    "job completed"
                );
            }
            JobOutcome::Killed { reason } => {
                global_metrics().inc_jobs_finished("killed");
                self.events
                    .event(&self.name, &format!("ERROR: {reason}"))
                    .await;
                warn!(
                    job = %self.name,
                    reason = %reason,
                    operator = "Coordinator",
                    "job killed"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
