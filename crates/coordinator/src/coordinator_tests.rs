use super::*;
use crate::messages::{CoordinatorMessage, SubmitMode, TaskResult};
use crate::scheduler::{ClusterScheduler, NullEventSink, TaskSubmission};
use async_trait::async_trait;
use gmr_common::TaskId;
use gmr_pipeline::TaskOutput;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct RecordingScheduler {
    submissions: Mutex<Vec<TaskSubmission>>,
}

impl RecordingScheduler {
    fn submissions(&self) -> Vec<TaskSubmission> {
        self.submissions.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ClusterScheduler for RecordingScheduler {
    async fn new_job(&self, _job_name: &str, _coordinator: CoordinatorHandle) -> Result<()> {
        Ok(())
    }

    async fn new_task(&self, submission: TaskSubmission) -> Result<()> {
        self.submissions.lock().expect("lock").push(submission);
        Ok(())
    }
}

fn test_pack() -> JobPack {
    let bytes = serde_json::to_vec(&serde_json::json!({
        "prefix": "unit",
        "worker": "gmr-worker",
        "stages": [
            {"name": "map", "grouping": "split"},
            {"name": "reduce", "grouping": "group_all"},
        ],
        "inputs": [["gmr://h1/part-0"], ["gmr://h2/part-1"]],
    }))
    .expect("encode pack");
    JobPack::from_bytes(&bytes).expect("pack")
}

fn build(
    policy: FaultPolicy,
) -> (
    JobCoordinator,
    mpsc::Receiver<CoordinatorMessage>,
    Arc<RecordingScheduler>,
) {
    let pack = test_pack();
    let pipeline = pack.pipeline().expect("pipeline");
    let (tx, rx) = mpsc::channel(64);
    let handle = CoordinatorHandle::new("unit@0".to_string(), tx);
    let scheduler = Arc::new(RecordingScheduler::default());
    let mut state = JobState::new("unit@0".to_string());
    state.init_input_stage();
    let coordinator = JobCoordinator {
        name: "unit@0".to_string(),
        meta: JobMeta {
            name: "unit@0".to_string(),
            env: pack.env.clone(),
            worker: pack.worker.clone(),
            schedule: pack.schedule.clone(),
        },
        pack,
        pipeline,
        options: CoordinatorOptions {
            policy,
            submit_retry_pause: Duration::from_millis(10),
            ..CoordinatorOptions::default()
        },
        scheduler: Arc::clone(&scheduler) as Arc<dyn ClusterScheduler>,
        events: Arc::new(NullEventSink::new()),
        handle,
        state,
        rng: StdRng::seed_from_u64(42),
    };
    (coordinator, rx, scheduler)
}

fn drain(rx: &mut mpsc::Receiver<CoordinatorMessage>) -> Vec<CoordinatorMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

fn fast_policy() -> FaultPolicy {
    FaultPolicy {
        max_failure_rate: 3,
        failed_min_pause_ms: 5,
        failed_max_pause_ms: 20,
        failed_pause_randomize_ms: 5,
        input_failure_cap: 3,
    }
}

async fn step(coordinator: &mut JobCoordinator, message: CoordinatorMessage) -> Step {
    coordinator.receive(message).await.expect("handler")
}

/// Drive the coordinator through input-stage completion and first-stage
/// submission, returning the submitted task ids.
async fn start_first_stage(
    coordinator: &mut JobCoordinator,
    rx: &mut mpsc::Receiver<CoordinatorMessage>,
) -> Vec<TaskId> {
    step(
        coordinator,
        CoordinatorMessage::StageDone {
            stage: INPUT_STAGE.to_string(),
        },
    )
    .await;
    let posted = drain(rx);
    assert_eq!(posted.len(), 1);
    let CoordinatorMessage::SubmitTasks { mode, tasks } = posted.into_iter().next().expect("msg")
    else {
        panic!("expected SubmitTasks");
    };
    assert_eq!(mode, SubmitMode::FirstRun);
    let ids = tasks.clone();
    step(
        coordinator,
        CoordinatorMessage::SubmitTasks { mode, tasks },
    )
    .await;
    ids
}

fn output_on(position: u32, label: &str, host: &str) -> TaskOutput {
    TaskOutput::on_host(position, label, host, &format!("gmr://{host}/out-{label}"))
}

#[tokio::test]
async fn input_stage_done_materializes_first_stage_with_preferred_hosts() {
    let (mut coordinator, mut rx, scheduler) = build(fast_policy());
    let ids = start_first_stage(&mut coordinator, &mut rx).await;
    assert_eq!(ids, vec![TaskId(0), TaskId(1)]);

    let submissions = scheduler.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].spec.stage, "map");
    assert_eq!(submissions[0].run.host.as_deref(), Some("h1"));
    assert_eq!(submissions[1].run.host.as_deref(), Some("h2"));
    assert!(coordinator.state.is_running(TaskId(0)));
    assert!(coordinator.state.is_running(TaskId(1)));
}

#[tokio::test]
async fn redundant_stage_done_does_not_restart_the_stage() {
    let (mut coordinator, mut rx, scheduler) = build(fast_policy());
    start_first_stage(&mut coordinator, &mut rx).await;
    let allocated = coordinator.state.next_task_id();

    step(
        &mut coordinator,
        CoordinatorMessage::StageDone {
            stage: INPUT_STAGE.to_string(),
        },
    )
    .await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(coordinator.state.next_task_id(), allocated);
    assert_eq!(scheduler.submissions().len(), 2);
}

#[tokio::test]
async fn stage_closure_builds_next_stage_from_recorded_outputs() {
    let (mut coordinator, mut rx, scheduler) = build(fast_policy());
    start_first_stage(&mut coordinator, &mut rx).await;

    step(
        &mut coordinator,
        CoordinatorMessage::TaskDone {
            task: TaskId(0),
            host: "h1".to_string(),
            result: TaskResult::Done {
                outputs: vec![output_on(0, "0", "h1")],
            },
        },
    )
    .await;
    assert!(drain(&mut rx).is_empty());
    step(
        &mut coordinator,
        CoordinatorMessage::TaskDone {
            task: TaskId(1),
            host: "h2".to_string(),
            result: TaskResult::Done {
                outputs: vec![output_on(0, "1", "h2")],
            },
        },
    )
    .await;
    let posted = drain(&mut rx);
    assert!(matches!(
        posted.as_slice(),
        [CoordinatorMessage::StageDone { stage }] if stage.as_str() == "map"
    ));
    for message in posted {
        step(&mut coordinator, message).await;
    }
    for message in drain(&mut rx) {
        step(&mut coordinator, message).await;
    }

    let submissions = scheduler.submissions();
    assert_eq!(submissions.len(), 3);
    let reduce = &submissions[2];
    assert_eq!(reduce.spec.stage, "reduce");
    assert_eq!(
        reduce.spec.inputs,
        vec![
            InputId::task_output(TaskId(0), 0),
            InputId::task_output(TaskId(1), 0),
        ]
    );
}

#[tokio::test]
async fn duplicate_task_done_leaves_outputs_untouched() {
    let (mut coordinator, mut rx, _scheduler) = build(fast_policy());
    start_first_stage(&mut coordinator, &mut rx).await;

    step(
        &mut coordinator,
        CoordinatorMessage::TaskDone {
            task: TaskId(0),
            host: "h1".to_string(),
            result: TaskResult::Done {
                outputs: vec![output_on(0, "0", "h1")],
            },
        },
    )
    .await;
    let recorded = coordinator.state.task(TaskId(0)).expect("t0").outputs.clone();

    step(
        &mut coordinator,
        CoordinatorMessage::TaskDone {
            task: TaskId(0),
            host: "h9".to_string(),
            result: TaskResult::Done {
                outputs: vec![output_on(0, "0", "h9")],
            },
        },
    )
    .await;
    assert_eq!(
        coordinator.state.task(TaskId(0)).expect("t0").outputs,
        recorded
    );
}

#[tokio::test]
async fn fatal_result_stops_the_job_with_the_reported_reason() {
    let (mut coordinator, mut rx, _scheduler) = build(fast_policy());
    start_first_stage(&mut coordinator, &mut rx).await;

    let step_result = step(
        &mut coordinator,
        CoordinatorMessage::TaskDone {
            task: TaskId(0),
            host: "h1".to_string(),
            result: TaskResult::Fatal {
                reason: "OOM".to_string(),
            },
        },
    )
    .await;
    match step_result {
        Step::Stop(JobOutcome::Killed { reason }) => assert_eq!(reason, "OOM"),
        _ => panic!("expected job abort"),
    }
}

#[tokio::test]
async fn transient_error_schedules_a_delayed_rerun() {
    let (mut coordinator, mut rx, _scheduler) = build(fast_policy());
    start_first_stage(&mut coordinator, &mut rx).await;

    step(
        &mut coordinator,
        CoordinatorMessage::TaskDone {
            task: TaskId(0),
            host: "h1".to_string(),
            result: TaskResult::Error {
                reason: "disk full".to_string(),
            },
        },
    )
    .await;
    assert!(!coordinator.state.is_running(TaskId(0)));
    assert_eq!(coordinator.state.task(TaskId(0)).expect("t0").failed_count, 1);

    // backoff tops out at max_pause + randomize; wait well past it
    tokio::time::sleep(Duration::from_millis(200)).await;
    let posted = drain(&mut rx);
    assert!(matches!(
        posted.as_slice(),
        [CoordinatorMessage::SubmitTasks {
            mode: SubmitMode::ReRun,
            tasks,
        }] if tasks == &vec![TaskId(0)]
    ));
}

#[tokio::test]
async fn retry_over_budget_aborts_with_formatted_reason() {
    let (mut coordinator, mut rx, _scheduler) = build(FaultPolicy {
        max_failure_rate: 2,
        ..fast_policy()
    });
    start_first_stage(&mut coordinator, &mut rx).await;

    for _ in 0..2 {
        step(
            &mut coordinator,
            CoordinatorMessage::TaskDone {
                task: TaskId(0),
                host: "h1".to_string(),
                result: TaskResult::Error {
                    reason: "E".to_string(),
                },
            },
        )
        .await;
        step(
            &mut coordinator,
            CoordinatorMessage::SubmitTasks {
                mode: SubmitMode::ReRun,
                tasks: vec![TaskId(0)],
            },
        )
        .await;
    }
    let step_result = step(
        &mut coordinator,
        CoordinatorMessage::TaskDone {
            task: TaskId(0),
            host: "h1".to_string(),
            result: TaskResult::Error {
                reason: "E".to_string(),
            },
        },
    )
    .await;
    match step_result {
        Step::Stop(JobOutcome::Killed { reason }) => assert_eq!(
            reason,
            "Task failed 3 times (due to E). At most 2 failures are allowed."
        ),
        _ => panic!("expected job abort"),
    }
}

#[tokio::test]
async fn kill_message_stops_with_requested_reason() {
    let (mut coordinator, _rx, _scheduler) = build(fast_policy());
    let step_result = step(
        &mut coordinator,
        CoordinatorMessage::KillJob {
            reason: "operator request".to_string(),
        },
    )
    .await;
    match step_result {
        Step::Stop(JobOutcome::Killed { reason }) => assert_eq!(reason, "operator request"),
        _ => panic!("expected job abort"),
    }
}
