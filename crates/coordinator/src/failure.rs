//! Failure handler: retry decisions, per-input host failure accounting, and
//! the backward dependency walk that schedules input regeneration.
//!
//! Contract:
//! - transient failures are charged to the task (`failed_count`) and capped
//!   by the policy's `max_failure_rate`;
//! - input fetch failures are charged to the `(input, host)` pair, never to
//!   the consuming task;
//! - regeneration re-runs the minimal runnable ancestor set: the walk stops
//!   descending at tasks whose own inputs still have a usable host.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use gmr_common::{FaultPolicy, InputId, InputProducer, Result, TaskId};
use gmr_pipeline::Pipeline;
use rand::rngs::StdRng;
use rand::Rng;

use crate::state::JobState;

#[derive(Debug)]
/// What to do with a task after a transient failure.
pub enum RetryDecision {
    /// Re-submit after the given delay.
    Backoff {
        /// Failure count including the one just charged.
        fail_count: u32,
        /// Capped, jittered pause before re-submission.
        delay: Duration,
    },
    /// The failure budget is exhausted; abort the job.
    Abort {
        /// Terminal reason, formatted for the job's event stream.
        reason: String,
    },
}

#[derive(Debug)]
/// What to do with a task after an input fetch failure.
pub enum InputErrorOutcome {
    /// Usable replicas remain; re-submit and let the scheduler pick another.
    Retry,
    /// Every replica host is exhausted; re-run the listed ancestor tasks and
    /// park the consumer until the input's producer completes.
    Regenerate {
        /// Runnable ancestor frontier, earlier stages first.
        frontier: Vec<TaskId>,
    },
}

/// Charge one transient failure to `task` and decide between backoff and
/// abort.
pub fn retry_task(
    state: &mut JobState,
    policy: &FaultPolicy,
    rng: &mut StdRng,
    task: TaskId,
    host: &str,
    reason: &str,
) -> Result<RetryDecision> {
    let info = state.task_mut(task)?;
    let fail_count = info.failed_count + 1;
    if fail_count > policy.max_failure_rate {
        return Ok(RetryDecision::Abort {
            reason: format!(
                "Task failed {fail_count} times (due to {reason}). At most {} failures are allowed.",
                policy.max_failure_rate
            ),
        });
    }
    info.failed_count = fail_count;
    info.failed_hosts.insert(host.to_string());
    let base = policy.backoff_base_ms(fail_count);
    let jitter = rng.gen_range(0..=policy.failed_pause_randomize_ms);
    Ok(RetryDecision::Backoff {
        fail_count,
        delay: Duration::from_millis(base + jitter),
    })
}

/// Charge the reported hosts against `input` and decide between replica
/// failover and regeneration.
pub fn on_input_error(
    state: &mut JobState,
    pipeline: &Pipeline,
    policy: &FaultPolicy,
    consumer: TaskId,
    input: InputId,
    hosts: &[String],
) -> Result<InputErrorOutcome> {
    let data = state.data_mut(input)?;
    for host in hosts {
        data.record_failure(host);
    }
    // Remote-only inputs have no host-tracked replicas; the scheduler can
    // always try the remote address again.
    if data.locations.is_empty() || !data.usable_locations(policy.input_failure_cap).is_empty() {
        return Ok(InputErrorOutcome::Retry);
    }
    let failing_hosts = data
        .locations
        .keys()
        .cloned()
        .chain(hosts.iter().cloned())
        .collect::<BTreeSet<_>>();
    let InputProducer::Task(gen_task) = input.producer else {
        // Job-initial inputs are handled by the caller before reaching here.
        return Ok(InputErrorOutcome::Retry);
    };
    let frontier = collect_runnable_deps(state, pipeline, gen_task, consumer, &failing_hosts)?;
    Ok(InputErrorOutcome::Regenerate { frontier })
}

/// Walk the task dependency DAG backward from `gen_task` and collect the
/// runnable regeneration frontier.
///
/// Every visited task records the dependent that led to it in its `waiters`
/// set, so completion of a regenerated ancestor wakes exactly the tasks
/// parked on it. The walk is iterative with a visited set: pipelines may be
/// long and the same producer can feed many inputs.
pub fn collect_runnable_deps(
    state: &mut JobState,
    pipeline: &Pipeline,
    gen_task: TaskId,
    consumer: TaskId,
    failing_hosts: &BTreeSet<String>,
) -> Result<Vec<TaskId>> {
    let mut frontier = Vec::new();
    let mut visited = BTreeSet::from([gen_task]);
    let mut queue = VecDeque::from([(gen_task, consumer)]);
    while let Some((task, waiter)) = queue.pop_front() {
        state.task_mut(task)?.waiters.insert(waiter);
        if state.is_running(task) {
            // Already re-running (a concurrent regeneration reached it
            // first); its completion will wake the recorded waiter.
            continue;
        }
        let inputs = state.task(task)?.spec.inputs.clone();
        let mut unreachable_producers = Vec::new();
        for input in inputs {
            let data = state.data(input)?;
            if data.locations.is_empty() {
                continue;
            }
            if data.locations.keys().all(|h| failing_hosts.contains(h)) {
                if let InputProducer::Task(producer) = input.producer {
                    unreachable_producers.push(producer);
                }
                // Job-initial inputs have no generating task: nothing to
                // descend into, the retry machinery owns that case.
            }
        }
        if unreachable_producers.is_empty() {
            frontier.push(task);
        } else {
            for producer in unreachable_producers {
                if visited.insert(producer) {
                    queue.push_back((producer, task));
                }
            }
        }
    }
    // Earlier stages first so regenerated data exists before its consumers
    // are handed to the scheduler.
    let mut keyed = frontier
        .into_iter()
        .map(|task| {
            let stage = &state.task(task)?.spec.stage;
            let index = pipeline.stage_index(stage).unwrap_or(usize::MAX);
            Ok((index, task))
        })
        .collect::<Result<Vec<_>>>()?;
    keyed.sort();
    Ok(keyed.into_iter().map(|(_, task)| task).collect())
}

#[cfg(test)]
mod tests {
    use super::{collect_runnable_deps, on_input_error, retry_task, InputErrorOutcome, RetryDecision};
    use crate::state::{DataInfo, JobState, TaskSpec};
    use gmr_common::{FaultPolicy, InputId, TaskId};
    use gmr_pipeline::{DataInput, GroupKey, Grouping, Pipeline, PipelineStage, Replica, ScheduleOptions};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{BTreeMap, BTreeSet};

    fn pipeline() -> Pipeline {
        Pipeline::new(vec![
            PipelineStage {
                name: "map".to_string(),
                grouping: Grouping::Split,
            },
            PipelineStage {
                name: "shuffle".to_string(),
                grouping: Grouping::GroupNode,
            },
            PipelineStage {
                name: "reduce".to_string(),
                grouping: Grouping::GroupAll,
            },
        ])
        .expect("pipeline")
    }

    fn add_task(state: &mut JobState, stage: &str, inputs: Vec<InputId>) -> TaskId {
        let task_id = state.allocate_task_id();
        state.insert_task(TaskSpec {
            task_id,
            stage: stage.to_string(),
            group: GroupKey {
                label: "0".to_string(),
                host: None,
            },
            grouping: Grouping::Split,
            inputs,
            job_name: "j@1".to_string(),
            job_env: BTreeMap::new(),
            worker: "w".to_string(),
            schedule: ScheduleOptions::default(),
        });
        task_id
    }

    fn add_data(state: &mut JobState, id: InputId, hosts: &[&str]) {
        state.insert_data(
            id,
            DataInfo::new(DataInput {
                label: "0".to_string(),
                replicas: hosts
                    .iter()
                    .map(|h| Replica {
                        host: Some(h.to_string()),
                        url: format!("gmr://{h}/d"),
                    })
                    .collect(),
            }),
        );
    }

    fn policy() -> FaultPolicy {
        FaultPolicy {
            max_failure_rate: 2,
            failed_min_pause_ms: 100,
            failed_max_pause_ms: 250,
            failed_pause_randomize_ms: 50,
            input_failure_cap: 1,
        }
    }

    #[test]
    fn retry_charges_task_and_bounds_backoff() {
        let mut state = JobState::new("j@1".to_string());
        let t0 = add_task(&mut state, "map", vec![]);
        state.start_stage("map", &[t0]);
        let mut rng = StdRng::seed_from_u64(7);
        let policy = policy();

        for expected in 1..=2u32 {
            match retry_task(&mut state, &policy, &mut rng, t0, "h1", "boom").expect("retry") {
                RetryDecision::Backoff { fail_count, delay } => {
                    assert_eq!(fail_count, expected);
                    let base = policy.backoff_base_ms(expected);
                    let ms = delay.as_millis() as u64;
                    assert!(ms >= base && ms <= base + policy.failed_pause_randomize_ms);
                }
                other => panic!("unexpected decision: {other:?}"),
            }
        }
        assert_eq!(state.task(t0).expect("t0").failed_count, 2);
        assert!(state.task(t0).expect("t0").failed_hosts.contains("h1"));

        match retry_task(&mut state, &policy, &mut rng, t0, "h1", "boom").expect("retry") {
            RetryDecision::Abort { reason } => {
                assert_eq!(
                    reason,
                    "Task failed 3 times (due to boom). At most 2 failures are allowed."
                );
            }
            other => panic!("unexpected decision: {other:?}"),
        }
        // the aborting failure is not charged
        assert_eq!(state.task(t0).expect("t0").failed_count, 2);
    }

    #[test]
    fn input_error_fails_over_while_replicas_remain() {
        let mut state = JobState::new("j@1".to_string());
        let t0 = add_task(&mut state, "map", vec![]);
        let input = InputId::task_output(t0, 0);
        add_data(&mut state, input, &["h1", "h2"]);
        let t1 = add_task(&mut state, "reduce", vec![input]);
        state.start_stage("map", &[t0]);
        state.start_stage("reduce", &[t1]);

        let outcome = on_input_error(
            &mut state,
            &pipeline(),
            &policy(),
            t1,
            input,
            &["h1".to_string()],
        )
        .expect("outcome");
        assert!(matches!(outcome, InputErrorOutcome::Retry));
        assert_eq!(state.data(input).expect("data").failures.get("h1"), Some(&1));
    }

    #[test]
    fn input_error_regenerates_once_every_host_is_exhausted() {
        let mut state = JobState::new("j@1".to_string());
        let t0 = add_task(&mut state, "map", vec![InputId::job_input(0)]);
        add_data(&mut state, InputId::job_input(0), &["h9"]);
        let input = InputId::task_output(t0, 0);
        add_data(&mut state, input, &["h1", "h2"]);
        let t1 = add_task(&mut state, "reduce", vec![input]);
        state.start_stage("map", &[t0]);
        state.start_stage("reduce", &[t1]);

        let outcome = on_input_error(
            &mut state,
            &pipeline(),
            &policy(),
            t1,
            input,
            &["h1".to_string(), "h2".to_string()],
        )
        .expect("outcome");
        match outcome {
            InputErrorOutcome::Regenerate { frontier } => assert_eq!(frontier, vec![t0]),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(state.task(t0).expect("t0").waiters.contains(&t1));
    }

    #[test]
    fn walk_descends_to_runnable_ancestors_and_records_waiters() {
        let mut state = JobState::new("j@1".to_string());
        // map t0 (inputs on h9, fine) -> shuffle t1 (input from t0 on dead
        // hosts) -> reduce t2 (input from t1 on dead hosts)
        let t0 = add_task(&mut state, "map", vec![InputId::job_input(0)]);
        add_data(&mut state, InputId::job_input(0), &["h9"]);
        let mid = InputId::task_output(t0, 0);
        add_data(&mut state, mid, &["h1"]);
        let t1 = add_task(&mut state, "shuffle", vec![mid]);
        let last = InputId::task_output(t1, 0);
        add_data(&mut state, last, &["h2"]);
        let t2 = add_task(&mut state, "reduce", vec![last]);
        state.start_stage("map", &[t0]);
        state.start_stage("shuffle", &[t1]);
        state.start_stage("reduce", &[t2]);

        let failing = BTreeSet::from(["h1".to_string(), "h2".to_string()]);
        let frontier =
            collect_runnable_deps(&mut state, &pipeline(), t1, t2, &failing).expect("walk");
        assert_eq!(frontier, vec![t0]);
        assert!(state.task(t1).expect("t1").waiters.contains(&t2));
        assert!(state.task(t0).expect("t0").waiters.contains(&t1));
    }

    #[test]
    fn walk_stops_at_job_inputs_and_keeps_task_runnable() {
        let mut state = JobState::new("j@1".to_string());
        let t0 = add_task(&mut state, "map", vec![InputId::job_input(0)]);
        add_data(&mut state, InputId::job_input(0), &["h1"]);
        let out = InputId::task_output(t0, 0);
        add_data(&mut state, out, &["h1"]);
        let t1 = add_task(&mut state, "reduce", vec![out]);
        state.start_stage("map", &[t0]);
        state.start_stage("reduce", &[t1]);

        // h1 holds both the job input and t0's output; even so, t0 stays on
        // the frontier because nothing can regenerate a job input.
        let failing = BTreeSet::from(["h1".to_string()]);
        let frontier =
            collect_runnable_deps(&mut state, &pipeline(), t0, t1, &failing).expect("walk");
        assert_eq!(frontier, vec![t0]);
    }

    #[test]
    fn walk_skips_tasks_already_running() {
        let mut state = JobState::new("j@1".to_string());
        let t0 = add_task(&mut state, "map", vec![]);
        let out = InputId::task_output(t0, 0);
        add_data(&mut state, out, &["h1"]);
        let t1 = add_task(&mut state, "reduce", vec![out]);
        state.start_stage("map", &[t0]);
        state.start_stage("reduce", &[t1]);
        state.mark_running(t0).expect("running");

        let failing = BTreeSet::from(["h1".to_string()]);
        let frontier =
            collect_runnable_deps(&mut state, &pipeline(), t0, t1, &failing).expect("walk");
        assert!(frontier.is_empty());
        assert!(state.task(t0).expect("t0").waiters.contains(&t1));
    }
}
