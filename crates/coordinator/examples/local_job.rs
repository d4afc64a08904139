//! Drive a two-stage job against an in-process scheduler whose "workers"
//! immediately succeed.
//!
//! Run with `RUST_LOG=debug cargo run --example local_job` to watch the
//! coordinator's decisions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gmr_common::metrics::global_metrics;
use gmr_common::Result;
use gmr_coordinator::{
    submit_job, ClusterScheduler, CoordinatorHandle, CoordinatorOptions, JobOutcome,
    MemoryEventSink, TaskResult, TaskSubmission,
};
use gmr_pipeline::TaskOutput;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct LocalScheduler {
    coordinator: Mutex<Option<CoordinatorHandle>>,
}

#[async_trait]
impl ClusterScheduler for LocalScheduler {
    async fn new_job(&self, _job_name: &str, coordinator: CoordinatorHandle) -> Result<()> {
        *self.coordinator.lock().expect("lock") = Some(coordinator);
        Ok(())
    }

    async fn new_task(&self, submission: TaskSubmission) -> Result<()> {
        let handle = self
            .coordinator
            .lock()
            .expect("lock")
            .clone()
            .expect("job registered");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let host = submission
                .run
                .host
                .clone()
                .unwrap_or_else(|| "node1".to_string());
            let task = submission.spec.task_id;
            let output = TaskOutput::on_host(
                0,
                &submission.spec.group.label,
                &host,
                &format!("gmr://{host}/{}/t{task}", submission.spec.job_name),
            );
            let _ = handle
                .task_done(
                    task,
                    &host,
                    TaskResult::Done {
                        outputs: vec![output],
                    },
                )
                .await;
        });
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let pack = serde_json::to_vec(&serde_json::json!({
        "prefix": "wordflow",
        "owner": "demo",
        "worker": "gmr-worker-1.0",
        "stages": [
            {"name": "map", "grouping": "split"},
            {"name": "reduce", "grouping": "group_all"},
        ],
        "inputs": [
            ["gmr://node1/data/part-0"],
            ["gmr://node2/data/part-1"],
            ["gmr://node3/data/part-2"],
        ],
    }))?;

    let events = Arc::new(MemoryEventSink::new());
    let job = submit_job(
        &pack,
        Arc::new(LocalScheduler::default()),
        Arc::clone(&events) as Arc<dyn gmr_coordinator::EventSink>,
        CoordinatorOptions {
            job_home: std::env::temp_dir().join("gmr_demo_jobs"),
            ..CoordinatorOptions::from_env()
        },
    )
    .await?;
    println!("job {} started", job.name());

    match job.wait().await? {
        JobOutcome::Completed { results } => {
            println!("job completed with {} result(s):", results.len());
            for output in results {
                for replica in &output.replicas {
                    println!("  {}", replica.url);
                }
            }
        }
        JobOutcome::Killed { reason } => println!("job killed: {reason}"),
    }

    println!("\nevent log:");
    for line in events.lines() {
        println!("  {line}");
    }
    println!("\nmetrics:\n{}", global_metrics().render_prometheus());
    Ok(())
}
