use std::sync::{Arc, OnceLock};

use prometheus::{Counter, CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

/// Shared coordinator metrics registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    stage_running_tasks: GaugeVec,
    stage_done_tasks: GaugeVec,
    stage_stopped_tasks: GaugeVec,
    task_retries: CounterVec,
    input_regenerations: CounterVec,
    jobs_started: Counter,
    jobs_finished: CounterVec,
}

impl MetricsRegistry {
    /// Construct a registry with all coordinator metric families registered.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Set per-stage task counts after a stage accounting change.
    pub fn set_stage_tasks(&self, job: &str, stage: &str, running: u64, done: u64, stopped: u64) {
        let labels = [job, stage];
        self.inner
            .stage_running_tasks
            .with_label_values(&labels)
            .set(running as f64);
        self.inner
            .stage_done_tasks
            .with_label_values(&labels)
            .set(done as f64);
        self.inner
            .stage_stopped_tasks
            .with_label_values(&labels)
            .set(stopped as f64);
    }

    /// Count one backoff-delayed task retry.
    pub fn inc_task_retries(&self, job: &str, stage: &str) {
        self.inner
            .task_retries
            .with_label_values(&[job, stage])
            .inc();
    }

    /// Count one input regeneration (backward DAG walk triggered).
    pub fn inc_input_regenerations(&self, job: &str) {
        self.inner
            .input_regenerations
            .with_label_values(&[job])
            .inc();
    }

    /// Count one coordinator start.
    pub fn inc_jobs_started(&self) {
        self.inner.jobs_started.inc();
    }

    /// Count one job reaching a terminal state.
    pub fn inc_jobs_finished(&self, outcome: &str) {
        self.inner
            .jobs_finished
            .with_label_values(&[outcome])
            .inc();
    }

    /// Render all families in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let stage_running_tasks = gauge_vec(
            &registry,
            "gmr_stage_running_tasks",
            "Currently running tasks per stage",
            &["job", "stage"],
        );
        let stage_done_tasks = gauge_vec(
            &registry,
            "gmr_stage_done_tasks",
            "Completed tasks per stage",
            &["job", "stage"],
        );
        let stage_stopped_tasks = gauge_vec(
            &registry,
            "gmr_stage_stopped_tasks",
            "Stopped (between-submission) tasks per stage",
            &["job", "stage"],
        );
        let task_retries = counter_vec(
            &registry,
            "gmr_task_retries_total",
            "Backoff-delayed task retries",
            &["job", "stage"],
        );
        let input_regenerations = counter_vec(
            &registry,
            "gmr_input_regenerations_total",
            "Input regenerations scheduled after replica exhaustion",
            &["job"],
        );
        let jobs_started = counter(
            &registry,
            "gmr_jobs_started_total",
            "Job coordinators started",
        );
        let jobs_finished = counter_vec(
            &registry,
            "gmr_jobs_finished_total",
            "Jobs reaching a terminal state",
            &["outcome"],
        );

        Self {
            registry,
            stage_running_tasks,
            stage_done_tasks,
            stage_stopped_tasks,
            task_retries,
            input_regenerations,
            jobs_started,
            jobs_finished,
        }
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Counter {
    let c = Counter::with_opts(Opts::new(name, help)).expect("counter");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Process-wide metrics registry shared by all job coordinators.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
