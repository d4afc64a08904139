use serde::{Deserialize, Serialize};
use std::env;

/// Per-job fault-handling policy shared by every coordinator component.
///
/// Every knob is environment-overridable (`GMR_*` names listed per field);
/// [`FaultPolicy::from_env`] reads the process environment once at job start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultPolicy {
    /// Maximum per-task retry count before the job is aborted
    /// (`GMR_MAX_FAILURE_RATE`).
    pub max_failure_rate: u32,
    /// Minimum retry backoff unit in milliseconds (`GMR_FAILED_MIN_PAUSE_MS`).
    ///
    /// Actual backoff for the `k`th failure is
    /// `min(k * failed_min_pause_ms, failed_max_pause_ms)` plus a uniform
    /// jitter in `[0, failed_pause_randomize_ms]`.
    pub failed_min_pause_ms: u64,
    /// Upper cap for retry backoff in milliseconds (`GMR_FAILED_MAX_PAUSE_MS`).
    pub failed_max_pause_ms: u64,
    /// Uniform jitter bound in milliseconds (`GMR_FAILED_PAUSE_RANDOMIZE_MS`).
    pub failed_pause_randomize_ms: u64,
    /// Failures per host per input before the host is treated as unusable for
    /// that input (`GMR_INPUT_FAILURE_CAP`).
    pub input_failure_cap: u32,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            max_failure_rate: 3,
            failed_min_pause_ms: 1_000,
            failed_max_pause_ms: 60_000,
            failed_pause_randomize_ms: 500,
            input_failure_cap: 3,
        }
    }
}

impl FaultPolicy {
    /// Build a policy from `GMR_*` environment variables, falling back to
    /// defaults for unset or unparseable values.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_failure_rate: env_u32_or_default("GMR_MAX_FAILURE_RATE", d.max_failure_rate),
            failed_min_pause_ms: env_u64_or_default("GMR_FAILED_MIN_PAUSE_MS", d.failed_min_pause_ms),
            failed_max_pause_ms: env_u64_or_default("GMR_FAILED_MAX_PAUSE_MS", d.failed_max_pause_ms),
            failed_pause_randomize_ms: env_u64_or_default(
                "GMR_FAILED_PAUSE_RANDOMIZE_MS",
                d.failed_pause_randomize_ms,
            ),
            input_failure_cap: env_u32_or_default("GMR_INPUT_FAILURE_CAP", d.input_failure_cap),
        }
    }

    /// Backoff base for the `fail_count`th failure, before jitter, in
    /// milliseconds.
    pub fn backoff_base_ms(&self, fail_count: u32) -> u64 {
        (u64::from(fail_count))
            .saturating_mul(self.failed_min_pause_ms)
            .min(self.failed_max_pause_ms)
    }
}

/// Read a string environment variable or fall back to `default`.
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a `u32` environment variable or fall back to `default`.
pub fn env_u32_or_default(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

/// Read a `u64` environment variable or fall back to `default`.
pub fn env_u64_or_default(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
