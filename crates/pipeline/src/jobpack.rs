//! Job pack envelope: the validated submission a coordinator is born with.
//!
//! Contract:
//! - the pack is a JSON document; [`JobPack::from_bytes`] decodes and
//!   validates it in one step;
//! - decoding/validation failures are [`GmrError::JobPack`], unsupported
//!   pipeline shapes surface later from [`JobPack::pipeline`];
//! - the raw bytes are persisted by the coordinator under
//!   `<job_home>/<job_name>`, so the pack itself stays immutable.

use std::collections::BTreeMap;

use gmr_common::{GmrError, Result};
use serde::{Deserialize, Serialize};

use crate::data::{DataInput, Replica};
use crate::pipeline::{Pipeline, PipelineStage};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Scheduling preferences attached to a job.
pub struct ScheduleOptions {
    /// Upper bound on concurrently running tasks, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cores: Option<u32>,
    /// Restrict task placement to hosts already holding the task's inputs.
    #[serde(default)]
    pub force_local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A validated job submission.
pub struct JobPack {
    /// Job name prefix; the event sink appends a unique suffix.
    pub prefix: String,
    /// Submitting user, carried through events.
    #[serde(default)]
    pub owner: String,
    /// Worker binary handle passed to every task.
    pub worker: String,
    /// Declared pipeline stages in order.
    pub stages: Vec<PipelineStage>,
    /// Initial inputs: one replica URL list per input.
    pub inputs: Vec<Vec<String>>,
    /// Job environment forwarded to workers.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Scheduling preferences.
    #[serde(default)]
    pub schedule: ScheduleOptions,
}

impl JobPack {
    /// Decode and validate a pack from its submitted bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let pack: JobPack = serde_json::from_slice(bytes)
            .map_err(|e| GmrError::JobPack(format!("invalid job pack json: {e}")))?;
        pack.validate()?;
        Ok(pack)
    }

    /// Compile the declared stages into a pipeline.
    pub fn pipeline(&self) -> Result<Pipeline> {
        Pipeline::new(self.stages.clone())
    }

    /// Parse the initial inputs into data-input records.
    ///
    /// Each initial input carries the label of its position so `split`
    /// groupings keep one task per input.
    pub fn initial_inputs(&self) -> Result<Vec<DataInput>> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, urls)| {
                let replicas = urls
                    .iter()
                    .map(|u| Replica::parse(u))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DataInput {
                    label: i.to_string(),
                    replicas,
                })
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(GmrError::JobPack("empty job name prefix".to_string()));
        }
        if !self
            .prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(GmrError::JobPack(format!(
                "job name prefix '{}' contains invalid characters",
                self.prefix
            )));
        }
        if self.worker.is_empty() {
            return Err(GmrError::JobPack("empty worker handle".to_string()));
        }
        for urls in &self.inputs {
            if urls.is_empty() {
                return Err(GmrError::JobPack("input with no replicas".to_string()));
            }
            for url in urls {
                Replica::parse(url)?;
            }
        }
        Ok(())
    }
}
