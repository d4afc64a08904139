//! Stage topology of a job.
//!
//! Contract:
//! - a pipeline is an ordered, immutable sequence of named stages;
//! - the synthetic [`INPUT_STAGE`] precedes the first declared stage and is
//!   never part of the declaration;
//! - stage names are unique within a pipeline.

use gmr_common::{GmrError, Result};
use serde::{Deserialize, Serialize};

use crate::grouping::Grouping;

/// Name of the synthetic stage holding the job's initial inputs.
pub const INPUT_STAGE: &str = "input";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One declared stage: its name and the grouping that shapes its tasks.
pub struct PipelineStage {
    /// Stage name, unique within the pipeline.
    pub name: String,
    /// How the previous stage's outputs fan into this stage's tasks.
    pub grouping: Grouping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Ordered stage sequence compiled from a job-pack declaration.
pub struct Pipeline {
    stages: Vec<PipelineStage>,
}

impl Pipeline {
    /// Compile a stage list, rejecting unsupported shapes.
    pub fn new(stages: Vec<PipelineStage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(GmrError::Unsupported("pipeline has no stages".to_string()));
        }
        for (i, stage) in stages.iter().enumerate() {
            if stage.name.is_empty() {
                return Err(GmrError::Unsupported("stage with empty name".to_string()));
            }
            if stage.name == INPUT_STAGE {
                return Err(GmrError::Unsupported(format!(
                    "stage name '{INPUT_STAGE}' is reserved"
                )));
            }
            if stages[..i].iter().any(|s| s.name == stage.name) {
                return Err(GmrError::Unsupported(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
        }
        Ok(Self { stages })
    }

    /// All declared stages in order.
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Stage following `current`, or `None` when the pipeline is exhausted.
    ///
    /// The synthetic input stage is followed by the first declared stage.
    /// Unknown stage names are a caller contract violation.
    pub fn next_stage(&self, current: &str) -> Result<Option<&PipelineStage>> {
        if current == INPUT_STAGE {
            return Ok(self.stages.first());
        }
        let idx = self.stage_index(current).ok_or_else(|| {
            GmrError::Coordinator(format!("unknown stage '{current}' in pipeline"))
        })?;
        Ok(self.stages.get(idx + 1))
    }

    /// Position of `name` in the declared order, if present.
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Name of the final stage.
    pub fn last_stage(&self) -> &str {
        &self.stages[self.stages.len() - 1].name
    }
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, PipelineStage, INPUT_STAGE};
    use crate::grouping::Grouping;

    fn two_stage() -> Pipeline {
        Pipeline::new(vec![
            PipelineStage {
                name: "map".to_string(),
                grouping: Grouping::Split,
            },
            PipelineStage {
                name: "reduce".to_string(),
                grouping: Grouping::GroupAll,
            },
        ])
        .expect("pipeline")
    }

    #[test]
    fn walks_from_input_to_done() {
        let p = two_stage();
        let first = p.next_stage(INPUT_STAGE).expect("lookup").expect("first");
        assert_eq!(first.name, "map");
        let second = p.next_stage("map").expect("lookup").expect("second");
        assert_eq!(second.name, "reduce");
        assert!(p.next_stage("reduce").expect("lookup").is_none());
        assert_eq!(p.last_stage(), "reduce");
    }

    #[test]
    fn unknown_stage_is_a_contract_violation() {
        assert!(two_stage().next_stage("shuffle").is_err());
    }

    #[test]
    fn rejects_empty_duplicate_and_reserved_names() {
        assert!(Pipeline::new(vec![]).is_err());
        assert!(Pipeline::new(vec![
            PipelineStage {
                name: "map".to_string(),
                grouping: Grouping::Split,
            },
            PipelineStage {
                name: "map".to_string(),
                grouping: Grouping::GroupAll,
            },
        ])
        .is_err());
        assert!(Pipeline::new(vec![PipelineStage {
            name: INPUT_STAGE.to_string(),
            grouping: Grouping::Split,
        }])
        .is_err());
    }
}
