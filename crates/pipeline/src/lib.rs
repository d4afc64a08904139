//! Pipeline shapes, groupings, job packs, and data locations.
//!
//! Architecture role:
//! - compiles job-pack pipeline declarations into stage sequences
//! - buckets stage outputs into the next stage's task inputs (groupings)
//! - models data inputs, replicas, and task outputs shared with the
//!   coordinator
//!
//! Key modules:
//! - [`pipeline`]
//! - [`grouping`]
//! - [`data`]
//! - [`jobpack`]

pub mod data;
pub mod grouping;
pub mod jobpack;
pub mod pipeline;

pub use data::{DataInput, Replica, TaskOutput};
pub use grouping::{group_outputs, GroupKey, Grouping};
pub use jobpack::{JobPack, ScheduleOptions};
pub use pipeline::{Pipeline, PipelineStage, INPUT_STAGE};
