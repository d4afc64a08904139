//! Deterministic bucketing of stage outputs into next-stage task inputs.
//!
//! Contract:
//! - a grouping is a pure function from `(input id, data input)` pairs to
//!   labelled buckets; each bucket becomes exactly one task;
//! - bucket order (and therefore task-id allocation) is deterministic for a
//!   given input set: buckets sort by group key, members sort by input id.

use std::collections::BTreeMap;

use gmr_common::InputId;
use serde::{Deserialize, Serialize};

use crate::data::DataInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// How the previous stage's outputs fan into this stage's tasks.
pub enum Grouping {
    /// One task per input.
    Split,
    /// One task per distinct label, across hosts.
    GroupLabel,
    /// One task per host, across labels.
    GroupNode,
    /// One task per distinct (host, label) pair.
    GroupNodeLabel,
    /// A single task consuming every input.
    GroupAll,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
/// Identity of one bucket: its label and the preferred host implied by it.
pub struct GroupKey {
    /// Bucket label.
    pub label: String,
    /// Preferred host for the bucket's task, used on first-run scheduling.
    pub host: Option<String>,
}

/// Bucket `pairs` according to `grouping`.
///
/// Returns buckets sorted by group key with members sorted by input id.
pub fn group_outputs(
    grouping: Grouping,
    pairs: Vec<(InputId, DataInput)>,
) -> Vec<(GroupKey, Vec<(InputId, DataInput)>)> {
    let mut buckets: BTreeMap<GroupKey, Vec<(InputId, DataInput)>> = BTreeMap::new();
    for (id, input) in pairs {
        let key = match grouping {
            Grouping::Split => GroupKey {
                label: input.label.clone(),
                host: input.primary_host(),
            },
            Grouping::GroupLabel => GroupKey {
                label: input.label.clone(),
                host: None,
            },
            Grouping::GroupNode => GroupKey {
                label: String::new(),
                host: input.primary_host(),
            },
            Grouping::GroupNodeLabel => GroupKey {
                label: input.label.clone(),
                host: input.primary_host(),
            },
            Grouping::GroupAll => GroupKey {
                label: String::new(),
                host: None,
            },
        };
        buckets.entry(key).or_default().push((id, input));
    }
    // Split must not merge same-key inputs into one task.
    if matches!(grouping, Grouping::Split) {
        let mut out = Vec::new();
        for (key, mut members) in buckets {
            members.sort_by_key(|(id, _)| *id);
            for member in members {
                out.push((key.clone(), vec![member]));
            }
        }
        return out;
    }
    buckets
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by_key(|(id, _)| *id);
            (key, members)
        })
        .collect()
}
