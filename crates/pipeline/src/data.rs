//! Data inputs, replica locations, and task outputs.
//!
//! Contract:
//! - a [`DataInput`] names one piece of data together with every replica
//!   known to hold it;
//! - replicas on a cluster host use the `gmr://<host>/<path>` scheme and are
//!   subject to per-host failure accounting;
//! - replicas behind any other scheme are remote-only and carry no host.

use gmr_common::{GmrError, Result};
use serde::{Deserialize, Serialize};

/// Scheme marking cluster-local data addressed by host.
const LOCAL_SCHEME: &str = "gmr://";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One copy of a piece of data.
pub struct Replica {
    /// Cluster host holding the copy, or `None` for remote-only data.
    pub host: Option<String>,
    /// Address of the copy.
    pub url: String,
}

impl Replica {
    /// Parse a replica URL, extracting the host for `gmr://` addresses.
    pub fn parse(url: &str) -> Result<Self> {
        let Some((_, rest)) = url.split_once("://") else {
            return Err(GmrError::JobPack(format!(
                "replica url '{url}' has no scheme"
            )));
        };
        if !url.starts_with(LOCAL_SCHEME) {
            return Ok(Self {
                host: None,
                url: url.to_string(),
            });
        }
        let host = rest.split('/').next().unwrap_or_default();
        if host.is_empty() {
            return Err(GmrError::JobPack(format!(
                "replica url '{url}' has an empty host"
            )));
        }
        Ok(Self {
            host: Some(host.to_string()),
            url: url.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One piece of data consumed by a task, with every known replica.
pub struct DataInput {
    /// Grouping label attached to the data.
    pub label: String,
    /// Known copies, local and remote.
    pub replicas: Vec<Replica>,
}

impl DataInput {
    /// Hosts holding a local replica, sorted and deduplicated.
    pub fn locations(&self) -> Vec<String> {
        let mut hosts = self
            .replicas
            .iter()
            .filter_map(|r| r.host.clone())
            .collect::<Vec<_>>();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// First local host in sorted order, used as the locality hint.
    pub fn primary_host(&self) -> Option<String> {
        self.locations().into_iter().next()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One artifact produced by a task, identified by position within the task.
pub struct TaskOutput {
    /// Position within the producing task's output list.
    pub position: u32,
    /// Grouping label attached to the artifact.
    pub label: String,
    /// Copies written by the task; usually one, more when the worker
    /// replicated the artifact.
    pub replicas: Vec<Replica>,
    /// Small results delivered inline instead of via a replica address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<Vec<u8>>,
}

impl TaskOutput {
    /// Single-replica output written on `host`.
    pub fn on_host(position: u32, label: &str, host: &str, url: &str) -> Self {
        Self {
            position,
            label: label.to_string(),
            replicas: vec![Replica {
                host: Some(host.to_string()),
                url: url.to_string(),
            }],
            inline: None,
        }
    }

    /// View this output as a data input for the next stage.
    pub fn as_data_input(&self) -> DataInput {
        DataInput {
            label: self.label.clone(),
            replicas: self.replicas.clone(),
        }
    }
}
