//! Per-node and per-run reports.
//!
//! A `RunReport` is produced for every run, successful or not. The config
//! hash fingerprints the engine settings and every node's attributes so two
//! reports can be compared for "same graph, same settings".

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use rivulet_core::hash::Hash256;
use rivulet_core::id::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Finished,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub name: String,
    pub component_type: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Records read per input port.
    pub records_in: Vec<u64>,
    /// Records written per output port.
    pub records_out: Vec<u64>,
    pub spilled_bytes: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub config_hash: Hash256,
    pub engine_version: String,
    pub started_ms: u64,
    pub finished_ms: u64,
    pub peak_mem_bytes: usize,
    pub nodes: Vec<NodeReport>,
}

impl RunReport {
    pub fn new(run_id: RunId, config_hash: Hash256) -> Self {
        let now = now_millis();
        Self {
            run_id,
            config_hash,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            started_ms: now,
            finished_ms: now,
            peak_mem_bytes: 0,
            nodes: Vec::new(),
        }
    }

    pub fn finish(mut self, peak_mem_bytes: usize, nodes: Vec<NodeReport>) -> Self {
        self.finished_ms = now_millis();
        self.peak_mem_bytes = peak_mem_bytes;
        self.nodes = nodes;
        self
    }

    /// Overall status: failed if any node failed, else aborted if any node
    /// was aborted.
    pub fn status(&self) -> NodeStatus {
        let any = |s| self.nodes.iter().any(|n| n.status == s);
        if any(NodeStatus::Failed) {
            NodeStatus::Failed
        } else if any(NodeStatus::Aborted) {
            NodeStatus::Aborted
        } else {
            NodeStatus::Finished
        }
    }

    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn total_spilled_bytes(&self) -> u64 {
        self.nodes.iter().map(|n| n.spilled_bytes).sum()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
