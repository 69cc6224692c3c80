use serde::{Deserialize, Serialize};

use super::{ServerSpec, WorkerSpec};
use crate::cluster::ClusterSpec;

/// Identifies which task of the cluster this process runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub role: String,
    pub index: usize,
}

/// The whole configuration of one process.
///
/// Every process of the cluster can share the same file apart from `task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub cluster: ClusterSpec,
    pub task: TaskSpec,
    pub server: Option<ServerSpec>,
    pub worker: Option<WorkerSpec>,
}
