use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// How the initial values of a block are generated on a fresh start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSpec {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
}

/// A single named parameter block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSpec {
    pub id: String,
    pub len: NonZeroUsize,
    pub init: InitSpec,
}

/// When and where checkpoints are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSpec {
    pub dir: PathBuf,
    pub every_secs: Option<u64>,
    pub every_steps: Option<u64>,
    pub keep_last: Option<NonZeroUsize>,
}

impl CheckpointSpec {
    /// The time trigger interval, if any.
    pub fn every(&self) -> Option<Duration> {
        self.every_secs.map(Duration::from_secs)
    }
}

/// The specification for the parameter server role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    pub blocks: Vec<BlockSpec>,
    pub target_step: u64,
    pub checkpoint: Option<CheckpointSpec>,
    #[serde(default = "ServerSpec::default_grace_period_ms")]
    pub grace_period_ms: u64,
    pub seed: Option<u64>,
}

impl ServerSpec {
    fn default_grace_period_ms() -> u64 {
        10_000
    }

    /// How long agents are waited for once stopping.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
