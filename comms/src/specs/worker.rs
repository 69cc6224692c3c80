use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff for transient communication failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrySpec {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl RetrySpec {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

/// The bundled stand-in objective used by the worker binary.
///
/// Every block is pulled towards `target` by `rate` per step, which produces deltas
/// with the same shape a gradient step would.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComputeSpec {
    pub target: f32,
    pub rate: f32,
    #[serde(default)]
    pub delay_ms: u64,
}

/// The specification for the worker role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub blocks: Vec<String>,
    #[serde(default)]
    pub retry: RetrySpec,
    pub compute: ComputeSpec,
    /// Stops the worker on its own after this many local steps.
    pub max_steps: Option<u64>,
}
