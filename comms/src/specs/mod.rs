//! The configuration surface of every role, supplied once at process start.

pub mod node;
pub mod server;
pub mod worker;

pub use node::{NodeConfig, TaskSpec};
pub use server::{BlockSpec, CheckpointSpec, InitSpec, ServerSpec};
pub use worker::{ComputeSpec, RetrySpec, WorkerSpec};
