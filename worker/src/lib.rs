//! The worker role: an agent that repeatedly pulls parameters, computes an update and
//! pushes it back, fully asynchronously from the other workers.

pub mod agent;
pub mod client;
pub mod compute;
pub mod error;
pub mod retry;
pub mod state;

pub use agent::{AgentConfig, WorkerAgent};
pub use client::{ClientErr, LocalClient, ParameterClient, Params, Pushed, RemoteClient};
pub use compute::{Compute, ComputeErr, Deltas, Quadratic};
pub use error::WorkerErr;
pub use state::WorkerSession;
