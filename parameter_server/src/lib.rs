//! The parameter server role: the shared block store, its checkpoints, the training
//! lifecycle and the service answering workers.

pub mod checkpoint;
mod initialization;
pub mod lifecycle;
pub mod service;
pub mod storage;
mod test;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointErr, CheckpointManager, FsPersistence, Persistence,
};
pub use initialization::InitErr;
pub use lifecycle::{LifecycleConfig, LifecycleCoordinator, LifecycleState, ShutdownReport};
pub use service::ParameterServer;
pub use storage::{BlockValue, ParameterStore, StoreErr};
