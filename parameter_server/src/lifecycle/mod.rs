mod coordinator;

pub use coordinator::{LifecycleConfig, LifecycleCoordinator, LifecycleState, ShutdownReport};
