use std::{error::Error, fmt, io};

use crate::{client::ClientErr, compute::ComputeErr};

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Failures that stop a worker agent.
#[derive(Debug)]
pub enum WorkerErr {
    /// The worker asks for blocks the parameter server doesn't have.
    Configuration {
        task_index: usize,
        source: ClientErr,
    },
    RetriesExhausted {
        task_index: usize,
        op: &'static str,
        attempts: u32,
        source: ClientErr,
    },
    Compute {
        task_index: usize,
        local_step: u64,
        source: ComputeErr,
    },
    Protocol {
        task_index: usize,
        source: ClientErr,
    },
}

impl WorkerErr {
    pub fn task_index(&self) -> usize {
        match self {
            Self::Configuration { task_index, .. }
            | Self::RetriesExhausted { task_index, .. }
            | Self::Compute { task_index, .. }
            | Self::Protocol { task_index, .. } => *task_index,
        }
    }
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { task_index, source } => {
                write!(f, "worker/{task_index} configuration error: {source}")
            }
            Self::RetriesExhausted {
                task_index,
                op,
                attempts,
                source,
            } => write!(
                f,
                "worker/{task_index} gave up on {op} after {attempts} attempt(s): {source}"
            ),
            Self::Compute {
                task_index,
                local_step,
                source,
            } => write!(
                f,
                "worker/{task_index} compute failed at local step {local_step}: {source}"
            ),
            Self::Protocol { task_index, source } => write!(f, "worker/{task_index} {source}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Configuration { source, .. }
            | Self::RetriesExhausted { source, .. }
            | Self::Protocol { source, .. } => Some(source),
            Self::Compute { source, .. } => Some(source),
        }
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        io::Error::other(value)
    }
}
