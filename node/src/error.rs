use std::{error::Error, fmt, io};

use comms::ClusterErr;
use parameter_server::{CheckpointErr, StoreErr};
use worker::WorkerErr;

/// Everything that can make a node exit with a failure.
#[derive(Debug)]
pub enum NodeErr {
    Io(io::Error),
    Config(serde_json::Error),
    /// The configuration parses but can't be run.
    Invalid(String),
    Cluster(ClusterErr),
    Store(StoreErr),
    Checkpoint(CheckpointErr),
    Worker(WorkerErr),
}

impl NodeErr {
    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        Self::Invalid(detail.into())
    }
}

impl fmt::Display for NodeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Config(e) => write!(f, "malformed configuration: {e}"),
            Self::Invalid(detail) => write!(f, "invalid configuration: {detail}"),
            Self::Cluster(e) => write!(f, "cluster error: {e}"),
            Self::Store(e) => write!(f, "parameter store error: {e}"),
            Self::Checkpoint(e) => write!(f, "checkpoint error: {e}"),
            Self::Worker(e) => write!(f, "{e}"),
        }
    }
}

impl Error for NodeErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Invalid(_) => None,
            Self::Cluster(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            Self::Worker(e) => Some(e),
        }
    }
}

impl From<io::Error> for NodeErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for NodeErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value)
    }
}

impl From<ClusterErr> for NodeErr {
    fn from(value: ClusterErr) -> Self {
        Self::Cluster(value)
    }
}

impl From<StoreErr> for NodeErr {
    fn from(value: StoreErr) -> Self {
        Self::Store(value)
    }
}

impl From<CheckpointErr> for NodeErr {
    fn from(value: CheckpointErr) -> Self {
        Self::Checkpoint(value)
    }
}

impl From<WorkerErr> for NodeErr {
    fn from(value: WorkerErr) -> Self {
        Self::Worker(value)
    }
}
