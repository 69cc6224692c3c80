use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

pub type Result<T> = std::result::Result<T, CheckpointErr>;

/// Errors while writing or loading checkpoints.
#[derive(Debug)]
pub enum CheckpointErr {
    Io(io::Error),
    Serde(serde_json::Error),
    /// The checkpoint is incomplete or doesn't match its manifest.
    Corrupt { step: u64, reason: String },
}

impl CheckpointErr {
    pub(super) fn corrupt(step: u64, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            step,
            reason: reason.into(),
        }
    }
}

impl Display for CheckpointErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "checkpoint io error: {e}"),
            Self::Serde(e) => write!(f, "checkpoint manifest error: {e}"),
            Self::Corrupt { step, reason } => {
                write!(f, "checkpoint at step {step} is corrupt: {reason}")
            }
        }
    }
}

impl Error for CheckpointErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serde(e) => Some(e),
            Self::Corrupt { .. } => None,
        }
    }
}

impl From<io::Error> for CheckpointErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for CheckpointErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}
