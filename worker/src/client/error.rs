use std::{error::Error, fmt, io};

use comms::msg::RemoteErr;
use parameter_server::StoreErr;

/// Failures talking to the parameter server.
#[derive(Debug)]
pub enum ClientErr {
    /// The connection failed, the request may or may not have been applied.
    Io(io::Error),
    UnknownParameter {
        id: String,
    },
    SizeMismatch {
        id: String,
        expected: usize,
        got: usize,
    },
    /// The store reached its target step and refused the update.
    TrainingComplete,
    /// The parameter server is shutting down.
    Stopping,
    Protocol(String),
}

impl ClientErr {
    /// Returns `true` for failures worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns `true` if the parameter server asked the worker to stop.
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::TrainingComplete | Self::Stopping)
    }

    pub(crate) fn unexpected(kind: &str) -> Self {
        Self::Protocol(format!("unexpected {kind} message"))
    }
}

impl fmt::Display for ClientErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::UnknownParameter { id } => write!(f, "unknown parameter block {id:?}"),
            Self::SizeMismatch { id, expected, got } => {
                write!(f, "size mismatch for block {id:?}: expected {expected}, got {got}")
            }
            Self::TrainingComplete => f.write_str("training complete"),
            Self::Stopping => f.write_str("parameter server is stopping"),
            Self::Protocol(detail) => write!(f, "protocol error: {detail}"),
        }
    }
}

impl Error for ClientErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RemoteErr> for ClientErr {
    fn from(value: RemoteErr) -> Self {
        match value {
            RemoteErr::UnknownParameter { id } => Self::UnknownParameter { id },
            RemoteErr::SizeMismatch { id, expected, got } => {
                Self::SizeMismatch { id, expected, got }
            }
            RemoteErr::StepLimitReached { .. } => Self::TrainingComplete,
            RemoteErr::Protocol { detail } => Self::Protocol(detail),
        }
    }
}

impl From<StoreErr> for ClientErr {
    fn from(value: StoreErr) -> Self {
        RemoteErr::from(value).into()
    }
}
