use std::{
    error::Error,
    fmt::{self, Display},
};

use comms::msg::RemoteErr;

use crate::initialization::InitErr;

/// The specific result type for the storage module.
pub type Result<T> = std::result::Result<T, StoreErr>;

/// Errors returned by the `ParameterStore`.
#[derive(Debug)]
pub enum StoreErr {
    /// The block doesn't exist, fatal to the caller's current step.
    UnknownParameter { id: String },
    /// The delta doesn't match the block length, nothing was applied.
    SizeMismatch {
        id: String,
        expected: usize,
        got: usize,
    },
    /// The store accepted its last allowed update, training is complete.
    StepLimitReached { limit: u64 },
    /// Two blocks were configured with the same identifier.
    DuplicateBlock { id: String },
    Init(InitErr),
}

impl Display for StoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownParameter { id } => write!(f, "unknown parameter block {id:?}"),
            Self::SizeMismatch { id, expected, got } => write!(
                f,
                "delta for block {id:?} has {got} values, the block has {expected}"
            ),
            Self::StepLimitReached { limit } => write!(f, "step limit {limit} reached"),
            Self::DuplicateBlock { id } => write!(f, "block {id:?} is defined twice"),
            Self::Init(e) => write!(f, "{e}"),
        }
    }
}

impl Error for StoreErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Init(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InitErr> for StoreErr {
    fn from(value: InitErr) -> Self {
        Self::Init(value)
    }
}

impl From<StoreErr> for RemoteErr {
    fn from(value: StoreErr) -> Self {
        match value {
            StoreErr::UnknownParameter { id } => Self::UnknownParameter { id },
            StoreErr::SizeMismatch { id, expected, got } => {
                Self::SizeMismatch { id, expected, got }
            }
            StoreErr::StepLimitReached { limit } => Self::StepLimitReached { limit },
            other => Self::Protocol {
                detail: other.to_string(),
            },
        }
    }
}
