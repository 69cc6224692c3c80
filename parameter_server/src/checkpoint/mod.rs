//! Periodic snapshots of the `ParameterStore` and recovery from them.
//!
//! A checkpoint is a parameter blob followed by a manifest. The manifest is written
//! last and acts as the completion marker, a checkpoint without one is never loaded.

mod error;
mod manager;
mod manifest;
mod persistence;
mod reader;
mod writer;

use std::collections::BTreeMap;

pub use error::{CheckpointErr, Result};
pub use manager::{CheckpointConfig, CheckpointManager};
pub use manifest::{Manifest, ManifestBlock};
pub use persistence::{FsPersistence, Persistence};
pub use reader::CheckpointReader;
pub use writer::CheckpointWriter;

use crate::storage::BlockValue;

/// An immutable copy of every block at a given global step.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub global_step: u64,
    pub blocks: BTreeMap<String, BlockValue>,
}
