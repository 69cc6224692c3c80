use std::sync::Arc;

use log::{debug, info, warn};

use super::{Checkpoint, CheckpointErr, Manifest, Persistence, Result};

/// Lists, validates and loads checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointReader {
    persistence: Arc<dyn Persistence>,
}

impl CheckpointReader {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Returns the step of every stored checkpoint, complete or not, newest first.
    pub async fn list_steps(&self) -> Result<Vec<u64>> {
        let mut steps: Vec<u64> = self
            .persistence
            .list()
            .await?
            .iter()
            .filter_map(|name| Manifest::parse_dir_name(name))
            .collect();

        steps.sort_unstable_by(|a, b| b.cmp(a));
        steps.dedup();
        Ok(steps)
    }

    /// Loads the manifest of the checkpoint at `step`.
    ///
    /// # Returns
    /// The manifest, or `Corrupt` if the completion marker is missing or unreadable.
    pub async fn load_manifest(&self, step: u64) -> Result<Manifest> {
        let Some(bytes) = self.persistence.get(&Manifest::manifest_key(step)).await? else {
            return Err(CheckpointErr::corrupt(step, "missing completion marker"));
        };

        let manifest = Manifest::from_json(&bytes).map_err(|e| CheckpointErr::corrupt(step, e))?;

        if manifest.global_step != step {
            return Err(CheckpointErr::corrupt(
                step,
                format!("manifest records step {}", manifest.global_step),
            ));
        }

        Ok(manifest)
    }

    /// Loads and validates the checkpoint taken at `step`.
    ///
    /// # Returns
    /// The checkpoint, `Corrupt` if it is incomplete or fails validation, or an io error.
    pub async fn load(&self, step: u64) -> Result<Checkpoint> {
        let manifest = self.load_manifest(step).await?;

        let Some(blob) = self.persistence.get(&Manifest::blob_key(step)).await? else {
            return Err(CheckpointErr::corrupt(step, "missing parameter blob"));
        };

        let checkpoint = manifest
            .decode(&blob)
            .map_err(|e| CheckpointErr::corrupt(step, e))?;

        debug!(step = step, blocks = checkpoint.blocks.len(); "loaded checkpoint");
        Ok(checkpoint)
    }

    /// Finds the newest complete checkpoint.
    ///
    /// Corrupt checkpoints are reported and skipped in favour of the next older one.
    ///
    /// # Returns
    /// The checkpoint, or `None` if there is no usable one.
    pub async fn recover(&self) -> Result<Option<Checkpoint>> {
        for step in self.list_steps().await? {
            match self.load(step).await {
                Ok(checkpoint) => {
                    info!(step = step; "recovered from checkpoint");
                    return Ok(Some(checkpoint));
                }
                Err(e @ CheckpointErr::Corrupt { .. }) => {
                    warn!("skipping checkpoint: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        info!("no checkpoint found, starting fresh");
        Ok(None)
    }
}
