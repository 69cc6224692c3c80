use std::{num::NonZeroUsize, sync::Arc};

use log::{debug, info};

use super::{Checkpoint, CheckpointErr, CheckpointReader, Manifest, Persistence, Result};

/// Persists checkpoints, blob first and manifest last.
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    persistence: Arc<dyn Persistence>,
}

impl CheckpointWriter {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Writes `checkpoint`, it becomes visible to readers once its manifest lands.
    ///
    /// # Returns
    /// The committed manifest.
    pub async fn write(&self, checkpoint: &Checkpoint) -> Result<Manifest> {
        let step = checkpoint.global_step;
        let (manifest, blob) = Manifest::encode(checkpoint);

        self.persistence.put(&Manifest::blob_key(step), blob).await?;
        self.persistence
            .put(&Manifest::manifest_key(step), manifest.to_json()?)
            .await?;

        info!(step = step, bytes = manifest.byte_size; "checkpoint committed");
        Ok(manifest)
    }

    /// Keeps the newest `keep_last` complete checkpoints and drops everything else,
    /// incomplete leftovers included.
    ///
    /// Must not run while another checkpoint is being written.
    ///
    /// # Returns
    /// The steps that were removed.
    pub async fn prune(
        &self,
        reader: &CheckpointReader,
        keep_last: NonZeroUsize,
    ) -> Result<Vec<u64>> {
        let mut kept = 0;
        let mut removed = Vec::new();

        for step in reader.list_steps().await? {
            let complete = match reader.load_manifest(step).await {
                Ok(_) => true,
                Err(CheckpointErr::Corrupt { .. }) => false,
                Err(e) => return Err(e),
            };

            if complete && kept < keep_last.get() {
                kept += 1;
                continue;
            }

            self.persistence.delete(&Manifest::dir_name(step)).await?;
            debug!(step = step, complete = complete; "pruned checkpoint");
            removed.push(step);
        }

        Ok(removed)
    }
}
