use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use comms::specs::CheckpointSpec;
use log::{debug, error, info, warn};
use tokio::{
    sync::Mutex,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{Checkpoint, CheckpointReader, CheckpointWriter, Persistence, Result};
use crate::storage::ParameterStore;

/// When checkpoints are taken and how many are kept.
#[derive(Debug, Clone, Default)]
pub struct CheckpointConfig {
    pub every: Option<Duration>,
    pub every_steps: Option<u64>,
    pub keep_last: Option<NonZeroUsize>,
}

impl From<&CheckpointSpec> for CheckpointConfig {
    fn from(spec: &CheckpointSpec) -> Self {
        Self {
            every: spec.every(),
            every_steps: spec.every_steps.filter(|n| *n > 0),
            keep_last: spec.keep_last,
        }
    }
}

/// Takes snapshots of a `ParameterStore` and persists them.
///
/// At most one checkpoint is written at a time, a trigger arriving while one is in
/// flight is dropped rather than queued.
#[derive(Debug)]
pub struct CheckpointManager {
    store: ParameterStore,
    reader: CheckpointReader,
    writer: CheckpointWriter,
    config: CheckpointConfig,
    // Step of the newest committed checkpoint, held while writing.
    committed: Mutex<Option<u64>>,
    // Global step when the manager was created, the step interval counts from here
    // until a checkpoint is committed.
    created_at: u64,
}

impl CheckpointManager {
    /// Creates a new `CheckpointManager`.
    ///
    /// # Arguments
    /// * `store` - The store to snapshot.
    /// * `persistence` - Where checkpoints are written.
    /// * `config` - The triggers and the retention.
    pub fn new(
        store: ParameterStore,
        persistence: Arc<dyn Persistence>,
        config: CheckpointConfig,
    ) -> Self {
        Self {
            created_at: store.global_step(),
            store,
            reader: CheckpointReader::new(Arc::clone(&persistence)),
            writer: CheckpointWriter::new(persistence),
            config,
            committed: Mutex::new(None),
        }
    }

    /// Records that a checkpoint at `step` already exists, usually the recovered one.
    pub fn with_committed(mut self, step: u64) -> Self {
        *self.committed.get_mut() = Some(step);
        self
    }

    /// Finds the newest complete checkpoint in `persistence`, before any store exists.
    pub async fn recover(persistence: Arc<dyn Persistence>) -> Result<Option<Checkpoint>> {
        CheckpointReader::new(persistence).recover().await
    }

    pub fn reader(&self) -> &CheckpointReader {
        &self.reader
    }

    /// Reads every block without a global lock, see `ParameterStore::snapshot`.
    pub fn snapshot(&self) -> Checkpoint {
        self.store.snapshot()
    }

    /// Snapshots the store and persists it.
    ///
    /// # Returns
    /// The step of the written checkpoint, `None` if one was already in flight.
    pub async fn checkpoint(&self) -> Result<Option<u64>> {
        let Ok(mut committed) = self.committed.try_lock() else {
            debug!("checkpoint already in flight, dropping trigger");
            return Ok(None);
        };

        self.commit(&mut committed).await.map(Some)
    }

    /// Waits for any in-flight write and takes one last checkpoint, skipped when the
    /// newest committed one already holds the current step.
    pub async fn final_checkpoint(&self) -> Result<Option<u64>> {
        let mut committed = self.committed.lock().await;
        let step = self.store.global_step();

        if *committed == Some(step) {
            info!(step = step; "final checkpoint already committed");
            return Ok(None);
        }

        self.commit(&mut committed).await.map(Some)
    }

    /// Fires checkpoints on the time or the step interval, whichever comes first,
    /// until `stop` is cancelled.
    ///
    /// A failed checkpoint is logged and retried on the next trigger. A write in progress
    /// is never interrupted by `stop`.
    pub async fn run(&self, stop: CancellationToken) {
        if self.config.every.is_none() && self.config.every_steps.is_none() {
            return;
        }

        let mut timer = self.config.every.map(|every| {
            let mut timer = time::interval_at(Instant::now() + every, every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        let mut base = self.committed.lock().await.unwrap_or(self.created_at);

        loop {
            let next_step = self.config.every_steps.map(|n| base.saturating_add(n));

            let trigger = tokio::select! {
                _ = stop.cancelled() => return,
                _ = Self::tick(timer.as_mut()) => "time",
                step = Self::reach(&self.store, next_step) => {
                    debug!(step = step; "step interval reached");
                    "steps"
                }
            };

            base = match self.checkpoint().await {
                Ok(Some(step)) => step,
                Ok(None) => self.store.global_step(),
                Err(e) => {
                    error!(trigger = trigger; "checkpoint failed: {e}");
                    self.store.global_step()
                }
            };

            if let Some(timer) = timer.as_mut() {
                timer.reset();
            }
        }
    }

    async fn commit(&self, committed: &mut Option<u64>) -> Result<u64> {
        let checkpoint = self.snapshot();
        let step = checkpoint.global_step;

        self.writer.write(&checkpoint).await?;
        *committed = Some(step);

        if let Some(keep_last) = self.config.keep_last {
            match self.writer.prune(&self.reader, keep_last).await {
                Ok(removed) if !removed.is_empty() => debug!("pruned checkpoints {removed:?}"),
                Ok(_) => {}
                Err(e) => warn!("failed to prune old checkpoints: {e}"),
            }
        }

        Ok(step)
    }

    async fn tick(timer: Option<&mut Interval>) {
        match timer {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn reach(store: &ParameterStore, step: Option<u64>) -> u64 {
        match step {
            Some(step) => store.wait_for_step(step).await,
            None => std::future::pending().await,
        }
    }
}
