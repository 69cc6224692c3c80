use std::{
    collections::{BTreeMap, HashMap, hash_map::Entry},
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use comms::specs::BlockSpec;
use log::{debug, trace};
use rand::{SeedableRng, rngs::StdRng};
use tokio::sync::Notify;

use super::{BlockValue, Result, StoreErr, block::ParameterBlock};
use crate::{checkpoint::Checkpoint, initialization};

const UNBOUNDED: u64 = u64::MAX;

/// The authoritative copy of every parameter block and of the global step.
///
/// Cloning is cheap, every clone refers to the same blocks.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    blocks: HashMap<String, ParameterBlock>,
    step: AtomicU64,
    reserved: AtomicU64,
    limit: AtomicU64,
    step_changed: Notify,
}

impl ParameterStore {
    /// Creates a new `ParameterStore`.
    ///
    /// # Arguments
    /// * `blocks` - The initial value and version of every block.
    /// * `global_step` - The step the store starts counting from.
    ///
    /// # Returns
    /// The store, or `DuplicateBlock` if two blocks share an identifier.
    pub fn new<I>(blocks: I, global_step: u64) -> Result<Self>
    where
        I: IntoIterator<Item = (String, BlockValue)>,
    {
        let mut map = HashMap::new();

        for (id, value) in blocks {
            match map.entry(id) {
                Entry::Occupied(entry) => {
                    return Err(StoreErr::DuplicateBlock {
                        id: entry.key().clone(),
                    });
                }
                Entry::Vacant(entry) => {
                    entry.insert(value);
                }
            }
        }

        Ok(Self::from_unique(map, global_step))
    }

    /// Creates a fresh store at step zero, every block at version zero.
    ///
    /// # Arguments
    /// * `specs` - The block descriptions.
    /// * `seed` - Seed for the random initializers, taken from the OS if missing.
    pub fn from_specs(specs: &[BlockSpec], seed: Option<u64>) -> Result<Self> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut blocks = Vec::with_capacity(specs.len());
        for spec in specs {
            let values = initialization::generate(spec, &mut rng)?;
            debug!(block = spec.id.as_str(), len = values.len(); "initialized block");
            blocks.push((spec.id.clone(), BlockValue::new(values, 0)));
        }

        Self::new(blocks, 0)
    }

    /// Rebuilds a store from a recovered checkpoint, versions and step included.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let blocks = checkpoint
            .blocks
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();

        Self::from_unique(blocks, checkpoint.global_step)
    }

    fn from_unique(blocks: HashMap<String, BlockValue>, global_step: u64) -> Self {
        let blocks = blocks
            .into_iter()
            .map(|(id, value)| (id, ParameterBlock::new(value)))
            .collect();

        Self {
            inner: Arc::new(Inner {
                blocks,
                step: AtomicU64::new(global_step),
                reserved: AtomicU64::new(global_step),
                limit: AtomicU64::new(UNBOUNDED),
                step_changed: Notify::new(),
            }),
        }
    }

    /// Bounds the global step, pushes past `limit` are refused with `StepLimitReached`.
    pub fn with_step_limit(self, limit: u64) -> Self {
        self.inner.limit.store(limit, Ordering::Release);
        self
    }

    pub fn step_limit(&self) -> Option<u64> {
        match self.inner.limit.load(Ordering::Acquire) {
            UNBOUNDED => None,
            limit => Some(limit),
        }
    }

    /// Reads the committed value and version of the requested blocks.
    ///
    /// Never waits on a writer, a block being updated is returned at its previous version.
    ///
    /// # Arguments
    /// * `ids` - The block identifiers.
    ///
    /// # Returns
    /// Every requested block, or `UnknownParameter` for the first missing one.
    pub fn pull<S: AsRef<str>>(&self, ids: &[S]) -> Result<BTreeMap<String, BlockValue>> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                Ok((id.to_string(), self.block(id)?.read()))
            })
            .collect()
    }

    /// Adds `delta` element-wise into the block `id`.
    ///
    /// The delta is applied whatever `base_version` says, the distance to the current
    /// version is only reported as staleness. The global step grows by one while the
    /// block is still owned by this writer.
    ///
    /// # Arguments
    /// * `id` - The block identifier.
    /// * `delta` - The update, as long as the block.
    /// * `base_version` - The version the delta was computed against.
    ///
    /// # Returns
    /// The new version of the block, or an error if nothing was applied.
    pub fn push(&self, id: &str, delta: &[f32], base_version: u64) -> Result<u64> {
        let block = self.block(id)?;

        let applied = block.apply(
            delta,
            |current| {
                if current.len() != delta.len() {
                    return Err(StoreErr::SizeMismatch {
                        id: id.to_string(),
                        expected: current.len(),
                        got: delta.len(),
                    });
                }

                self.reserve_step()
            },
            || {
                self.inner.step.fetch_add(1, Ordering::AcqRel);
            },
        )?;

        self.inner.step_changed.notify_waiters();

        let staleness = applied.previous.saturating_sub(base_version);
        trace!(block = id, version = applied.version, staleness = staleness; "applied delta");

        Ok(applied.version)
    }

    /// Reads the global step first and then every block, each one atomically.
    ///
    /// Concurrent pushes may land between block reads, so the blocks reflect at least
    /// the recorded step.
    pub fn snapshot(&self) -> Checkpoint {
        let global_step = self.global_step();
        let blocks = self
            .inner
            .blocks
            .iter()
            .map(|(id, block)| (id.clone(), block.read()))
            .collect();

        Checkpoint {
            global_step,
            blocks,
        }
    }

    /// The amount of updates accepted by the store, including the recovered ones.
    pub fn global_step(&self) -> u64 {
        self.inner.step.load(Ordering::Acquire)
    }

    /// Waits until the global step reaches `target`.
    ///
    /// # Returns
    /// The global step observed, at least `target`.
    pub async fn wait_for_step(&self, target: u64) -> u64 {
        loop {
            let mut notified = pin!(self.inner.step_changed.notified());
            notified.as_mut().enable();

            let step = self.global_step();
            if step >= target {
                return step;
            }

            notified.await;
        }
    }

    /// Returns every block identifier, sorted.
    pub fn block_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.blocks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the length of the block `id`.
    pub fn block_len(&self, id: &str) -> Result<usize> {
        self.block(id).map(ParameterBlock::len)
    }

    fn block(&self, id: &str) -> Result<&ParameterBlock> {
        self.inner
            .blocks
            .get(id)
            .ok_or_else(|| StoreErr::UnknownParameter { id: id.to_string() })
    }

    fn reserve_step(&self) -> Result<()> {
        let limit = self.inner.limit.load(Ordering::Acquire);

        self.inner
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |reserved| {
                (reserved < limit).then_some(reserved + 1)
            })
            .map(|_| ())
            .map_err(|_| StoreErr::StepLimitReached { limit })
    }
}
