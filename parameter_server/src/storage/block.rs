use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

/// The committed value of a block together with its version.
///
/// Cloning only bumps a reference count, the values are never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockValue {
    values: Arc<[f32]>,
    version: u64,
}

impl BlockValue {
    /// Creates a new `BlockValue`.
    ///
    /// # Arguments
    /// * `values` - The parameter values.
    /// * `version` - The amount of updates applied to the block so far.
    pub fn new(values: impl Into<Arc<[f32]>>, version: u64) -> Self {
        Self {
            values: values.into(),
            version,
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A single independently locked parameter block.
///
/// Writers hold an upgradable lock while building the new value, so they exclude
/// each other while readers keep going. Readers only wait for the exclusive lock taken
/// to swap the committed `Arc`, never for the addition itself.
#[derive(Debug)]
pub(super) struct ParameterBlock {
    committed: RwLock<BlockValue>,
}

/// What a writer saw and produced while applying a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Applied {
    pub previous: u64,
    pub version: u64,
}

impl ParameterBlock {
    pub fn new(value: BlockValue) -> Self {
        Self {
            committed: RwLock::new(value),
        }
    }

    pub fn len(&self) -> usize {
        self.committed.read().len()
    }

    /// Returns the committed value, never a partially applied one.
    pub fn read(&self) -> BlockValue {
        self.committed.read().clone()
    }

    /// Adds `delta` element-wise into the block.
    ///
    /// # Arguments
    /// * `delta` - The update, its length was already checked against the block.
    /// * `admit` - Called once the writer owns the block and before anything is
    ///   mutated, an error from it leaves the block untouched.
    /// * `commit` - Called after the swap while the writer still owns the block.
    ///
    /// # Returns
    /// The previous and the new version, or the error returned by `admit`.
    pub fn apply<E>(
        &self,
        delta: &[f32],
        admit: impl FnOnce(&BlockValue) -> Result<(), E>,
        commit: impl FnOnce(),
    ) -> Result<Applied, E> {
        let current = self.committed.upgradable_read();
        admit(&current)?;

        let values: Arc<[f32]> = current
            .values
            .iter()
            .zip(delta)
            .map(|(v, d)| v + d)
            .collect();

        let applied = Applied {
            previous: current.version,
            version: current.version + 1,
        };

        let mut committed = RwLockUpgradableReadGuard::upgrade(current);
        *committed = BlockValue::new(values, applied.version);
        commit();

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_bumps_version_once() {
        let block = ParameterBlock::new(BlockValue::new(vec![1.0, 2.0], 4));

        let applied = block
            .apply::<()>(&[0.5, -1.0], |_| Ok(()), || {})
            .unwrap();

        assert_eq!(applied, Applied { previous: 4, version: 5 });
        assert_eq!(block.read(), BlockValue::new(vec![1.5, 1.0], 5));
    }

    #[test]
    fn rejected_admission_leaves_block_untouched() {
        let block = ParameterBlock::new(BlockValue::new(vec![1.0], 0));
        let mut committed = false;

        let res = block.apply(&[1.0], |_| Err("full"), || committed = true);

        assert_eq!(res, Err("full"));
        assert!(!committed);
        assert_eq!(block.read(), BlockValue::new(vec![1.0], 0));
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let block = ParameterBlock::new(BlockValue::new(vec![0.0; 3], 0));
        let before = block.read();

        block.apply::<()>(&[1.0; 3], |_| Ok(()), || {}).unwrap();

        assert_eq!(before.values(), [0.0; 3]);
        assert_eq!(block.read().values(), [1.0; 3]);
    }
}
