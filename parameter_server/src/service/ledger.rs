/// The last push a worker got applied, used to answer a retried push without applying
/// it twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PushLedger {
    incarnation: u64,
    last: Option<(u64, u64)>,
}

impl PushLedger {
    pub fn new(incarnation: u64) -> Self {
        Self {
            incarnation,
            last: None,
        }
    }

    /// Forgets everything if the worker process restarted.
    pub fn rebind(&mut self, incarnation: u64) {
        if self.incarnation != incarnation {
            *self = Self::new(incarnation);
        }
    }

    /// Returns the recorded version if `seq` was already applied.
    pub fn replay(&self, seq: u64) -> Option<u64> {
        self.last
            .filter(|(last_seq, _)| seq <= *last_seq)
            .map(|(_, version)| version)
    }

    pub fn record(&mut self, seq: u64, version: u64) {
        self.last = Some((seq, version));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_only_applied_sequences() {
        let mut ledger = PushLedger::new(1);
        assert_eq!(ledger.replay(1), None);

        ledger.record(1, 10);
        assert_eq!(ledger.replay(1), Some(10));
        assert_eq!(ledger.replay(2), None);

        ledger.rebind(1);
        assert_eq!(ledger.replay(1), Some(10));

        ledger.rebind(2);
        assert_eq!(ledger.replay(1), None);
    }
}
