/// What a worker agent knows about its own progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSession {
    pub task_index: usize,
    /// Steps whose every delta was accepted.
    pub local_step: u64,
    /// Set while the deltas of a computed step are being pushed.
    pub pending_update: bool,
    /// Steps given up because the parameter server rejected one of their deltas.
    pub abandoned_steps: u64,
    /// The sequence number of the last push.
    pub seq: u64,
}

impl WorkerSession {
    pub fn new(task_index: usize) -> Self {
        Self {
            task_index,
            ..Default::default()
        }
    }
}
