use std::{fmt, sync::Arc, time::Duration};

use comms::AgentState;
use futures::future;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    sync::watch,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    checkpoint::{CheckpointManager, Result},
    storage::ParameterStore,
};

/// The phases of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };

        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// The global step at which training is complete.
    pub target_step: u64,
    /// How long agents are waited for once stopping.
    pub grace_period: Duration,
}

/// What happened during a shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub global_step: u64,
    /// Task indices of the agents that reported `Stopped` in time.
    pub stopped: Vec<usize>,
    /// Task indices of the agents still running when the grace period ran out.
    pub abandoned: Vec<usize>,
    /// Step of the final checkpoint, `None` if it wasn't needed or isn't configured.
    pub checkpoint: Option<u64>,
}

/// Decides when training ends and drives the shutdown.
///
/// `Running -> Stopping` once the target step is reached or `shutdown` is called, then
/// every registered agent is waited for and a final checkpoint is taken before `Stopped`.
#[derive(Debug)]
pub struct LifecycleCoordinator {
    store: ParameterStore,
    checkpoints: Option<Arc<CheckpointManager>>,
    config: LifecycleConfig,
    stop: CancellationToken,
    shutdown: CancellationToken,
    agents: Mutex<Vec<(usize, watch::Receiver<AgentState>)>>,
    state: watch::Sender<LifecycleState>,
}

impl LifecycleCoordinator {
    /// Creates a new `LifecycleCoordinator`.
    ///
    /// # Arguments
    /// * `store` - The store whose global step is observed, bounded here by the target.
    /// * `checkpoints` - Takes the final checkpoint, if checkpointing is configured.
    /// * `config` - The target step and the grace period.
    pub fn new(
        store: ParameterStore,
        checkpoints: Option<Arc<CheckpointManager>>,
        config: LifecycleConfig,
    ) -> Self {
        let store = store.with_step_limit(config.target_step);
        let (state, _) = watch::channel(LifecycleState::Running);

        Self {
            store,
            checkpoints,
            config,
            stop: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            agents: Mutex::new(Vec::new()),
            state,
        }
    }

    /// The token every agent observes, cancelled when stopping begins.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Registers an agent so the shutdown waits for it.
    ///
    /// A new registration for the same task index replaces the previous one, agents
    /// whose state is no longer published are forgotten.
    ///
    /// # Arguments
    /// * `task_index` - The agent's worker task index.
    /// * `state` - The agent's published state.
    pub fn register_agent(&self, task_index: usize, state: watch::Receiver<AgentState>) {
        let mut agents = self.agents.lock();
        agents.retain(|(index, state)| *index != task_index && state.has_changed().is_ok());
        agents.push((task_index, state));

        debug!(task_index = task_index, agents = agents.len(); "registered agent");
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Requests an early stop, for example on an interrupt.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits until the coordinator reached `Stopped`.
    pub async fn stopped(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == LifecycleState::Stopped).await;
    }

    /// Runs the whole lifecycle.
    ///
    /// # Returns
    /// The shutdown report, or the error of the final checkpoint.
    pub async fn run(&self) -> Result<ShutdownReport> {
        tokio::select! {
            step = self.store.wait_for_step(self.config.target_step) => {
                info!(step = step, target = self.config.target_step; "target step reached");
            }
            _ = self.shutdown.cancelled() => {
                info!(step = self.store.global_step(); "shutdown requested");
            }
        }

        self.transition(LifecycleState::Stopping);
        self.stop.cancel();

        let (stopped, abandoned) = self.wait_for_agents().await;

        let checkpoint = match &self.checkpoints {
            Some(checkpoints) => checkpoints.final_checkpoint().await,
            None => Ok(None),
        };

        self.transition(LifecycleState::Stopped);

        let report = ShutdownReport {
            global_step: self.store.global_step(),
            stopped,
            abandoned,
            checkpoint: checkpoint?,
        };

        info!(
            step = report.global_step,
            stopped = report.stopped.len(),
            abandoned = report.abandoned.len();
            "training stopped"
        );

        Ok(report)
    }

    async fn wait_for_agents(&self) -> (Vec<usize>, Vec<usize>) {
        let agents = self.agents.lock().clone();
        let deadline = Instant::now() + self.config.grace_period;

        let waits = agents.into_iter().map(|(task_index, mut state)| async move {
            let outcome = time::timeout_at(deadline, state.wait_for(|s| s.is_stopped()))
                .await
                .map(|res| res.is_ok());

            match outcome {
                Ok(true) => (task_index, true),
                Ok(false) => {
                    debug!(task_index = task_index; "agent went away without reporting");
                    (task_index, true)
                }
                Err(_) => {
                    warn!(
                        task_index = task_index;
                        "agent didn't stop within the grace period, abandoning it"
                    );
                    (task_index, false)
                }
            }
        });

        let mut stopped = Vec::new();
        let mut abandoned = Vec::new();

        for (task_index, ok) in future::join_all(waits).await {
            if ok {
                stopped.push(task_index);
            } else {
                abandoned.push(task_index);
            }
        }

        stopped.sort_unstable();
        stopped.dedup();
        abandoned.sort_unstable();
        abandoned.dedup();
        (stopped, abandoned)
    }

    fn transition(&self, to: LifecycleState) {
        let from = self.state.send_replace(to);
        info!("lifecycle {from} -> {to}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BlockValue;

    fn coordinator() -> LifecycleCoordinator {
        let blocks = [("w".to_string(), BlockValue::new(vec![0.0], 0))];
        let config = LifecycleConfig {
            target_step: 10,
            grace_period: Duration::from_millis(50),
        };

        LifecycleCoordinator::new(ParameterStore::new(blocks, 0).unwrap(), None, config)
    }

    #[test]
    fn test_reconnect_replaces_registration() {
        let coordinator = coordinator();

        let (_first, first) = watch::channel(AgentState::Idle);
        coordinator.register_agent(0, first);
        let (gone, gone_rx) = watch::channel(AgentState::Idle);
        coordinator.register_agent(1, gone_rx);
        drop(gone);

        let (second, second_rx) = watch::channel(AgentState::Idle);
        coordinator.register_agent(0, second_rx);
        second.send_replace(AgentState::Pushing);

        let agents = coordinator.agents.lock();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].0, 0);
        assert_eq!(*agents[0].1.borrow(), AgentState::Pushing);
    }

    #[tokio::test]
    async fn test_shutdown_without_agents() {
        let coordinator = coordinator();
        coordinator.shutdown();

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.global_step, 0);
        assert!(report.stopped.is_empty());
        assert_eq!(coordinator.state(), LifecycleState::Stopped);
    }
}
