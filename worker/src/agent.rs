use comms::{
    AgentState,
    specs::{RetrySpec, WorkerSpec},
};
use log::{debug, error, info, warn};
use parameter_server::BlockValue;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    client::{ClientErr, ParameterClient, Params, Pushed},
    compute::{Compute, Deltas},
    error::{Result, WorkerErr},
    retry::Backoff,
    state::WorkerSession,
};

/// How a single worker agent runs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub task_index: usize,
    /// The blocks pulled before every compute step.
    pub blocks: Vec<String>,
    pub retry: RetrySpec,
    /// Stops the agent on its own after this many completed steps.
    pub max_steps: Option<u64>,
}

impl AgentConfig {
    pub fn from_spec(task_index: usize, spec: &WorkerSpec) -> Self {
        Self {
            task_index,
            blocks: spec.blocks.clone(),
            retry: spec.retry,
            max_steps: spec.max_steps,
        }
    }
}

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Stop,
}

#[derive(Debug, Default)]
struct PushReport {
    applied: usize,
    stop: bool,
    abandoned: bool,
}

/// Runs the pull, compute and push cycle of one worker against the parameter server.
///
/// The agent goes `Idle -> Pulling -> Computing -> Pushing -> Idle` on every step and ends
/// in `Stopped`. The stop token is checked after every phase, an update that was already
/// computed is still pushed.
pub struct WorkerAgent<P, C> {
    config: AgentConfig,
    client: P,
    compute: C,
    stop: CancellationToken,
    state: watch::Sender<AgentState>,
    session: WorkerSession,
}

impl<P: ParameterClient, C: Compute> WorkerAgent<P, C> {
    /// Creates a new `WorkerAgent`.
    ///
    /// # Arguments
    /// * `config` - The agent configuration.
    /// * `client` - Access to the parameter store.
    /// * `compute` - Produces the deltas.
    /// * `stop` - Cancelled when the agent should stop.
    pub fn new(config: AgentConfig, client: P, compute: C, stop: CancellationToken) -> Self {
        let (state, _) = watch::channel(AgentState::Idle);
        let session = WorkerSession::new(config.task_index);

        Self {
            config,
            client,
            compute,
            stop,
            state,
            session,
        }
    }

    /// Returns a receiver following the agent's state.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub fn session(&self) -> &WorkerSession {
        &self.session
    }

    /// Trains until stopped, the parameter server completes or a fatal error happens.
    ///
    /// The agent publishes `Stopped` whatever the outcome.
    ///
    /// # Returns
    /// The final session, or the error that stopped the agent.
    pub async fn run(mut self) -> Result<WorkerSession> {
        let task_index = self.config.task_index;
        info!(task_index = task_index; "worker agent started");

        let res = self.train().await;
        self.transition(AgentState::Stopped);

        if let Err(e) = self.client.disconnect().await {
            debug!(task_index = task_index; "disconnect failed: {e}");
        }

        match res {
            Ok(()) => {
                info!(
                    task_index = task_index,
                    local_steps = self.session.local_step,
                    abandoned_steps = self.session.abandoned_steps;
                    "worker agent stopped"
                );
                Ok(self.session)
            }
            Err(e) => {
                error!(task_index = task_index; "worker agent failed: {e}");
                Err(e)
            }
        }
    }

    async fn train(&mut self) -> Result<()> {
        loop {
            if self.stop.is_cancelled() {
                debug!(task_index = self.config.task_index; "stop observed while idle");
                return Ok(());
            }

            if let Some(max_steps) = self.config.max_steps {
                if self.session.local_step >= max_steps {
                    info!(task_index = self.config.task_index; "reached {max_steps} local steps");
                    return Ok(());
                }
            }

            if self.step().await? == Step::Stop {
                return Ok(());
            }
        }
    }

    async fn step(&mut self) -> Result<Step> {
        let task_index = self.config.task_index;

        self.transition(AgentState::Pulling);
        let Some(params) = self.pull().await? else {
            return Ok(Step::Stop);
        };

        if self.stop.is_cancelled() {
            debug!(task_index = task_index; "stop observed after pull");
            return Ok(Step::Stop);
        }

        self.transition(AgentState::Computing);
        let deltas = self
            .compute
            .compute(&params)
            .await
            .map_err(|source| WorkerErr::Compute {
                task_index,
                local_step: self.session.local_step,
                source,
            })?;

        let flush = self.stop.is_cancelled();
        if flush {
            info!(
                task_index = task_index;
                "stop observed after compute, flushing the update first"
            );
        }

        self.transition(AgentState::Pushing);
        self.session.pending_update = true;
        let report = self.push(&params, deltas).await;
        self.session.pending_update = false;
        let report = report?;

        if report.abandoned {
            self.session.abandoned_steps += 1;
        } else if report.applied > 0 {
            self.session.local_step += 1;
        }

        if flush || report.stop || self.stop.is_cancelled() {
            return Ok(Step::Stop);
        }

        self.transition(AgentState::Idle);
        Ok(Step::Continue)
    }

    /// Pulls the configured blocks, `None` once the parameter server stops serving.
    async fn pull(&mut self) -> Result<Option<Params>> {
        let task_index = self.config.task_index;
        let mut backoff = Backoff::new(self.config.retry);

        loop {
            let e = match self.client.pull(&self.config.blocks).await {
                Ok(params) => return Ok(Some(params)),
                Err(e) if e.is_stop() => {
                    info!(task_index = task_index; "parameter server is stopping");
                    return Ok(None);
                }
                Err(e) => e,
            };

            if !e.is_transient() {
                return Err(match e {
                    e @ ClientErr::UnknownParameter { .. } => {
                        WorkerErr::Configuration { task_index, source: e }
                    }
                    e => WorkerErr::Protocol { task_index, source: e },
                });
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(WorkerErr::RetriesExhausted {
                    task_index,
                    op: "pull",
                    attempts: backoff.attempts(),
                    source: e,
                });
            };

            warn!(
                task_index = task_index,
                attempt = backoff.attempts();
                "pull failed, retrying in {delay:?}: {e}"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.cancelled() => return Ok(None),
            }
        }
    }

    async fn push(&mut self, params: &Params, deltas: Deltas) -> Result<PushReport> {
        let task_index = self.config.task_index;
        let mut report = PushReport::default();

        for (id, delta) in &deltas {
            let base_version = params.get(id).map_or(0, BlockValue::version);
            self.session.seq += 1;
            let seq = self.session.seq;

            match self.push_block(id, delta, base_version, seq).await? {
                Ok(pushed) => {
                    report.applied += 1;
                    report.stop |= pushed.stop;
                }
                Err(e) if e.is_stop() => {
                    info!(task_index = task_index, block = id.as_str(); "update refused: {e}");
                    report.stop = true;
                    break;
                }
                Err(e @ (ClientErr::UnknownParameter { .. } | ClientErr::SizeMismatch { .. })) => {
                    warn!(
                        task_index = task_index,
                        block = id.as_str();
                        "abandoning the rest of local step {}: {e}",
                        self.session.local_step
                    );
                    report.abandoned = true;
                    break;
                }
                Err(e) => return Err(WorkerErr::Protocol { task_index, source: e }),
            }
        }

        Ok(report)
    }

    /// Pushes one delta, retrying transient failures with the same sequence number.
    ///
    /// # Returns
    /// The outcome of the last attempt, or `RetriesExhausted`.
    async fn push_block(
        &mut self,
        id: &str,
        delta: &[f32],
        base_version: u64,
        seq: u64,
    ) -> Result<std::result::Result<Pushed, ClientErr>> {
        let mut backoff = Backoff::new(self.config.retry);

        loop {
            let e = match self.client.push(id, delta, base_version, seq).await {
                Err(e) if e.is_transient() => e,
                res => return Ok(res),
            };

            let Some(delay) = backoff.next_delay() else {
                return Err(WorkerErr::RetriesExhausted {
                    task_index: self.config.task_index,
                    op: "push",
                    attempts: backoff.attempts(),
                    source: e,
                });
            };

            warn!(
                task_index = self.config.task_index,
                block = id,
                attempt = backoff.attempts();
                "push failed, retrying in {delay:?}: {e}"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn transition(&self, to: AgentState) {
        let from = self.state.send_replace(to);
        if from != to {
            debug!(task_index = self.config.task_index; "{from} -> {to}");
        }
    }
}
