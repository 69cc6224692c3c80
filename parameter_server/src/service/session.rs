use std::{collections::HashMap, io, sync::Arc};

use comms::{
    AgentState, OnoReceiver, OnoSender,
    msg::{BlockMeta, Command, DeltaMeta, Msg, Payload, RemoteErr},
};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
};

use super::ledger::PushLedger;
use crate::{lifecycle::LifecycleCoordinator, storage::ParameterStore};

pub(super) type Ledgers = Arc<Mutex<HashMap<usize, Arc<Mutex<PushLedger>>>>>;

/// The worker on the other end of a session, known once it sent `Connect`.
struct Peer {
    task_index: usize,
    state: watch::Sender<AgentState>,
    ledger: Arc<Mutex<PushLedger>>,
}

/// Serves a single worker connection.
pub(super) struct Session<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    store: ParameterStore,
    coordinator: Arc<LifecycleCoordinator>,
    ledgers: Ledgers,
    peer: Option<Peer>,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        rx: OnoReceiver<R>,
        tx: OnoSender<W>,
        store: ParameterStore,
        coordinator: Arc<LifecycleCoordinator>,
        ledgers: Ledgers,
    ) -> Self {
        Self {
            rx,
            tx,
            store,
            coordinator,
            ledgers,
            peer: None,
        }
    }

    /// Handles requests until the worker disconnects or the stream fails.
    ///
    /// The worker's agent is marked `Stopped` however the session ends.
    pub async fn run(mut self) -> io::Result<()> {
        let mut buf = Vec::new();
        let mut values = Vec::new();

        let res = loop {
            let msg = match self.rx.recv_into(&mut buf).await {
                Ok(msg) => msg,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break Ok(()),
                Err(e) => break Err(e),
            };

            match self.handle(msg, &mut values).await {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.set_state(AgentState::Stopped);

        if let Some(peer) = &self.peer {
            info!(task_index = peer.task_index; "worker disconnected");
        }

        res
    }

    /// Returns `false` once the session is over.
    async fn handle(&mut self, msg: Msg<'_>, values: &mut Vec<f32>) -> io::Result<bool> {
        match msg {
            Msg::Control(Command::Connect {
                task_index,
                incarnation,
            }) => self.connect(task_index, incarnation),
            Msg::Control(Command::Pull { ids }) => self.pull(&ids, values).await?,
            Msg::Data(Payload::Delta { meta, delta }) => self.push(meta, delta).await?,
            Msg::Control(Command::Disconnect) => {
                self.tx.send(&Msg::Control(Command::Disconnect)).await?;
                return Ok(false);
            }
            other => {
                let detail = format!("unexpected {} message", other.kind());
                self.reject(detail).await?;
            }
        }

        Ok(true)
    }

    fn connect(&mut self, task_index: usize, incarnation: u64) {
        let ledger = {
            let mut ledgers = self.ledgers.lock();
            let ledger = ledgers
                .entry(task_index)
                .or_insert_with(|| Arc::new(Mutex::new(PushLedger::new(incarnation))));

            ledger.lock().rebind(incarnation);
            Arc::clone(ledger)
        };

        let (state, observer) = watch::channel(AgentState::Idle);
        self.coordinator.register_agent(task_index, observer);

        let peer = Peer {
            task_index,
            state,
            ledger,
        };

        if let Some(previous) = self.peer.replace(peer) {
            previous.state.send_replace(AgentState::Stopped);
        }

        info!(task_index = task_index; "worker connected");
    }

    async fn pull(&mut self, ids: &[String], values: &mut Vec<f32>) -> io::Result<()> {
        if self.peer.is_none() {
            return self.reject("pull before connect").await;
        }

        self.set_state(AgentState::Pulling);

        if self.coordinator.is_stopping() {
            self.set_state(AgentState::Idle);
            return self.tx.send(&Msg::Control(Command::Stop)).await;
        }

        let blocks = match self.store.pull(ids) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("rejecting pull: {e}");
                self.set_state(AgentState::Idle);
                return self.tx.send(&Msg::Err(e.into())).await;
            }
        };

        values.clear();
        let meta: Vec<_> = blocks
            .into_iter()
            .map(|(id, block)| {
                values.extend_from_slice(block.values());
                BlockMeta {
                    id,
                    version: block.version(),
                    len: block.len(),
                }
            })
            .collect();

        let msg = Msg::Data(Payload::Blocks {
            meta,
            values: values.as_slice(),
        });
        self.tx.send(&msg).await?;
        self.set_state(AgentState::Computing);
        Ok(())
    }

    async fn push(&mut self, meta: DeltaMeta, delta: &[f32]) -> io::Result<()> {
        let Some(peer) = &self.peer else {
            return self.reject("push before connect").await;
        };

        let task_index = peer.task_index;
        peer.state.send_replace(AgentState::Pushing);

        let res = {
            let mut ledger = peer.ledger.lock();

            match ledger.replay(meta.seq) {
                Some(version) => {
                    debug!(task_index = task_index, seq = meta.seq; "replaying retried push");
                    Ok(version)
                }
                None => {
                    let res = self.store.push(&meta.id, delta, meta.base_version);
                    if let Ok(version) = res {
                        ledger.record(meta.seq, version);
                    }
                    res
                }
            }
        };

        let msg = match res {
            Ok(version) => {
                trace!(
                    task_index = task_index,
                    block = meta.id.as_str(),
                    version = version;
                    "push applied"
                );
                Msg::Control(Command::Pushed {
                    version,
                    stop: self.coordinator.is_stopping(),
                })
            }
            Err(e) => {
                debug!(task_index = task_index; "rejecting push: {e}");
                Msg::Err(e.into())
            }
        };

        self.tx.send(&msg).await?;
        self.set_state(AgentState::Idle);
        Ok(())
    }

    async fn reject(&mut self, detail: impl Into<String>) -> io::Result<()> {
        let err = RemoteErr::Protocol {
            detail: detail.into(),
        };

        warn!("{err}");
        self.tx.send(&Msg::Err(err)).await
    }

    fn set_state(&self, state: AgentState) {
        if let Some(peer) = &self.peer {
            peer.state.send_replace(state);
        }
    }
}
