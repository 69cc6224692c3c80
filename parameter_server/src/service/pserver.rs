use std::{io, pin::pin, sync::Arc};

use comms::{OnoReceiver, OnoSender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    task::JoinSet,
};

use super::session::{Ledgers, Session};
use crate::{lifecycle::LifecycleCoordinator, storage::ParameterStore};

/// The central server structure, it handles task management and io between workers.
pub struct ParameterServer {
    tasks: JoinSet<io::Result<()>>,
    store: ParameterStore,
    coordinator: Arc<LifecycleCoordinator>,
    ledgers: Ledgers,
}

impl ParameterServer {
    /// Creates a new `ParameterServer`.
    ///
    /// # Arguments
    /// * `store` - The store served to the workers.
    /// * `coordinator` - Tracks connected workers and tells them when to stop.
    pub fn new(store: ParameterStore, coordinator: Arc<LifecycleCoordinator>) -> Self {
        Self {
            tasks: JoinSet::new(),
            store,
            coordinator,
            ledgers: Arc::new(Mutex::new(Default::default())),
        }
    }

    /// Binds a new worker connection to this server and spawns its session task.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn spawn<R, W>(&mut self, rx: OnoReceiver<R>, tx: OnoSender<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session = Session::new(
            rx,
            tx,
            self.store.clone(),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.ledgers),
        );

        self.tasks.spawn(session.run());
    }

    /// Waits for every spawned session to end.
    pub async fn run(&mut self) -> io::Result<()> {
        while let Some(res) = self.tasks.join_next().await {
            res??
        }

        Ok(())
    }

    /// Accepts workers on `listener` until the coordinator reaches `Stopped`, then drops
    /// the sessions that are still open.
    pub async fn serve(mut self, listener: TcpListener) -> io::Result<()> {
        let coordinator = Arc::clone(&self.coordinator);
        let mut stopped = pin!(coordinator.stopped());

        info!("serving workers on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("failed to set nodelay for {addr}: {e}");
                        }
                        debug!("accepted connection from {addr}");

                        let (rx, tx) = stream.into_split();
                        let (rx, tx) = comms::channel(rx, tx);
                        self.spawn(rx, tx);
                    }
                    Err(e) => warn!("failed to accept a connection: {e}"),
                },
                Some(res) = self.tasks.join_next() => match res {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("worker session failed: {e}"),
                    Err(e) => warn!("worker session panicked: {e}"),
                },
            }
        }

        if !self.tasks.is_empty() {
            debug!("closing {} open session(s)", self.tasks.len());
        }
        self.tasks.shutdown().await;
        Ok(())
    }
}
