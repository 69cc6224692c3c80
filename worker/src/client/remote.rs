use std::{collections::BTreeMap, net::SocketAddr};

use comms::{
    OnoReceiver, OnoSender,
    msg::{BlockMeta, Command, DeltaMeta, Msg, Payload},
};
use log::{debug, info};
use parameter_server::BlockValue;
use tokio::net::{
    TcpStream,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use super::{ClientErr, ParameterClient, Params, Pushed};

type Connection = (OnoReceiver<OwnedReadHalf>, OnoSender<OwnedWriteHalf>);

/// A client talking to the parameter server over TCP.
///
/// The connection is opened lazily and dropped on any io failure, the next request
/// reconnects.
pub struct RemoteClient {
    addr: SocketAddr,
    task_index: usize,
    incarnation: u64,
    conn: Option<Connection>,
    buf: Vec<u32>,
}

impl RemoteClient {
    /// Creates a new `RemoteClient`.
    ///
    /// # Arguments
    /// * `addr` - The parameter server address.
    /// * `task_index` - The worker's task index, sent on every connect.
    pub fn new(addr: SocketAddr, task_index: usize) -> Self {
        Self {
            addr,
            task_index,
            incarnation: rand::random(),
            conn: None,
            buf: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Opens the connection and announces the worker, does nothing if already connected.
    pub async fn connect(&mut self) -> Result<(), ClientErr> {
        if self.conn.is_none() {
            let stream = TcpStream::connect(self.addr).await?;
            stream.set_nodelay(true)?;

            let (rx, tx) = stream.into_split();
            let (rx, mut tx) = comms::channel(rx, tx);

            let msg = Msg::Control(Command::Connect {
                task_index: self.task_index,
                incarnation: self.incarnation,
            });
            tx.send(&msg).await?;

            info!(task_index = self.task_index; "connected to parameter server at {}", self.addr);
            self.conn = Some((rx, tx));
        }

        Ok(())
    }

    /// Drops the connection after an io failure so the next request starts afresh.
    fn check<T>(&mut self, res: Result<T, ClientErr>) -> Result<T, ClientErr> {
        if let Err(e) = &res {
            if e.is_transient() {
                debug!(task_index = self.task_index; "dropping connection: {e}");
                self.conn = None;
            }
        }

        res
    }

    async fn try_pull(&mut self, ids: &[String]) -> Result<Params, ClientErr> {
        self.connect().await?;
        let Some((rx, tx)) = self.conn.as_mut() else {
            return Err(ClientErr::Protocol("not connected".into()));
        };

        let msg = Msg::Control(Command::Pull { ids: ids.to_vec() });
        tx.send(&msg).await?;

        match rx.recv_into(&mut self.buf).await? {
            Msg::Data(Payload::Blocks { meta, values }) => split_blocks(meta, values),
            Msg::Control(Command::Stop) => Err(ClientErr::Stopping),
            Msg::Err(e) => Err(e.into()),
            other => Err(ClientErr::unexpected(other.kind())),
        }
    }

    async fn try_push(&mut self, meta: DeltaMeta, delta: &[f32]) -> Result<Pushed, ClientErr> {
        self.connect().await?;
        let Some((rx, tx)) = self.conn.as_mut() else {
            return Err(ClientErr::Protocol("not connected".into()));
        };

        tx.send(&Msg::Data(Payload::Delta { meta, delta })).await?;

        match rx.recv_into(&mut self.buf).await? {
            Msg::Control(Command::Pushed { version, stop }) => Ok(Pushed { version, stop }),
            Msg::Control(Command::Stop) => Err(ClientErr::Stopping),
            Msg::Err(e) => Err(e.into()),
            other => Err(ClientErr::unexpected(other.kind())),
        }
    }
}

fn split_blocks(meta: Vec<BlockMeta>, values: &[f32]) -> Result<Params, ClientErr> {
    let mut params = BTreeMap::new();
    let mut offset = 0;

    for BlockMeta { id, version, len } in meta {
        let Some(slice) = values.get(offset..offset + len) else {
            return Err(ClientErr::Protocol(format!("block {id:?} exceeds the received values")));
        };

        offset += len;
        params.insert(id, BlockValue::new(slice, version));
    }

    Ok(params)
}

impl ParameterClient for RemoteClient {
    async fn pull(&mut self, ids: &[String]) -> Result<Params, ClientErr> {
        let res = self.try_pull(ids).await;
        self.check(res)
    }

    async fn push(
        &mut self,
        id: &str,
        delta: &[f32],
        base_version: u64,
        seq: u64,
    ) -> Result<Pushed, ClientErr> {
        let meta = DeltaMeta {
            id: id.to_string(),
            base_version,
            seq,
        };

        let res = self.try_push(meta, delta).await;
        self.check(res)
    }

    async fn disconnect(&mut self) -> Result<(), ClientErr> {
        let Some((mut rx, mut tx)) = self.conn.take() else {
            return Ok(());
        };

        tx.send(&Msg::Control(Command::Disconnect)).await?;

        loop {
            match rx.recv_into(&mut self.buf).await? {
                Msg::Control(Command::Disconnect) => break,
                other => debug!("discarding {} message while disconnecting", other.kind()),
            }
        }

        tx.shutdown().await?;
        Ok(())
    }
}
