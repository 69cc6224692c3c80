use parameter_server::ParameterStore;
use tokio_util::sync::CancellationToken;

use super::{ClientErr, ParameterClient, Params, Pushed};

/// A client sharing the process with the `ParameterStore`.
#[derive(Debug, Clone)]
pub struct LocalClient {
    store: ParameterStore,
    stop: CancellationToken,
}

impl LocalClient {
    /// Creates a new `LocalClient`.
    ///
    /// # Arguments
    /// * `store` - The shared store.
    /// * `stop` - Answers pulls with `Stopping` once cancelled, like the remote service.
    pub fn new(store: ParameterStore, stop: CancellationToken) -> Self {
        Self { store, stop }
    }
}

impl ParameterClient for LocalClient {
    async fn pull(&mut self, ids: &[String]) -> Result<Params, ClientErr> {
        if self.stop.is_cancelled() {
            return Err(ClientErr::Stopping);
        }

        Ok(self.store.pull(ids)?)
    }

    async fn push(
        &mut self,
        id: &str,
        delta: &[f32],
        base_version: u64,
        _seq: u64,
    ) -> Result<Pushed, ClientErr> {
        let version = self.store.push(id, delta, base_version)?;

        Ok(Pushed {
            version,
            stop: self.stop.is_cancelled(),
        })
    }

    async fn disconnect(&mut self) -> Result<(), ClientErr> {
        Ok(())
    }
}
