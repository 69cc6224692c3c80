//! Access to the `ParameterStore`, over the network or in process.

mod error;
mod local;
mod remote;

use std::collections::BTreeMap;

pub use error::ClientErr;
pub use local::LocalClient;
use parameter_server::BlockValue;
pub use remote::RemoteClient;

/// Pulled blocks by identifier.
pub type Params = BTreeMap<String, BlockValue>;

/// The answer to an accepted push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pushed {
    /// The version of the block after the update.
    pub version: u64,
    /// Set once the parameter server started stopping.
    pub stop: bool,
}

/// Reads and updates the shared parameters on behalf of one worker.
#[trait_variant::make(ParameterClient: Send)]
pub trait ParameterClientTemplate {
    /// Should read the committed value and version of every block in `ids`.
    ///
    /// # Arguments
    /// * `ids` - The block identifiers.
    ///
    /// # Returns
    /// The blocks, `Stopping` once the parameter server stops serving, or another error.
    async fn pull(&mut self, ids: &[String]) -> Result<Params, ClientErr>;

    /// Should add `delta` into the block `id`.
    ///
    /// # Arguments
    /// * `id` - The block identifier.
    /// * `delta` - The update, as long as the block.
    /// * `base_version` - The version the delta was computed against.
    /// * `seq` - Increases with every new push of this worker, repeated on retries.
    ///
    /// # Returns
    /// The new version, or an error if the update wasn't applied.
    async fn push(
        &mut self,
        id: &str,
        delta: &[f32],
        base_version: u64,
        seq: u64,
    ) -> Result<Pushed, ClientErr>;

    /// Should release the connection, if any.
    async fn disconnect(&mut self) -> Result<(), ClientErr>;
}
