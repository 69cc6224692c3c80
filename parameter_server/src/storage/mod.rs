mod block;
mod error;
mod store;

pub use block::BlockValue;
pub use error::{Result, StoreErr};
pub use store::ParameterStore;
