mod ledger;
mod pserver;
mod session;

pub use pserver::ParameterServer;
