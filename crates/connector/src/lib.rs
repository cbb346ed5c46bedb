//! The contract between a worker (running the container driver) and the control plane
//! that owns durable run state, plus its two implementations.

mod connector;
mod direct;
mod error;
mod remote;
mod store;
pub mod types;

pub use connector::{batch_log_until_exit, timestamped, Connector};
pub use direct::DirectConnector;
pub use error::ConnectorError;
pub use remote::RemoteConnector;
pub use store::memory::{InMemoryObjectStore, InMemoryRunStore, RunSeed};
pub use store::{ObjectStore, RunStore};
pub use types::RunInfo;
