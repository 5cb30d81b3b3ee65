pub mod client;
pub mod native;
pub mod pool;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ExecOutput, SshClient, NO_EXIT_CODE};
pub use native::RusshConnector;
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use transport::{CommandRequest, Connector, RawOutput, RemoteExit, Transport};
