//! Seams between the execution layer and the SSH library.
//!
//! [`Connector`] dials and authenticates; [`Transport`] is one live,
//! session-capable connection. The production implementation lives in
//! [`super::native`]; tests plug in scripted fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::Host;
use crate::Result;

/// One command to run in a fresh session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    /// Allocate a pseudo-terminal before running.
    pub pty: bool,
}

/// How the remote side ended a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteExit {
    /// The command reported an exit status.
    Code(u32),
    /// The command was killed by a signal.
    Signal(String),
    /// The channel closed without any exit report.
    Missing,
}

/// Everything a finished session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub exit: RemoteExit,
    /// stdout and stderr interleaved as received.
    pub output: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the underlying connection is known to be gone.
    fn is_closed(&self) -> bool;

    /// Open and close a trial session.
    async fn probe(&self) -> Result<()>;

    /// Run a command in a new session and wait for it to finish.
    ///
    /// Returns `Err` only when the session itself fails; a remote exit
    /// status of any value is a successful run.
    async fn run(&self, request: &CommandRequest) -> Result<RawOutput>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial and authenticate against `host`, giving up after `timeout`.
    async fn connect(&self, host: &Host, timeout: Duration) -> Result<Arc<dyn Transport>>;
}
