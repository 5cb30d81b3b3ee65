//! Remote execution against one host.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::transport::{CommandRequest, Connector, RawOutput, RemoteExit, Transport};
use crate::core::{Host, Task};
use crate::log::Logger;
use crate::util::shell_quote;
use crate::{Error, Result};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit code recorded when a command never produced one.
pub const NO_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: String,
}

/// Runs tasks on a single host.
///
/// A client either dials its own connection through [`SshClient::connect`]
/// or borrows one from a pool through [`SshClient::attach`]. Only an owned
/// connection is closed by [`SshClient::close`].
pub struct SshClient {
    host: Host,
    identity: String,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    env: Vec<(String, String)>,
    transport: Option<Arc<dyn Transport>>,
    owns_transport: bool,
    logger: Logger,
}

impl SshClient {
    /// Build an unconnected client. Reads the host's env file.
    pub fn new(host: &Host, connector: Arc<dyn Connector>, logger: Logger) -> Result<Self> {
        let env = host.load_env()?;
        Ok(Self {
            host: host.clone(),
            identity: host.identity(),
            connector,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            env,
            transport: None,
            owns_transport: false,
            logger,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| !t.is_closed())
    }

    /// Dial and authenticate. A live connection is kept as is.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.detach_or_close().await;

        let transport = self.connector.connect(&self.host, self.connect_timeout).await?;
        self.logger
            .debug(format!("[{}] connected to {}", self.host.name, self.identity));
        self.transport = Some(transport);
        self.owns_transport = true;
        Ok(())
    }

    /// Use a connection owned by someone else, typically a pool lease.
    pub async fn attach(&mut self, transport: Arc<dyn Transport>) {
        self.detach_or_close().await;
        self.transport = Some(transport);
        self.owns_transport = false;
    }

    /// Forget a borrowed connection without closing it.
    pub fn detach(&mut self) {
        if !self.owns_transport {
            self.transport = None;
        }
    }

    /// Close an owned connection. Closing an unset client is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(transport) = self.transport.take() else {
            return Ok(());
        };
        if std::mem::take(&mut self.owns_transport) {
            transport.close().await?;
        }
        Ok(())
    }

    /// Full command line sent to the remote shell.
    pub fn remote_command(&self, task: &Task) -> String {
        let command = task.command_line();
        if self.env.is_empty() {
            return command;
        }
        let exports: Vec<String> = self
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, shell_quote(value)))
            .collect();
        format!("export {}; {}", exports.join(" "), command)
    }

    /// Run `task` and wait for it.
    pub async fn exec(&self, task: &Task, debug: bool) -> Result<ExecOutput> {
        let transport = self.live_transport()?;
        let request = self.request_for(task, debug);
        let raw = transport.run(&request).await?;
        self.interpret(raw)
    }

    /// Run `task`, returning [`Error::Cancelled`] as soon as `cancel` fires.
    ///
    /// The remote command is not interrupted; its session is left to
    /// finish in the background.
    pub async fn exec_with_cancel(
        &self,
        task: &Task,
        debug: bool,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.exec_detached(task, debug, async {
            cancel.cancelled().await;
            Error::Cancelled
        })
        .await
    }

    /// Run `task`, returning [`Error::Timeout`] once `timeout` elapses.
    pub async fn exec_with_timeout(
        &self,
        task: &Task,
        debug: bool,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        self.exec_detached(task, debug, async move {
            tokio::time::sleep(timeout).await;
            Error::Timeout(timeout)
        })
        .await
    }

    async fn exec_detached<F>(&self, task: &Task, debug: bool, stop: F) -> Result<ExecOutput>
    where
        F: Future<Output = Error>,
    {
        let transport = self.live_transport()?.clone();
        let request = self.request_for(task, debug);
        let worker = tokio::spawn(async move { transport.run(&request).await });

        tokio::select! {
            err = stop => Err(err),
            joined = worker => {
                let raw = joined.map_err(|e| Error::TaskJoin(e.to_string()))??;
                self.interpret(raw)
            }
        }
    }

    fn live_transport(&self) -> Result<&Arc<dyn Transport>> {
        match &self.transport {
            None => Err(Error::NotConnected(self.identity.clone())),
            Some(t) if t.is_closed() => Err(Error::ConnectionClosed(self.identity.clone())),
            Some(t) => Ok(t),
        }
    }

    fn request_for(&self, task: &Task, debug: bool) -> CommandRequest {
        if debug {
            self.logger
                .debug(format!("[{}] $ {}", self.host.name, task.command_line()));
        }
        CommandRequest {
            command: self.remote_command(task),
            pty: task.ask_pass,
        }
    }

    fn interpret(&self, raw: RawOutput) -> Result<ExecOutput> {
        let reason = match raw.exit {
            RemoteExit::Code(code) => {
                return Ok(ExecOutput {
                    exit_code: i32::try_from(code).unwrap_or(i32::MAX),
                    output: raw.output,
                })
            }
            RemoteExit::Signal(signal) => format!("command killed by signal {}", signal),
            RemoteExit::Missing => "command ended without an exit status".to_string(),
        };
        Err(Error::Session {
            host: self.identity.clone(),
            reason,
            output: raw.output,
        })
    }

    async fn detach_or_close(&mut self) {
        if let Err(e) = self.close().await {
            self.logger.warn(format!(
                "[{}] failed to close stale connection: {}",
                self.host.name, e
            ));
        }
    }
}
