//! russh-backed connector and transport.
//!
//! Host keys are accepted without verification. Callers that need pinning
//! must provide their own [`Connector`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ::russh::client::{self, Handle};
use ::russh::{ChannelMsg, Disconnect};
use async_trait::async_trait;
use russh_keys::key;

use super::transport::{CommandRequest, Connector, RawOutput, RemoteExit, Transport};
use crate::core::{AuthMethod, Host};
use crate::util::blocking;
use crate::{Error, Result};

const PTY_TERM: &str = "xterm";
const PTY_COLUMNS: u32 = 80;
const PTY_ROWS: u32 = 24;

/// Client handler that trusts every server key.
pub struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = ::russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Dials hosts with russh.
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl RusshConnector {
    pub fn new() -> Self {
        Self {
            config: Arc::new(client::Config::default()),
        }
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, host: &Host, timeout: Duration) -> Result<Arc<dyn Transport>> {
        let identity = host.identity();
        let auth = host.auth_method()?;
        let target = host.socket_target()?;

        let handle = tokio::time::timeout(
            timeout,
            establish(self.config.clone(), target, &host.username, auth, &identity),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            host: identity.clone(),
            timeout,
        })??;

        Ok(Arc::new(RusshTransport { handle, identity }))
    }
}

async fn establish(
    config: Arc<client::Config>,
    (address, port): (String, u16),
    username: &str,
    auth: AuthMethod,
    identity: &str,
) -> Result<Handle<AcceptAnyHostKey>> {
    let connection_error = |e: ::russh::Error| Error::Connection {
        host: identity.to_string(),
        reason: e.to_string(),
    };

    let mut handle = client::connect(config, (address.as_str(), port), AcceptAnyHostKey)
        .await
        .map_err(connection_error)?;

    let authenticated = match auth {
        AuthMethod::Password(password) => handle
            .authenticate_password(username, password)
            .await
            .map_err(connection_error)?,
        AuthMethod::PrivateKey(path) => {
            let key_pair = load_key(path, identity).await?;
            handle
                .authenticate_publickey(username, Arc::new(key_pair))
                .await
                .map_err(connection_error)?
        }
    };

    if !authenticated {
        return Err(Error::AuthRejected(identity.to_string()));
    }
    Ok(handle)
}

async fn load_key(path: PathBuf, identity: &str) -> Result<key::KeyPair> {
    let identity = identity.to_string();
    blocking(move || {
        russh_keys::load_secret_key(&path, None).map_err(|e| Error::Connection {
            host: identity,
            reason: format!("cannot load private key {}: {}", path.display(), e),
        })
    })
    .await
}

/// An authenticated russh connection.
pub struct RusshTransport {
    handle: Handle<AcceptAnyHostKey>,
    identity: String,
}

impl RusshTransport {
    fn session_error(&self, e: ::russh::Error, output: &[u8]) -> Error {
        Error::Session {
            host: self.identity.clone(),
            reason: e.to_string(),
            output: String::from_utf8_lossy(output).into_owned(),
        }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn probe(&self) -> Result<()> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.session_error(e, &[]))?;
        let _ = channel.close().await;
        Ok(())
    }

    async fn run(&self, request: &CommandRequest) -> Result<RawOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.session_error(e, &[]))?;

        if request.pty {
            channel
                .request_pty(true, PTY_TERM, PTY_COLUMNS, PTY_ROWS, 0, 0, &[])
                .await
                .map_err(|e| self.session_error(e, &[]))?;
        }

        channel
            .exec(true, request.command.as_str())
            .await
            .map_err(|e| self.session_error(e, &[]))?;

        let mut output: Vec<u8> = Vec::new();
        let mut exit = RemoteExit::Missing;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, .. } => output.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => exit = RemoteExit::Code(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    exit = RemoteExit::Signal(format!("{:?}", signal_name))
                }
                _ => {}
            }
        }

        Ok(RawOutput {
            exit,
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }

    async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| self.session_error(e, &[]))
    }
}
