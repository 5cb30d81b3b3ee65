//! Host records: where tasks run and how to authenticate there.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::expand_tilde;
use crate::{Error, Result};

/// Standard SSH port, used when the address carries none.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A target machine.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Identifier used for selection. Filled from the config map key.
    #[serde(default)]
    pub name: String,
    /// Address, optionally `address:port`.
    pub host: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Path to a private key file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Dotenv-style file with variables exported before every command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
}

/// How to authenticate against a host.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password(String),
    PrivateKey(PathBuf),
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => write!(f, "Password(***)"),
            AuthMethod::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}

impl Host {
    pub fn new(name: &str, host: &str, username: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            username: username.to_string(),
            password: None,
            private_key: None,
            env_file: None,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_private_key(mut self, path: &str) -> Self {
        self.private_key = Some(path.to_string());
        self
    }

    pub fn with_env_file(mut self, path: &str) -> Self {
        self.env_file = Some(path.to_string());
        self
    }

    /// Pool key: `username@address`.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// Split `host` into address and port.
    ///
    /// Accepts `name`, `name:port`, bare IPv6 and `[v6]:port`.
    pub fn socket_target(&self) -> Result<(String, u16)> {
        let raw = self.host.trim();
        if raw.is_empty() {
            return Err(Error::Validation(format!("host {} has an empty address", self.name)));
        }

        if let Some(rest) = raw.strip_prefix('[') {
            let (addr, tail) = rest.split_once(']').ok_or_else(|| {
                Error::Validation(format!("host {} has a malformed address: {}", self.name, raw))
            })?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(&self.name, port)?,
                None => DEFAULT_SSH_PORT,
            };
            return Ok((addr.to_string(), port));
        }

        match raw.split_once(':') {
            // More than one colon without brackets is a bare IPv6 address.
            Some((_, rest)) if rest.contains(':') => Ok((raw.to_string(), DEFAULT_SSH_PORT)),
            Some((addr, port)) => Ok((addr.to_string(), parse_port(&self.name, port)?)),
            None => Ok((raw.to_string(), DEFAULT_SSH_PORT)),
        }
    }

    /// Authentication to use. A private key takes precedence over a password.
    pub fn auth_method(&self) -> Result<AuthMethod> {
        if let Some(key) = self.private_key.as_deref().filter(|k| !k.is_empty()) {
            return Ok(AuthMethod::PrivateKey(expand_tilde(key)));
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            return Ok(AuthMethod::Password(password.to_string()));
        }
        Err(Error::MissingAuth(self.name.clone()))
    }

    /// Read the host's env file. No env file means no variables.
    // Deprecated in dotenv 0.15, but the only reader that leaves the
    // process environment alone.
    #[allow(deprecated)]
    pub fn load_env(&self) -> Result<Vec<(String, String)>> {
        let Some(path) = self.env_file.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(Vec::new());
        };
        let path = expand_tilde(path);

        let iter = dotenv::from_path_iter(&path).map_err(|e| Error::EnvFile {
            host: self.name.clone(),
            reason: format!("{}: {}", path.display(), e),
        })?;

        iter.map(|item| {
            item.map_err(|e| Error::EnvFile {
                host: self.name.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
    }
}

fn parse_port(host_name: &str, port: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| Error::Validation(format!("host {} has an invalid port: {}", host_name, port)))
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key)
            .field("env_file", &self.env_file)
            .finish()
    }
}
