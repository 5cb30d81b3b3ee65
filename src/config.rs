use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{resolve, Host, Task};
use crate::orchestration::RetryPolicy;
use crate::ssh::PoolConfig;
use crate::{Error, Result};

fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub hosts: BTreeMap<String, Host>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_idle: usize,
    pub max_lifetime_secs: u64,
    pub idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            max_idle: defaults.max_idle,
            max_lifetime_secs: defaults.max_lifetime.as_secs(),
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
            cleanup_interval_secs: defaults.cleanup_interval.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            delay_secs: defaults.delay.as_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            pool: PoolSettings::default(),
            retry: RetrySettings::default(),
            hosts: BTreeMap::new(),
            tasks: Vec::new(),
        }
    }
}

impl Config {
    pub fn convoy_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".convoy"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::convoy_dir()?.join("convoy.toml"))
    }

    /// Load from `~/.convoy/convoy.toml`.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Validation(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        for (name, host) in config.hosts.iter_mut() {
            host.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        for (name, host) in &self.hosts {
            if host.name != *name {
                return Err(Error::Validation(format!(
                    "host entry {} carries mismatched name {}",
                    name, host.name
                )));
            }
            if host.username.is_empty() {
                return Err(Error::Validation(format!("host {} has no username", name)));
            }
            host.socket_target()?;
            host.auth_method()?;
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Validation("connect_timeout_secs must be positive".to_string()));
        }
        if self.pool.cleanup_interval_secs == 0 {
            return Err(Error::Validation(
                "pool.cleanup_interval_secs must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Validation("retry.max_attempts must be at least 1".to_string()));
        }
        resolve(&self.tasks)?;
        Ok(())
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle: self.pool.max_idle,
            max_lifetime: Duration::from_secs(self.pool.max_lifetime_secs),
            idle_timeout: Duration::from_secs(self.pool.idle_timeout_secs),
            cleanup_interval: Duration::from_secs(self.pool.cleanup_interval_secs),
            connect_timeout: self.connect_timeout(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            delay: Duration::from_secs(self.retry.delay_secs),
        }
    }
}
