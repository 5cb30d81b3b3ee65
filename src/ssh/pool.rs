//! Connection pool keyed by `username@address`.
//!
//! Each key maps to at most one cached connection. A connection is leased
//! by [`ConnectionPool::get_connection`] and handed back with
//! [`ConnectionPool::release_connection`]. A background loop evicts
//! entries that outlived `max_lifetime` or sat unleased past
//! `idle_timeout`.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::transport::{Connector, Transport};
use crate::core::Host;
use crate::log::Logger;
use crate::{Error, Result};

const DEFAULT_MAX_IDLE: usize = 5;
const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Reported in stats; eviction is driven by the two timeouts.
    pub max_idle: usize,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
    pub cleanup_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,
    pub max_idle: usize,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

#[derive(Debug)]
struct LeaseState {
    in_use: bool,
    last_used: Instant,
    /// Replaced in the map while leased; close once released.
    retired: bool,
}

/// A cached connection plus its lease bookkeeping.
pub struct PooledConnection {
    transport: Arc<dyn Transport>,
    host_key: String,
    created_at: Instant,
    state: Mutex<LeaseState>,
}

impl PooledConnection {
    fn leased(host_key: String, transport: Arc<dyn Transport>) -> Self {
        let now = Instant::now();
        Self {
            transport,
            host_key,
            created_at: now,
            state: Mutex::new(LeaseState {
                in_use: true,
                last_used: now,
                retired: false,
            }),
        }
    }

    pub fn host_key(&self) -> &str {
        &self.host_key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub async fn in_use(&self) -> bool {
        self.state.lock().await.in_use
    }

    pub async fn last_used(&self) -> Instant {
        self.state.lock().await.last_used
    }

    async fn try_lease(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.in_use || state.retired {
            return false;
        }
        state.in_use = true;
        state.last_used = Instant::now();
        true
    }

    async fn unlease(&self) {
        let mut state = self.state.lock().await;
        state.in_use = false;
        state.last_used = Instant::now();
    }

    async fn is_usable(&self) -> bool {
        !self.transport.is_closed() && self.transport.probe().await.is_ok()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("host_key", &self.host_key)
            .field("created_at", &self.created_at)
            .finish()
    }
}

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    connections: RwLock<HashMap<String, Arc<PooledConnection>>>,
    logger: Logger,
    shutdown: CancellationToken,
}

impl ConnectionPool {
    /// Build a pool without a cleanup loop. Call [`Self::cleanup`] by hand
    /// or use [`Self::start`].
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig, logger: Logger) -> Self {
        Self {
            connector,
            config,
            connections: RwLock::new(HashMap::new()),
            logger,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build a pool and spawn its cleanup loop. Needs a tokio runtime.
    pub fn start(connector: Arc<dyn Connector>, config: PoolConfig, logger: Logger) -> Arc<Self> {
        let pool = Arc::new(Self::new(connector, config, logger));
        spawn_cleanup_loop(Arc::downgrade(&pool), pool.shutdown.clone(), config.cleanup_interval);
        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Lease a connection to `host`, reusing the cached one when it is
    /// free and answers a probe. Otherwise dial a new one and replace
    /// the cached entry.
    pub async fn get_connection(
        &self,
        host: &Host,
        debug: bool,
        cancel: &CancellationToken,
    ) -> Result<Arc<PooledConnection>> {
        let key = host.identity();

        let cached = self.connections.read().await.get(&key).cloned();
        if let Some(conn) = cached {
            if conn.try_lease().await {
                if conn.is_usable().await {
                    if debug {
                        self.logger.debug(format!("[pool] reusing connection to {}", key));
                    }
                    return Ok(conn);
                }
                conn.unlease().await;
                if debug {
                    self.logger
                        .debug(format!("[pool] cached connection to {} is dead, reconnecting", key));
                }
            } else if debug {
                self.logger
                    .debug(format!("[pool] cached connection to {} is busy, dialing another", key));
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let transport = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.connector.connect(host, self.config.connect_timeout) => result?,
        };
        if debug {
            self.logger.debug(format!("[pool] opened connection to {}", key));
        }

        let conn = Arc::new(PooledConnection::leased(key.clone(), transport));
        let previous = self.connections.write().await.insert(key, conn.clone());
        if let Some(previous) = previous {
            self.retire(previous).await;
        }
        Ok(conn)
    }

    /// Hand a leased connection back. `None` is a no-op.
    pub async fn release_connection(&self, conn: Option<&PooledConnection>) {
        let Some(conn) = conn else {
            return;
        };
        let close_now = {
            let mut state = conn.state.lock().await;
            state.in_use = false;
            state.last_used = Instant::now();
            std::mem::take(&mut state.retired)
        };
        if close_now {
            self.close_in_background(conn.host_key.clone(), conn.transport());
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let connections = self.connections.read().await;
        let mut in_use = 0;
        for conn in connections.values() {
            if conn.state.lock().await.in_use {
                in_use += 1;
            }
        }
        PoolStats {
            total: connections.len(),
            in_use,
            idle: connections.len() - in_use,
            max_idle: self.config.max_idle,
            max_lifetime: self.config.max_lifetime,
            idle_timeout: self.config.idle_timeout,
        }
    }

    /// Evict expired entries and return how many were removed.
    ///
    /// Lifetime expiry applies whether or not the entry is leased, but a
    /// leased transport is only retired and stays open until released.
    /// Idle expiry only applies to unleased entries.
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut connections = self.connections.write().await;

        let mut expired = Vec::new();
        for (key, conn) in connections.iter() {
            let state = conn.state.lock().await;
            if now.saturating_duration_since(conn.created_at) > self.config.max_lifetime {
                expired.push((key.clone(), "max lifetime reached"));
            } else if !state.in_use
                && now.saturating_duration_since(state.last_used) > self.config.idle_timeout
            {
                expired.push((key.clone(), "idle timeout"));
            }
        }

        for (key, reason) in &expired {
            if let Some(conn) = connections.remove(key) {
                self.logger
                    .debug(format!("[pool] evicting connection to {} ({})", key, reason));
                self.retire(conn).await;
            }
        }
        expired.len()
    }

    /// Stop the cleanup loop and close every cached connection.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        let closes = drained.into_iter().map(|(key, conn)| {
            let logger = self.logger.clone();
            async move {
                if let Err(e) = conn.transport.close().await {
                    logger.warn(format!("[pool] failed to close connection to {}: {}", key, e));
                }
            }
        });
        join_all(closes).await;
    }

    async fn retire(&self, previous: Arc<PooledConnection>) {
        let close_now = {
            let mut state = previous.state.lock().await;
            if state.in_use {
                state.retired = true;
                false
            } else {
                true
            }
        };
        if close_now {
            self.close_in_background(previous.host_key.clone(), previous.transport());
        }
    }

    fn close_in_background(&self, key: String, transport: Arc<dyn Transport>) {
        let logger = self.logger.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.close().await {
                logger.warn(format!("[pool] failed to close connection to {}: {}", key, e));
            }
        });
    }
}

fn spawn_cleanup_loop(pool: Weak<ConnectionPool>, shutdown: CancellationToken, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let Some(pool) = pool.upgrade() else {
                        break;
                    };
                    let evicted = pool.cleanup().await;
                    if evicted > 0 {
                        pool.logger.debug(format!("[pool] cleanup evicted {} connections", evicted));
                    }
                }
            }
        }
    });
}
