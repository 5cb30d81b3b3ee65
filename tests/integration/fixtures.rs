//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted SSH connector whose hosts answer per command
//! - A journal of every command each host received, in order
//! - Loggers that capture lines in memory

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use convoy::config::Config;
use convoy::core::Host;
use convoy::log::{LogLevel, Logger, MemorySink};
use convoy::ssh::{CommandRequest, Connector, RawOutput, RemoteExit, Transport};
use convoy::{Error, Result};

/// How a scripted host answers a command.
#[derive(Debug, Clone)]
pub enum Reply {
    Exit(u32, &'static str),
    /// Killed by a signal, so no exit code.
    Killed,
    /// Never finishes.
    Hang,
    /// Killed for the first `n` calls, then exits 0.
    FailTimes(usize),
}

/// A command as a host saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub host: String,
    pub command: String,
    pub pty: bool,
}

#[derive(Default)]
struct Script {
    by_command: HashMap<String, Reply>,
    by_host: HashMap<(String, String), Reply>,
}

impl Script {
    /// Per-host replies win over shared ones. A script key matches the
    /// whole command or its last word group, so `make` matches
    /// `cd /srv && make` and `export A=1; make`.
    fn reply_for(&self, host: &str, command: &str) -> Reply {
        let matches = |cmd: &str| command == cmd || command.ends_with(&format!(" {}", cmd));
        let per_host = self
            .by_host
            .iter()
            .find(|((h, cmd), _)| h == host && matches(cmd.as_str()))
            .map(|(_, reply)| reply);
        let shared = || {
            self.by_command
                .iter()
                .find(|(cmd, _)| matches(cmd.as_str()))
                .map(|(_, reply)| reply)
        };
        per_host.or_else(shared).cloned().unwrap_or(Reply::Exit(0, ""))
    }
}

/// In-process stand-in for an SSH fleet.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<Script>,
    unreachable: Mutex<HashSet<String>>,
    journal: Arc<Mutex<Vec<Call>>>,
    dials: AtomicUsize,
    closes: Arc<AtomicUsize>,
    transports: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, command: &str, reply: Reply) {
        self.script
            .lock()
            .unwrap()
            .by_command
            .insert(command.to_string(), reply);
    }

    pub fn reply_on(&self, host: &str, command: &str, reply: Reply) {
        self.script
            .lock()
            .unwrap()
            .by_host
            .insert((host.to_string(), command.to_string()), reply);
    }

    pub fn make_unreachable(&self, host: &str) {
        self.unreachable.lock().unwrap().insert(host.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.journal.lock().unwrap().clone()
    }

    /// `(host, command)` pairs in the order they ran.
    pub fn ran(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .map(|c| (c.host, c.command))
            .collect()
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Drop every open connection as if the network went away.
    pub fn sever_all(&self) {
        for transport in self.transports.lock().unwrap().iter() {
            transport.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, host: &Host, _timeout: Duration) -> Result<Arc<dyn Transport>> {
        host.auth_method()?;
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().unwrap().contains(&host.name) {
            return Err(Error::Connection {
                host: host.identity(),
                reason: "no route to host".to_string(),
            });
        }
        let transport = Arc::new(ScriptedTransport {
            host: host.name.clone(),
            replies: self.script.lock().unwrap().snapshot(),
            journal: self.journal.clone(),
            closed: AtomicBool::new(false),
            closes: self.closes.clone(),
        });
        self.transports.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

impl Script {
    fn snapshot(&self) -> Arc<Script> {
        Arc::new(Script {
            by_command: self.by_command.clone(),
            by_host: self.by_host.clone(),
        })
    }
}

pub struct ScriptedTransport {
    host: String,
    replies: Arc<Script>,
    journal: Arc<Mutex<Vec<Call>>>,
    closed: AtomicBool,
    closes: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    fn previous_calls(&self, command: &str) -> usize {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.host == self.host && c.command == command)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, request: &CommandRequest) -> Result<RawOutput> {
        let earlier = self.previous_calls(&request.command);
        self.journal.lock().unwrap().push(Call {
            host: self.host.clone(),
            command: request.command.clone(),
            pty: request.pty,
        });

        match self.replies.reply_for(&self.host, &request.command) {
            Reply::Exit(code, output) => Ok(RawOutput {
                exit: RemoteExit::Code(code),
                output: output.to_string(),
            }),
            Reply::Killed => Ok(RawOutput {
                exit: RemoteExit::Signal("KILL".to_string()),
                output: String::new(),
            }),
            Reply::Hang => std::future::pending().await,
            Reply::FailTimes(n) if earlier < n => Ok(RawOutput {
                exit: RemoteExit::Signal("TERM".to_string()),
                output: String::new(),
            }),
            Reply::FailTimes(_) => Ok(RawOutput {
                exit: RemoteExit::Code(0),
                output: String::new(),
            }),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn memory_logger() -> (Logger, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Logger::new(sink.clone(), LogLevel::Debug), sink)
}

/// A three-host fleet with a small build pipeline.
pub const FLEET: &str = r#"
    connect_timeout_secs = 5

    [retry]
    max_attempts = 2
    delay_secs = 1

    [hosts.web1]
    host = "10.0.0.11"
    username = "deploy"
    password = "pw"

    [hosts.web2]
    host = "10.0.0.12"
    username = "deploy"
    password = "pw"

    [hosts.db]
    host = "10.0.0.20:2222"
    username = "postgres"
    private_key = "/keys/db_ed25519"

    [[tasks]]
    name = "deploy"
    cmd = "./deploy.sh"
    dir = "/srv/app"
    depends_on = ["build"]
    message = "deployed"

    [[tasks]]
    name = "fetch"
    cmd = "git pull"

    [[tasks]]
    name = "build"
    cmd = "make"
    depends_on = ["fetch"]

    [[tasks]]
    name = "seed"
    cmd = "./seed.sh"
    lib = true
"#;

pub fn fleet() -> Config {
    Config::from_toml_str(FLEET).unwrap()
}
