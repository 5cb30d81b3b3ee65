//! In-process connector and transport for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{CommandRequest, Connector, RawOutput, RemoteExit, Transport};
use crate::core::Host;
use crate::{Error, Result};

pub type Responder = Arc<dyn Fn(&CommandRequest) -> Result<RawOutput> + Send + Sync>;

pub fn exit_with(code: u32, output: &str) -> Result<RawOutput> {
    Ok(RawOutput {
        exit: RemoteExit::Code(code),
        output: output.to_string(),
    })
}

pub fn always(code: u32, output: &'static str) -> Responder {
    Arc::new(move |_| exit_with(code, output))
}

pub struct FakeTransport {
    pub id: usize,
    responder: Responder,
    delay: Duration,
    closed: AtomicBool,
    probe_fails: AtomicBool,
    pub close_calls: AtomicUsize,
    pub requests: Mutex<Vec<CommandRequest>>,
}

impl FakeTransport {
    pub fn new(id: usize, responder: Responder) -> Self {
        Self {
            id,
            responder,
            delay: Duration::ZERO,
            closed: AtomicBool::new(false),
            probe_fails: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Simulate the peer dropping the connection.
    pub fn drop_connection(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn fail_probes(&self) {
        self.probe_fails.store(true, Ordering::SeqCst);
    }

    pub fn closes(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.command.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn probe(&self) -> Result<()> {
        if self.probe_fails.load(Ordering::SeqCst) {
            return Err(Error::Session {
                host: format!("fake-{}", self.id),
                reason: "probe refused".to_string(),
                output: String::new(),
            });
        }
        Ok(())
    }

    async fn run(&self, request: &CommandRequest) -> Result<RawOutput> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(request)
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out a fresh [`FakeTransport`] per dial and remembers each one.
pub struct FakeConnector {
    responder: Responder,
    delay: Duration,
    refuse: AtomicBool,
    pub dialed: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeConnector {
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            delay: Duration::ZERO,
            refuse: AtomicBool::new(false),
            dialed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn refuse_all(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn dial_count(&self) -> usize {
        self.dialed.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.dialed.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, host: &Host, _timeout: Duration) -> Result<Arc<dyn Transport>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Connection {
                host: host.identity(),
                reason: "connection refused".to_string(),
            });
        }
        let mut dialed = self.dialed.lock().unwrap();
        let transport = Arc::new(
            FakeTransport::new(dialed.len(), self.responder.clone()).with_delay(self.delay),
        );
        dialed.push(transport.clone());
        Ok(transport)
    }
}
