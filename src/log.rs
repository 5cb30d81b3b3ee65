//! Log line emission for runs.
//!
//! Log levels:
//! - ERROR: Failures that abort a run (connection loss, cancellation)
//! - WARN: Recoverable problems (task exit-code mismatch, pool close failures)
//! - INFO: Run progress (connections, task start/success)
//! - DEBUG: Executed commands and pool decisions (only with `--debug`)
//! - TRACE: Raw captured output
//!
//! Every event is a single discrete line handed to a [`LogSink`]. The core
//! never writes to a global channel; callers inject the sink they want
//! (stdout, file, channel fan-out, memory for tests).
//!
//! Debug mode can be enabled with `--debug` flag or `CONVOY_DEBUG=1` env var.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

/// Log levels for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Level implied by the `--debug` flag and the `CONVOY_DEBUG` env var.
    pub fn for_debug(debug: bool) -> Self {
        let env_debug = std::env::var("CONVOY_DEBUG")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        if debug || env_debug {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

/// One emitted log event.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level.as_str(),
            self.message
        )
    }
}

/// Destination for log lines.
pub trait LogSink: Send + Sync {
    fn emit(&self, line: &LogLine);
}

/// Prints lines to the terminal. ERROR and WARN go to stderr.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn emit(&self, line: &LogLine) {
        if line.level <= LogLevel::Warn {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}

/// Appends lines to a file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Create a sink writing to `path`, truncating any previous content.
    pub fn create(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, "")?;
        Ok(Self { path })
    }

    /// Default log location: `~/.convoy/convoy.log`.
    pub fn default_path() -> crate::Result<PathBuf> {
        Ok(crate::config::Config::convoy_dir()?.join("convoy.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn emit(&self, line: &LogLine) {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Forwards lines over a channel to whoever fans them out.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<LogLine>) -> Self {
        Self { tx }
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, line: &LogLine) {
        // A dropped receiver means nobody is listening anymore.
        let _ = self.tx.send(line.clone());
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines().into_iter().map(|l| l.message).collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, line: &LogLine) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.clone()),
            Err(poisoned) => poisoned.into_inner().push(line.clone()),
        }
    }
}

/// Sink that forwards to several sinks in order.
pub struct TeeSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for TeeSink {
    fn emit(&self, line: &LogLine) {
        for sink in &self.sinks {
            sink.emit(line);
        }
    }
}

/// Level-filtering handle over a shared sink.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    level: LogLevel,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>, level: LogLevel) -> Self {
        Self { sink, level }
    }

    /// Terminal logger honouring `--debug` / `CONVOY_DEBUG`.
    pub fn stdout(debug: bool) -> Self {
        Self::new(Arc::new(StdoutSink), LogLevel::for_debug(debug))
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level <= self.level
    }

    /// Log a message at the specified level.
    pub fn log_at(&self, level: LogLevel, msg: impl Into<String>) {
        if !self.is_enabled(level) {
            return;
        }
        self.sink.emit(&LogLine::new(level, msg));
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Error, msg);
    }

    pub fn warn(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Warn, msg);
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Info, msg);
    }

    pub fn debug(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Debug, msg);
    }

    pub fn trace(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Trace, msg);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish()
    }
}
