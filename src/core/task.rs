//! Task data model.
//!
//! A task is a named shell command with optional ordering dependencies.
//! Tasks are immutable once handed to the resolver.

use serde::{Deserialize, Serialize};

fn default_expect() -> i32 {
    0
}

/// A single unit of remote work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique key within a run.
    pub name: String,
    /// Shell command; placeholders are already resolved.
    pub cmd: String,
    /// Working directory to `cd` into before running `cmd`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Exit code considered success.
    #[serde(default = "default_expect")]
    pub expect: i32,
    /// Text logged when the task succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Names of tasks that must run first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Library tasks are skipped unless explicitly included.
    #[serde(default)]
    pub lib: bool,
    /// Request a pseudo-terminal, for `sudo`-style password prompts.
    #[serde(default)]
    pub ask_pass: bool,
    /// Surface captured stdout/stderr in the log.
    #[serde(default)]
    pub output: bool,
    /// Transient failures may be retried by the runner.
    #[serde(default)]
    pub retry: bool,
}

impl Task {
    pub fn new(name: &str, cmd: &str) -> Self {
        Self {
            name: name.to_string(),
            cmd: cmd.to_string(),
            dir: None,
            expect: 0,
            message: None,
            depends_on: Vec::new(),
            lib: false,
            ask_pass: false,
            output: false,
            retry: false,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn in_dir(mut self, dir: &str) -> Self {
        self.dir = Some(dir.to_string());
        self
    }

    pub fn expecting(mut self, code: i32) -> Self {
        self.expect = code;
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn as_lib(mut self) -> Self {
        self.lib = true;
        self
    }

    pub fn with_ask_pass(mut self) -> Self {
        self.ask_pass = true;
        self
    }

    pub fn with_output(mut self) -> Self {
        self.output = true;
        self
    }

    pub fn with_retry(mut self) -> Self {
        self.retry = true;
        self
    }

    /// The command line actually sent to the remote shell.
    pub fn command_line(&self) -> String {
        match self.dir.as_deref() {
            Some(dir) if !dir.is_empty() => format!("cd {} && {}", dir, self.cmd),
            _ => self.cmd.clone(),
        }
    }

    /// Whether `code` counts as success for this task.
    pub fn is_success(&self, code: i32) -> bool {
        code == self.expect
    }
}
