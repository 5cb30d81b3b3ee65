use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("No hosts selected")]
    NoHostsSelected,

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Dependency cycle detected among tasks: {}", .tasks.join(", "))]
    DependencyCycle { tasks: Vec<String> },

    #[error("Host {0} has neither a password nor a private key")]
    MissingAuth(String),

    #[error("Env file error for host {host}: {reason}")]
    EnvFile { host: String, reason: String },

    #[error("Failed to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication rejected for {0}")]
    AuthRejected(String),

    #[error("Connecting to {host} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        timeout: std::time::Duration,
    },

    #[error("Client for {0} is not connected")]
    NotConnected(String),

    #[error("Connection to {0} is closed")]
    ConnectionClosed(String),

    /// A failure while running a command that is not a remote exit status.
    /// `output` holds whatever was captured before the failure.
    #[error("Session error on {host}: {reason}")]
    Session {
        host: String,
        reason: String,
        output: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Errors raised before any network activity: bad selectors, bad task
    /// graphs, incomplete host records, unreadable config.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::TomlParse(_)
                | Error::NoHomeDir
                | Error::Validation(_)
                | Error::HostNotFound(_)
                | Error::NoHostsSelected
                | Error::TaskNotFound(_)
                | Error::DuplicateTask(_)
                | Error::UnknownDependency { .. }
                | Error::DependencyCycle { .. }
                | Error::MissingAuth(_)
                | Error::EnvFile { .. }
        )
    }

    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. }
                | Error::AuthRejected(_)
                | Error::ConnectTimeout { .. }
                | Error::NotConnected(_)
                | Error::ConnectionClosed(_)
                | Error::Session { .. }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Timeout(_))
    }

    /// Output captured before a session failure, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            Error::Session { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
