//! Run orchestration: select, resolve, connect, execute, tear down.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::selector::{select_hosts, select_tasks};
use crate::config::Config;
use crate::core::{Host, Task};
use crate::log::{LogLevel, Logger};
use crate::ssh::{ConnectionPool, Connector, PooledConnection, SshClient, NO_EXIT_CODE};
use crate::{Error, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How often a `retry = true` task is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    fn attempts_for(&self, task: &Task) -> u32 {
        if task.retry {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Run only this task and its dependencies.
    pub task: Option<String>,
    pub include_lib: bool,
    pub debug: bool,
    /// Lease connections from a pool instead of dialing directly.
    pub use_pool: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    /// The command ran but exited with an unexpected code.
    Mismatch,
    /// The session failed before an exit code was reported.
    TransportError,
}

/// Result of one task on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub task: String,
    pub host: String,
    pub status: OutcomeStatus,
    pub exit_code: i32,
    pub expected: i32,
    pub output: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub hosts: Vec<String>,
    pub tasks: Vec<String>,
    pub outcomes: Vec<TaskOutcome>,
}

impl RunReport {
    fn begin() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            hosts: Vec::new(),
            tasks: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> Vec<&TaskOutcome> {
        self.outcomes.iter().filter(|o| o.is_success()).collect()
    }

    pub fn failed(&self) -> Vec<&TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::is_success)
    }
}

/// One connected host for the duration of a run.
struct HostSession {
    client: SshClient,
    lease: Option<Arc<PooledConnection>>,
}

impl HostSession {
    fn name(&self) -> &str {
        &self.client.host().name
    }
}

/// A task attempt loop's verdict. `fatal` aborts the run after `outcome`
/// is recorded.
struct Executed {
    outcome: TaskOutcome,
    fatal: Option<Error>,
}

pub struct Runner {
    config: Config,
    connector: Arc<dyn Connector>,
    logger: Logger,
    pool: Option<Arc<ConnectionPool>>,
    retry: RetryPolicy,
}

impl Runner {
    pub fn new(config: Config, connector: Arc<dyn Connector>, logger: Logger) -> Self {
        let retry = config.retry_policy();
        Self {
            config,
            connector,
            logger,
            pool: None,
            retry,
        }
    }

    /// Share an existing pool. Without one, pooled runs get a private pool
    /// that is closed when the run ends.
    pub fn with_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve the tasks a run would execute, without connecting anywhere.
    pub fn plan(&self, options: &RunOptions) -> Result<Vec<Task>> {
        select_tasks(&self.config, options.task.as_deref(), options.include_lib)
    }

    /// Run the selected tasks on the selected hosts.
    ///
    /// Exit-code mismatches are reported in the returned [`RunReport`].
    /// Configuration problems, connection failures and cancellation are
    /// returned as errors; every connection opened so far is released
    /// first.
    pub async fn run(
        &self,
        selector: Option<&str>,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let hosts = select_hosts(&self.config, selector)?;
        for host in &hosts {
            host.auth_method()?;
        }
        let tasks = self.plan(options)?;

        let mut report = RunReport::begin();
        report.hosts = hosts.iter().map(|h| h.name.clone()).collect();
        report.tasks = tasks.iter().map(|t| t.name.clone()).collect();
        self.logger.info(format!(
            "Run {}: {} task(s) on {} host(s)",
            report.run_id,
            tasks.len(),
            hosts.len()
        ));

        let (pool, private_pool) = match (&self.pool, options.use_pool) {
            (_, false) => (None, false),
            (Some(pool), true) => (Some(pool.clone()), false),
            (None, true) => {
                let pool = ConnectionPool::start(
                    self.connector.clone(),
                    self.config.pool_config(),
                    self.logger.clone(),
                );
                (Some(pool), true)
            }
        };

        let mut sessions = Vec::with_capacity(hosts.len());
        let result = self
            .drive(&hosts, &tasks, options, pool.as_deref(), cancel, &mut sessions, &mut report)
            .await;

        for session in sessions {
            self.finish(session, pool.as_deref()).await;
        }
        if let (Some(pool), true) = (&pool, private_pool) {
            pool.close().await;
        }

        report.finished_at = Utc::now();
        match result {
            Ok(()) => {
                self.logger.info(format!(
                    "Run {} finished: {} succeeded, {} failed",
                    report.run_id,
                    report.succeeded().len(),
                    report.failed().len()
                ));
                Ok(report)
            }
            Err(e) => {
                self.logger.error(format!("Run {} aborted: {}", report.run_id, e));
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        hosts: &[&Host],
        tasks: &[Task],
        options: &RunOptions,
        pool: Option<&ConnectionPool>,
        cancel: &CancellationToken,
        sessions: &mut Vec<HostSession>,
        report: &mut RunReport,
    ) -> Result<()> {
        for host in hosts {
            self.logger
                .info(format!("[{}] connecting to {}", host.name, host.identity()));
            let session = self.open(host, options.debug, pool, cancel).await?;
            sessions.push(session);
        }

        for task in tasks {
            for session in sessions.iter_mut() {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let executed = self
                    .execute(session, task, options.debug, pool, cancel)
                    .await?;
                self.log_outcome(task, &executed.outcome);
                report.outcomes.push(executed.outcome);
                if let Some(e) = executed.fatal {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn open(
        &self,
        host: &Host,
        debug: bool,
        pool: Option<&ConnectionPool>,
        cancel: &CancellationToken,
    ) -> Result<HostSession> {
        let mut client = SshClient::new(host, self.connector.clone(), self.logger.clone())?
            .with_connect_timeout(self.config.connect_timeout());

        let lease = match pool {
            Some(pool) => {
                let conn = pool.get_connection(host, debug, cancel).await?;
                client.attach(conn.transport()).await;
                Some(conn)
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    result = client.connect() => result?,
                }
                None
            }
        };
        Ok(HostSession { client, lease })
    }

    async fn reconnect(
        &self,
        session: &mut HostSession,
        debug: bool,
        pool: Option<&ConnectionPool>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.logger.info(format!("[{}] reconnecting", session.name()));
        match pool {
            Some(pool) => {
                session.client.detach();
                pool.release_connection(session.lease.take().as_deref()).await;
                let conn = pool
                    .get_connection(session.client.host(), debug, cancel)
                    .await?;
                session.client.attach(conn.transport()).await;
                session.lease = Some(conn);
            }
            None => {
                if let Err(e) = session.client.close().await {
                    self.logger
                        .warn(format!("[{}] failed to close connection: {}", session.name(), e));
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    result = session.client.connect() => result?,
                }
            }
        }
        Ok(())
    }

    async fn finish(&self, mut session: HostSession, pool: Option<&ConnectionPool>) {
        match (pool, session.lease.take()) {
            (Some(pool), Some(conn)) => {
                session.client.detach();
                pool.release_connection(Some(&conn)).await;
            }
            _ => {
                if let Err(e) = session.client.close().await {
                    self.logger
                        .warn(format!("[{}] failed to close connection: {}", session.name(), e));
                }
            }
        }
    }

    async fn execute(
        &self,
        session: &mut HostSession,
        task: &Task,
        debug: bool,
        pool: Option<&ConnectionPool>,
        cancel: &CancellationToken,
    ) -> Result<Executed> {
        let host = session.name().to_string();
        let max_attempts = self.retry.attempts_for(task);
        self.logger.info(format!("[{}] running {}", host, task.name));

        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt >= max_attempts;

            match session.client.exec_with_cancel(task, debug, cancel).await {
                Ok(out) => {
                    let status = if task.is_success(out.exit_code) {
                        OutcomeStatus::Succeeded
                    } else {
                        OutcomeStatus::Mismatch
                    };
                    if status == OutcomeStatus::Mismatch && !last {
                        self.logger.warn(format!(
                            "[{}] {} exited {} (expected {}), retrying ({}/{})",
                            host, task.name, out.exit_code, task.expect, attempt, max_attempts
                        ));
                        self.pause(cancel).await?;
                        continue;
                    }
                    return Ok(Executed {
                        outcome: TaskOutcome {
                            task: task.name.clone(),
                            host,
                            status,
                            exit_code: out.exit_code,
                            expected: task.expect,
                            output: out.output,
                            attempts: attempt,
                            error: None,
                        },
                        fatal: None,
                    });
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    let mut fatal = e;
                    if !last {
                        self.logger.warn(format!(
                            "[{}] {} failed: {}, retrying ({}/{})",
                            host, task.name, fatal, attempt, max_attempts
                        ));
                        self.pause(cancel).await?;
                        match self.reconnect(session, debug, pool, cancel).await {
                            Ok(()) => continue,
                            Err(e) if e.is_cancellation() => return Err(e),
                            Err(e) => fatal = e,
                        }
                    }
                    return Ok(Executed {
                        outcome: TaskOutcome {
                            task: task.name.clone(),
                            host,
                            status: OutcomeStatus::TransportError,
                            exit_code: NO_EXIT_CODE,
                            expected: task.expect,
                            output: fatal.partial_output().unwrap_or_default().to_string(),
                            attempts: attempt,
                            error: Some(fatal.to_string()),
                        },
                        fatal: Some(fatal),
                    });
                }
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(self.retry.delay) => Ok(()),
        }
    }

    fn log_outcome(&self, task: &Task, outcome: &TaskOutcome) {
        let host = &outcome.host;
        match outcome.status {
            OutcomeStatus::Succeeded => match task.message.as_deref() {
                Some(message) if !message.is_empty() => {
                    self.logger.info(format!("[{}] {}: {}", host, task.name, message))
                }
                _ => self
                    .logger
                    .info(format!("[{}] {} completed successfully", host, task.name)),
            },
            OutcomeStatus::Mismatch => self.logger.warn(format!(
                "[{}] {} failed: exit code {} (expected {})",
                host, task.name, outcome.exit_code, outcome.expected
            )),
            OutcomeStatus::TransportError => self.logger.error(format!(
                "[{}] {} aborted: {}",
                host,
                task.name,
                outcome.error.as_deref().unwrap_or("transport failure")
            )),
        }

        let level = if task.output {
            LogLevel::Info
        } else if outcome.is_success() {
            LogLevel::Trace
        } else {
            LogLevel::Debug
        };
        for line in outcome.output.lines() {
            self.logger
                .log_at(level, format!("[{}] {} | {}", host, task.name, line));
        }
    }
}
