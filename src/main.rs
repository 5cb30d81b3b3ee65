use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use convoy::config::Config;
use convoy::log::{FileSink, LogLevel, LogSink, Logger, StdoutSink, TeeSink};
use convoy::orchestration::{RunOptions, RunReport, Runner};
use convoy::ssh::RusshConnector;
use convoy::Result;

/// Convoy - run dependency-ordered shell tasks on remote hosts over SSH
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    CONVOY_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// Config file (defaults to ~/.convoy/convoy.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Log executed commands and pool decisions
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Also write log lines to this file (debug runs default to ~/.convoy/convoy.log)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run tasks on a host, or on every host with "all"
    Run {
        /// Host name, or "all"
        target: String,

        /// Run only this task and its dependencies
        #[arg(short = 't', long)]
        task: Option<String>,

        /// Also run lib tasks
        #[arg(long)]
        include_lib: bool,

        /// Lease connections from a pool
        #[arg(long)]
        pool: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved task order without connecting
    Plan {
        #[arg(short = 't', long)]
        task: Option<String>,

        #[arg(long)]
        include_lib: bool,
    },

    /// List configured hosts and tasks
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let logger = build_logger(cli.debug, cli.log_file.as_deref())?;

    match cli.command {
        Command::Run {
            target,
            task,
            include_lib,
            pool,
            json,
        } => {
            let options = RunOptions {
                task,
                include_lib,
                debug: logger.is_enabled(LogLevel::Debug),
                use_pool: pool,
            };
            run(config, logger, &target, &options, json).await
        }
        Command::Plan { task, include_lib } => {
            let options = RunOptions {
                task,
                include_lib,
                ..RunOptions::default()
            };
            let runner = Runner::new(config, Arc::new(RusshConnector::new()), logger);
            for (i, task) in runner.plan(&options)?.iter().enumerate() {
                if task.depends_on.is_empty() {
                    println!("{:>3}. {}", i + 1, task.name);
                } else {
                    println!("{:>3}. {} (after {})", i + 1, task.name, task.depends_on.join(", "));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            println!("Hosts:");
            for host in config.hosts.values() {
                println!("  {:<16} {}", host.name, host.identity());
            }
            println!("Tasks:");
            for task in &config.tasks {
                let lib = if task.lib { " [lib]" } else { "" };
                println!("  {:<16} {}{}", task.name, task.command_line(), lib);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    config: Config,
    logger: Logger,
    target: &str,
    options: &RunOptions,
    json: bool,
) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt_logger = logger.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt_logger.warn("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let runner = Runner::new(config, Arc::new(RusshConnector::new()), logger);
    let report = runner.run(Some(target), options, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn print_summary(report: &RunReport) {
    let failed = report.failed();
    println!(
        "{} succeeded, {} failed ({} ms)",
        report.succeeded().len(),
        failed.len(),
        (report.finished_at - report.started_at).num_milliseconds()
    );
    for outcome in failed {
        println!(
            "  {} on {}: exit {} (expected {})",
            outcome.task, outcome.host, outcome.exit_code, outcome.expected
        );
    }
}

fn build_logger(debug: bool, log_file: Option<&std::path::Path>) -> Result<Logger> {
    let level = LogLevel::for_debug(debug);
    let stdout: Arc<dyn LogSink> = Arc::new(StdoutSink);
    // Debug runs keep a copy in ~/.convoy/convoy.log unless told otherwise.
    let file_path = match log_file {
        Some(path) => Some(path.to_path_buf()),
        None if level == LogLevel::Debug => Some(FileSink::default_path()?),
        None => None,
    };
    let sink: Arc<dyn LogSink> = match file_path {
        Some(path) => {
            let file: Arc<dyn LogSink> = Arc::new(FileSink::create(path)?);
            Arc::new(TeeSink::new(vec![stdout, file]))
        }
        None => stdout,
    };
    Ok(Logger::new(sink, level))
}
