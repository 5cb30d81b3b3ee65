//! Orchestration layer for convoy runs.
//!
//! This module turns a host selector and task options into a sequential
//! run: hosts are selected, tasks resolved into dependency order,
//! connections established, and every task executed on every host.

mod runner;
mod selector;

pub use runner::{OutcomeStatus, RetryPolicy, RunOptions, RunReport, Runner, TaskOutcome};
pub use selector::{select_hosts, select_tasks, ALL_HOSTS};
