//! Core domain models for convoy runs.
//!
//! This module contains the value records handed in by callers (tasks and
//! hosts) and the dependency resolver that turns a task set into an
//! execution order.

pub mod host;
pub mod resolver;
pub mod task;

pub use host::{AuthMethod, Host, DEFAULT_SSH_PORT};
pub use resolver::{resolve, resolve_from_root};
pub use task::Task;
