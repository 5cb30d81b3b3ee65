//! Turning a run request into concrete hosts and an ordered task list.

use crate::config::Config;
use crate::core::{resolve, resolve_from_root, Host, Task};
use crate::{Error, Result};

/// Selector that expands to every configured host.
pub const ALL_HOSTS: &str = "all";

/// Hosts named by `selector`, sorted by host name for `"all"`.
///
/// `"all"` always means every host, even when a host is literally named
/// `all`.
pub fn select_hosts<'a>(config: &'a Config, selector: Option<&str>) -> Result<Vec<&'a Host>> {
    let selector = selector.map(str::trim).filter(|s| !s.is_empty());
    let hosts: Vec<&Host> = match selector {
        None => return Err(Error::NoHostsSelected),
        Some(ALL_HOSTS) => config.hosts.values().collect(),
        Some(name) => vec![config
            .host(name)
            .ok_or_else(|| Error::HostNotFound(name.to_string()))?],
    };
    if hosts.is_empty() {
        return Err(Error::NoHostsSelected);
    }
    Ok(hosts)
}

/// Tasks to run, in execution order.
///
/// A named task runs with its dependency closure, lib tasks included.
/// Otherwise lib tasks are dropped unless `include_lib` is set and the
/// rest are ordered. A regular task that depends on a lib task is then an
/// [`Error::UnknownDependency`].
pub fn select_tasks(config: &Config, task: Option<&str>, include_lib: bool) -> Result<Vec<Task>> {
    if let Some(root) = task {
        return resolve_from_root(&config.tasks, root);
    }
    if include_lib {
        return resolve(&config.tasks);
    }

    let selected: Vec<Task> = config.tasks.iter().filter(|t| !t.lib).cloned().collect();
    resolve(&selected)
}
