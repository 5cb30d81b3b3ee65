//! Dependency resolution for task sets.
//!
//! Orders tasks so that every task comes after everything it `depends_on`,
//! using Kahn's algorithm over a petgraph `DiGraph`. Ties between tasks that
//! become ready at the same time are broken by their position in the input,
//! so the same input always yields the same order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::core::task::Task;
use crate::{Error, Result};

/// Dependency graph over a borrowed task slice.
///
/// Node indices equal input positions; edges point from a dependency to its
/// dependents.
struct TaskGraph<'a> {
    graph: DiGraph<&'a Task, ()>,
}

impl<'a> TaskGraph<'a> {
    fn build(tasks: &'a [Task]) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(tasks.len());

        for task in tasks {
            let node = graph.add_node(task);
            if index.insert(task.name.as_str(), node).is_some() {
                return Err(Error::DuplicateTask(task.name.clone()));
            }
        }

        for (position, task) in tasks.iter().enumerate() {
            let dependent = NodeIndex::new(position);
            for dep in &task.depends_on {
                let dependency = index.get(dep.as_str()).ok_or_else(|| Error::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(*dependency, dependent, ());
            }
        }

        Ok(Self { graph })
    }

    /// Kahn's algorithm with a min-heap on input position as the ready queue.
    fn order(&self) -> Result<Vec<Task>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(position, _)| Reverse(position))
            .collect();

        let mut ordered = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(position)) = ready.pop() {
            let node = NodeIndex::new(position);
            ordered.push(self.graph[node].clone());

            // neighbors yields one entry per edge, matching the in-degree count
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let degree = &mut in_degree[dependent.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(dependent.index()));
                }
            }
        }

        if ordered.len() < in_degree.len() {
            let tasks = in_degree
                .iter()
                .enumerate()
                .filter(|(_, degree)| **degree > 0)
                .map(|(position, _)| self.graph[NodeIndex::new(position)].name.clone())
                .collect();
            return Err(Error::DependencyCycle { tasks });
        }

        Ok(ordered)
    }
}

/// Order `tasks` so that dependencies always come first.
///
/// # Errors
/// - [`Error::DuplicateTask`] if two tasks share a name
/// - [`Error::UnknownDependency`] if a `depends_on` entry names no task
/// - [`Error::DependencyCycle`] if the graph is cyclic; no partial order is
///   returned
pub fn resolve(tasks: &[Task]) -> Result<Vec<Task>> {
    TaskGraph::build(tasks)?.order()
}

/// Order `root` together with its transitive dependencies, and nothing else.
///
/// # Errors
/// Returns [`Error::TaskNotFound`] if `root` is not in `tasks`, plus the
/// errors of [`resolve`]. A cycle reachable from `root` is reported as
/// [`Error::DependencyCycle`] naming the tasks on the cycle.
pub fn resolve_from_root(tasks: &[Task], root: &str) -> Result<Vec<Task>> {
    let by_name: HashMap<&str, &Task> = tasks.iter().map(|t| (t.name.as_str(), t)).collect();
    if !by_name.contains_key(root) {
        return Err(Error::TaskNotFound(root.to_string()));
    }

    let mut walk = ClosureWalk {
        by_name: &by_name,
        visited: HashSet::new(),
        in_progress: Vec::new(),
    };
    walk.visit(root)?;

    // Keep input order so the tie-break matches a full resolve.
    let closure: Vec<Task> = tasks
        .iter()
        .filter(|t| walk.visited.contains(t.name.as_str()))
        .cloned()
        .collect();

    resolve(&closure)
}

/// Depth-first collection of a task's dependency closure.
struct ClosureWalk<'a> {
    by_name: &'a HashMap<&'a str, &'a Task>,
    /// Fully expanded tasks.
    visited: HashSet<&'a str>,
    /// Current DFS stack. Meeting one of these again is a cycle.
    in_progress: Vec<&'a str>,
}

impl<'a> ClosureWalk<'a> {
    fn visit(&mut self, name: &'a str) -> Result<()> {
        if self.visited.contains(name) {
            return Ok(());
        }
        if let Some(start) = self.in_progress.iter().position(|n| *n == name) {
            let mut tasks: Vec<String> =
                self.in_progress[start..].iter().map(|n| n.to_string()).collect();
            tasks.push(name.to_string());
            return Err(Error::DependencyCycle { tasks });
        }

        let by_name = self.by_name;
        let task: &'a Task = by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::TaskNotFound(name.to_string()))?;

        self.in_progress.push(name);
        for dep in &task.depends_on {
            if !by_name.contains_key(dep.as_str()) {
                return Err(Error::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                });
            }
            self.visit(dep.as_str())?;
        }
        self.in_progress.pop();
        self.visited.insert(name);
        Ok(())
    }
}
