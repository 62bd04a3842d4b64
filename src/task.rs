//! Task definitions and the registry that holds them.
//!
//! A task is either a leaf [`Step`] doing actual work, or a composite that
//! only sequences or parallelizes other tasks by name. The registry is filled
//! once at startup and validated before anything runs: every referenced name
//! must exist and the composition must be acyclic.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use petgraph::Graph;
use petgraph::algo::toposort;

use crate::BoxFuture;
use crate::error::{RegistryError, StepError};
use crate::runner::Runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    SourceTransform,
    Copy,
    Delete,
    Sequential,
    Parallel,
    ServerStart,
    WatchRegister,
    Reload,
    CacheReset,
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::SourceTransform => "source-transform",
            TaskKind::Copy => "copy",
            TaskKind::Delete => "delete",
            TaskKind::Sequential => "compose-sequential",
            TaskKind::Parallel => "compose-parallel",
            TaskKind::ServerStart => "server-start",
            TaskKind::WatchRegister => "watch-register",
            TaskKind::Reload => "reload",
            TaskKind::CacheReset => "cache-reset",
        };
        f.write_str(name)
    }
}

/// A unit of actual work.
///
/// Per-file transform failures are logged by the step itself; only fatal
/// failures are returned.
pub trait Step: Send + Sync {
    fn kind(&self) -> TaskKind;

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>>;
}

pub(crate) enum Action {
    Step(Arc<dyn Step>),
    Sequential(Vec<String>),
    Parallel(Vec<String>),
}

pub struct Task {
    name: String,
    pub(crate) action: Action,
}

impl Task {
    pub fn step(name: impl Into<String>, step: impl Step + 'static) -> Self {
        Self {
            name: name.into(),
            action: Action::Step(Arc::new(step)),
        }
    }

    pub fn sequential<I, S>(name: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            action: Action::Sequential(children.into_iter().map(Into::into).collect()),
        }
    }

    pub fn parallel<I, S>(name: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            action: Action::Parallel(children.into_iter().map(Into::into).collect()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TaskKind {
        match &self.action {
            Action::Step(step) => step.kind(),
            Action::Sequential(_) => TaskKind::Sequential,
            Action::Parallel(_) => TaskKind::Parallel,
        }
    }

    /// Child task names, in declaration order. Empty for leaf tasks.
    pub fn dependencies(&self) -> &[String] {
        match &self.action {
            Action::Step(_) => &[],
            Action::Sequential(children) | Action::Parallel(children) => children,
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

/// Name → task map.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: BTreeMap<String, Task>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Task) -> Result<&mut Self, RegistryError> {
        if self.tasks.contains_key(task.name()) {
            return Err(RegistryError::Duplicate(task.name().to_string()));
        }

        self.tasks.insert(task.name.clone(), task);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Checks that every child name is registered and that no composite
    /// task (transitively) contains itself.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut graph = Graph::<&str, ()>::new();
        let index: HashMap<&str, _> = self
            .tasks
            .keys()
            .map(|name| (name.as_str(), graph.add_node(name.as_str())))
            .collect();

        for task in self.tasks.values() {
            for dependency in task.dependencies() {
                let Some(&child) = index.get(dependency.as_str()) else {
                    return Err(RegistryError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                graph.add_edge(index[task.name()], child, ());
            }
        }

        toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| RegistryError::Cycle(graph[cycle.node_id()].to_string()))
    }

    /// Whether running `name` starts a server or a watcher, directly or
    /// through any of its children. Such runs only end with the process.
    pub fn is_long_lived(&self, name: &str) -> bool {
        let mut pending = vec![name];
        let mut seen = HashSet::new();

        while let Some(name) = pending.pop() {
            if !seen.insert(name) {
                continue;
            }
            let Some(task) = self.tasks.get(name) else {
                continue;
            };
            match task.kind() {
                TaskKind::ServerStart | TaskKind::WatchRegister => return true,
                _ => pending.extend(task.dependencies().iter().map(String::as_str)),
            }
        }

        false
    }

    /// Human readable listing, one task per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();

        for task in self.tasks.values() {
            out.push_str(&format!("{:<20} {}", task.name(), task.kind()));
            if !task.dependencies().is_empty() {
                out.push_str(&format!(" [{}]", task.dependencies().join(", ")));
            }
            out.push('\n');
        }

        out
    }
}
