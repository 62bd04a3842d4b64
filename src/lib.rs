#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod bundler;
mod cache;
pub mod cli;
pub mod config;
mod error;
pub mod io;
pub mod logging;
mod runner;
pub mod server;
pub mod steps;
pub mod task;
pub mod watch;

use std::future::Future;
use std::pin::Pin;

use anyhow::{anyhow, bail};
use camino::Utf8PathBuf;
use tracing::info;

pub use crate::cache::ImageCache;
pub use crate::config::{Paths, Settings};
pub use crate::error::*;
pub use crate::runner::{Context, Runner};
pub use crate::task::{Registry, Step, Task, TaskKind};

/// Boxed future returned by steps and the runner.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Run the task named on the command line in the current directory.
pub async fn run(args: cli::Args) -> anyhow::Result<()> {
    let registry = steps::registry();

    if args.list {
        print!("{}", registry.describe());
        return Ok(());
    }

    if !registry.contains(&args.task) {
        let known: Vec<_> = registry.names().collect();
        bail!(
            "{}\nKnown tasks: {}",
            TaskError::Unknown(args.task.clone()),
            known.join(", ")
        );
    }

    let root = std::env::current_dir()
        .map_err(|e| anyhow!("Couldn't determine the working directory.\n{e}"))?;
    let root = Utf8PathBuf::try_from(root).map_err(ConfigError::from)?;
    let paths = Paths::load(&root)?;

    let long_lived = registry.is_long_lived(&args.task);
    let runner = Runner::new(registry, Context::new(paths))?;

    tokio::select! {
        result = runner.run(&args.task) => result?,
        _ = tokio::signal::ctrl_c() => interrupted(&args.task, long_lived)?,
    }

    Ok(())
}

/// Ctrl-C is the normal way to stop a server or a watcher. Anywhere else it
/// leaves the build unfinished.
fn interrupted(task: &str, long_lived: bool) -> Result<(), TaskError> {
    if long_lived {
        info!("interrupted, shutting down");
        Ok(())
    } else {
        Err(TaskError::Interrupted(task.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupting_a_build_is_an_error() {
        let err = interrupted("dist", false).unwrap_err();
        assert!(matches!(err, TaskError::Interrupted(ref task) if task == "dist"));
        assert_eq!(err.to_string(), "Task 'dist' was interrupted before it finished");
    }

    #[test]
    fn test_interrupting_a_server_is_a_clean_exit() {
        interrupted("default", true).unwrap();
    }
}
