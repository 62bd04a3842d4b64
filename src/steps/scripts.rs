use std::fs;

use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::bundler::{BundlerConfig, Mode};
use crate::config::Paths;
use crate::error::{FsError, StepError};
use crate::io;
use crate::runner::Runner;
use crate::task::{Step, TaskKind};

/// Runs the bundler over the configured entry points.
pub struct Bundle(pub Mode);

impl Step for Bundle {
    fn kind(&self) -> TaskKind {
        TaskKind::SourceTransform
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let context = runner.context();
            let config = BundlerConfig::new(&context.paths, self.0);

            let report = context.bundler.bundle(&config).await?;

            for line in report.log.lines().filter(|line| !line.trim().is_empty()) {
                warn!("[bundler] {line}");
            }
            for output in &report.outputs {
                debug!("wrote {}", io::short(output, &context.paths.root));
            }

            info!("bundled {} entry point(s) ({:?})", config.entries().len(), self.0);
            Ok(())
        })
    }
}

/// Empties the scripts output directory, keeping only the named bundles.
pub struct CleanScripts;

/// Delete everything in the scripts output directory whose file name is not a
/// protected bundle name. Returns the number of removed entries.
pub fn clean_scripts(paths: &Paths) -> Result<usize, FsError> {
    let dir = &paths.scripts.output;
    let protected = paths.script_names.protected();

    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(FsError::new("read directory", dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| FsError::new("read directory", dir, e))?;

        if protected.contains(entry.file_name()) {
            continue;
        }

        io::remove(entry.path())?;
        removed += 1;
    }

    Ok(removed)
}

impl Step for CleanScripts {
    fn kind(&self) -> TaskKind {
        TaskKind::Delete
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let removed = clean_scripts(&runner.context().paths)?;
            info!("removed {removed} stale script(s)");
            Ok(())
        })
    }
}

/// Copies scripts that are not bundle entries (vendor files and the like)
/// straight into the scripts output directory. Only top-level files are
/// copied; the `modules` folder and other directories hold sources that the
/// bundler pulls in.
pub struct CopyScripts;

pub fn copy_scripts(paths: &Paths) -> Result<usize, FsError> {
    let dirs = &paths.scripts;
    let protected = paths.script_names.protected();

    let entries = match dirs.entry.read_dir_utf8() {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(FsError::new("read directory", &dirs.entry, e)),
    };

    let mut copied = 0;
    for entry in entries {
        let entry = entry.map_err(|e| FsError::new("read directory", &dirs.entry, e))?;
        let is_file = fs::metadata(entry.path())
            .map_err(|e| FsError::new("inspect", entry.path(), e))?
            .is_file();

        if !is_file || protected.contains(entry.file_name()) {
            continue;
        }

        io::copy(entry.path(), &dirs.output.join(entry.file_name()))?;
        copied += 1;
    }

    Ok(copied)
}

impl Step for CopyScripts {
    fn kind(&self) -> TaskKind {
        TaskKind::Copy
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let copied = copy_scripts(&runner.context().paths)?;
            info!("copied {copied} unbundled script(s)");
            Ok(())
        })
    }
}
