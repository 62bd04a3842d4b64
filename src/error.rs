use std::process::ExitStatus;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Problems with the settings file or the project layout. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read settings file '{0}'.\n{1}")]
    Read(Utf8PathBuf, #[source] std::io::Error),

    #[error("Malformed settings file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, #[source] serde_json::Error),

    #[error("Invalid setting '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Project root '{0}' is not usable.\n{1}")]
    Root(Utf8PathBuf, #[source] std::io::Error),

    #[error("Project root is not valid UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

/// A single source file failed to transform. Steps log these and move on to
/// the next file.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Sass compilation error in '{0}':\n{1}")]
    Sass(Utf8PathBuf, Box<grass::Error>),

    #[error("Template '{0}' failed to compile:\n{1}")]
    Template(Utf8PathBuf, anyhow::Error),

    #[error("Image '{0}' couldn't be optimized:\n{1}")]
    Image(Utf8PathBuf, #[source] image::ImageError),

    #[error("Stylesheet '{0}' couldn't be reformatted:\n{1}")]
    Beautify(Utf8PathBuf, Box<grass::Error>),
}

/// A filesystem operation failed. Fatal to the current run.
#[derive(Debug, Error)]
#[error("Couldn't {op} '{path}'.\n{source}")]
pub struct FsError {
    pub op: &'static str,
    pub path: Utf8PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl FsError {
    pub fn new(op: &'static str, path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Errors from the script bundler. Fatal to the current run.
#[derive(Debug, Error)]
pub enum BundlerError {
    #[error("Entry '{name}' not found at '{path}'")]
    MissingEntry { name: String, path: Utf8PathBuf },

    #[error("Couldn't start '{program}'.\n{source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}:\n{stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't compile watch pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),
}

/// Fatal outcome of a single step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Bundler(#[from] BundlerError),

    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Dev server stopped:\n{0}")]
    Server(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Unknown task '{0}'")]
    Unknown(String),

    #[error("Task '{task}':\n{source}")]
    Step {
        task: String,
        #[source]
        source: StepError,
    },

    #[error("Task '{0}' was interrupted before it finished")]
    Interrupted(String),

    #[error("Task was aborted:\n{0}")]
    Aborted(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Task '{0}' is registered twice")]
    Duplicate(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),
}
