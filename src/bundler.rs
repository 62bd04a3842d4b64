//! Script bundling.
//!
//! [`BundlerConfig`] turns the configured script names into an entry table and
//! an output descriptor. The actual bundling is done by an external tool
//! behind the [`Bundler`] trait; [`Esbuild`] drives the `esbuild` binary.

use std::process::Stdio;

use camino::Utf8PathBuf;
use tokio::process::Command;

use crate::BoxFuture;
use crate::config::Paths;
use crate::error::BundlerError;

/// Controls source maps and minification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Inline source maps, no minification.
    Development,
    /// No source maps, minified output.
    Production,
}

/// One logical bundle and the source file it starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub path: Utf8PathBuf,
}

/// Where bundles are written and how they are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// File name pattern, `[name]` is replaced by the entry name.
    pub filename: &'static str,
    pub dir: Utf8PathBuf,
}

impl OutputDescriptor {
    pub fn path_for(&self, name: &str) -> Utf8PathBuf {
        self.dir.join(self.filename.replace("[name]", name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlerConfig {
    entries: Vec<Entry>,
    output: OutputDescriptor,
    mode: Mode,
}

impl BundlerConfig {
    /// Derive the entry table from the script names: every name maps to
    /// `<scripts entry>/<name>.js`, in list order.
    pub fn new(paths: &Paths, mode: Mode) -> Self {
        let entries = paths
            .script_names
            .iter()
            .map(|name| Entry {
                name: name.to_string(),
                path: paths.scripts.entry.join(format!("{name}.js")),
            })
            .collect();

        Self {
            entries,
            output: OutputDescriptor {
                filename: "[name].js",
                dir: paths.scripts.output.clone(),
            },
            mode,
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn output(&self) -> &OutputDescriptor {
        &self.output
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn source_maps(&self) -> bool {
        self.mode == Mode::Development
    }

    pub fn minify(&self) -> bool {
        self.mode == Mode::Production
    }

    /// Every entry must exist before the bundler is started.
    pub fn check_entries(&self) -> Result<(), BundlerError> {
        match self.entries.iter().find(|entry| !entry.path.is_file()) {
            Some(entry) => Err(BundlerError::MissingEntry {
                name: entry.name.clone(),
                path: entry.path.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Diagnostics reported by a successful bundler run.
#[derive(Debug, Clone, Default)]
pub struct BundleReport {
    pub outputs: Vec<Utf8PathBuf>,
    pub log: String,
}

/// An external module bundler.
pub trait Bundler: Send + Sync {
    fn bundle<'a>(
        &'a self,
        config: &'a BundlerConfig,
    ) -> BoxFuture<'a, Result<BundleReport, BundlerError>>;
}

/// Bundles with the `esbuild` binary.
///
/// **Note:** requires `esbuild` on the `PATH`, or its location in the
/// `ASSETRUN_ESBUILD` environment variable.
#[derive(Debug, Clone)]
pub struct Esbuild {
    program: String,
}

impl Esbuild {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("ASSETRUN_ESBUILD").unwrap_or_else(|_| "esbuild".into()))
    }

    fn args(config: &BundlerConfig) -> Vec<String> {
        let mut args: Vec<String> = config
            .entries()
            .iter()
            .map(|entry| format!("{}={}", entry.name, entry.path))
            .collect();

        args.push("--bundle".into());
        args.push(format!("--outdir={}", config.output().dir));
        args.push("--log-level=warning".into());

        if config.source_maps() {
            args.push("--sourcemap=inline".into());
        }
        if config.minify() {
            args.push("--minify".into());
        }

        args
    }
}

impl Default for Esbuild {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Bundler for Esbuild {
    fn bundle<'a>(
        &'a self,
        config: &'a BundlerConfig,
    ) -> BoxFuture<'a, Result<BundleReport, BundlerError>> {
        Box::pin(async move {
            config.check_entries()?;

            let output = Command::new(&self.program)
                .args(Self::args(config))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|source| BundlerError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;

            let log = String::from_utf8_lossy(&output.stderr).into_owned();

            if !output.status.success() {
                return Err(BundlerError::Failed {
                    program: self.program.clone(),
                    status: output.status,
                    stderr: log,
                });
            }

            Ok(BundleReport {
                outputs: config
                    .entries()
                    .iter()
                    .map(|entry| config.output().path_for(&entry.name))
                    .collect(),
                log,
            })
        })
    }
}
