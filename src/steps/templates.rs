use std::process::Stdio;

use anyhow::{Context as _, anyhow};
use camino::Utf8Path;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info};

use crate::BoxFuture;
use crate::error::{StepError, TransformError};
use crate::io;
use crate::runner::Runner;
use crate::task::{Step, TaskKind};

/// An external template compiler turning one source file into HTML.
pub trait TemplateCompiler: Send + Sync {
    fn compile<'a>(
        &'a self,
        path: &'a Utf8Path,
        source: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<String>>;
}

/// Compiles Pug templates with the `pug` command line tool (`pug-cli`).
///
/// **Note:** requires `pug` on the `PATH`, or its location in the
/// `ASSETRUN_PUG` environment variable.
#[derive(Debug, Clone)]
pub struct PugCli {
    program: String,
}

impl PugCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("ASSETRUN_PUG").unwrap_or_else(|_| "pug".into()))
    }
}

impl Default for PugCli {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TemplateCompiler for PugCli {
    fn compile<'a>(
        &'a self,
        path: &'a Utf8Path,
        source: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            // `--path` lets includes and extends resolve relative to the file.
            let mut child = Command::new(&self.program)
                .arg("--pretty")
                .arg("--path")
                .arg(path.as_str())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("couldn't start '{}'", self.program))?;

            {
                let mut stdin = child.stdin.take().ok_or(anyhow!("stdin not piped"))?;
                stdin.write_all(source.as_bytes()).await?;
                stdin.shutdown().await?;
            }

            let output = child.wait_with_output().await?;

            if !output.status.success() {
                return Err(anyhow!(
                    "{}",
                    String::from_utf8_lossy(&output.stderr).trim_end()
                ));
            }

            Ok(String::from_utf8(output.stdout)?)
        })
    }
}

/// Renders every top-level template into an HTML page. A template that fails
/// is reported and skipped, the rest still render.
pub struct Templates;

impl Step for Templates {
    fn kind(&self) -> TaskKind {
        TaskKind::SourceTransform
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let context = runner.context();
            let paths = &context.paths;
            let dirs = &paths.templates;

            let mut rendered = 0;
            let mut failed = 0;

            for file in io::find(&dirs.entry, "*.pug")? {
                let source = match String::from_utf8(io::read(&file)?) {
                    Ok(source) => source,
                    Err(e) => {
                        error!("{}", TransformError::Template(file.clone(), e.into()));
                        failed += 1;
                        continue;
                    }
                };

                let html = match context.templates.compile(&file, &source).await {
                    Ok(html) => html,
                    Err(e) => {
                        error!("{}", TransformError::Template(file.clone(), e));
                        failed += 1;
                        continue;
                    }
                };

                let stem = file.file_stem().unwrap_or_default();
                io::write(&dirs.output.join(format!("{stem}.html")), html)?;
                rendered += 1;
            }

            info!("rendered {rendered} template(s), {failed} failed");
            Ok(())
        })
    }
}
