use camino::Utf8Path;
use tracing::{error, info, warn};

use crate::BoxFuture;
use crate::error::{StepError, TransformError};
use crate::io;
use crate::runner::Runner;
use crate::task::{Step, TaskKind};

/// Deletes the stylesheet source maps before shipping, along with the
/// `sourceMappingURL` comments pointing at them.
pub struct RemoveSourceMaps;

fn is_map_reference(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("/*# sourceMappingURL=") && line.ends_with("*/")
}

/// Drop `/*# sourceMappingURL=... */` lines. Returns `None` if there were none.
pub fn strip_map_reference(css: &str) -> Option<String> {
    if !css.lines().any(is_map_reference) {
        return None;
    }

    let mut out = css
        .lines()
        .filter(|line| !is_map_reference(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string();
    out.push('\n');
    Some(out)
}

impl Step for RemoveSourceMaps {
    fn kind(&self) -> TaskKind {
        TaskKind::Delete
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let styles = &runner.context().paths.styles;

            let mut maps = io::find(&styles.output, "**/*.css.map")?;
            maps.extend(io::find(&styles.main_output, "*.css.map")?);
            maps.sort();
            maps.dedup();

            for map in &maps {
                io::remove(map)?;
            }

            let mut sheets = io::find(&styles.output, "**/*.css")?;
            let main = styles.main_css();
            if main.is_file() && !sheets.contains(&main) {
                sheets.push(main);
            }

            let mut unlinked = 0;
            for sheet in &sheets {
                if let Some(css) = strip_map_reference(&io::read_to_string(sheet)?) {
                    io::write(sheet, css)?;
                    unlinked += 1;
                }
            }

            info!("removed {} source map(s), unlinked {unlinked} stylesheet(s)", maps.len());
            Ok(())
        })
    }
}

/// Re-print a stylesheet in expanded form.
pub fn beautify(path: &Utf8Path, css: String) -> Result<String, TransformError> {
    let options = grass::Options::default().style(grass::OutputStyle::Expanded);
    grass::from_string(css, &options).map_err(|e| TransformError::Beautify(path.to_owned(), e))
}

/// Already minified sheets are left alone.
fn is_minified(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.ends_with("min.css"))
}

/// Reformat one file in place. Transform failures are logged and reported as
/// `false`.
fn beautify_file(path: &Utf8Path) -> Result<bool, StepError> {
    let css = io::read_to_string(path)?;

    match beautify(path, css) {
        Ok(pretty) => {
            io::write(path, pretty)?;
            Ok(true)
        }
        Err(e) => {
            error!("{e}");
            Ok(false)
        }
    }
}

/// Reformats the main stylesheet.
pub struct BeautifyMain;

impl Step for BeautifyMain {
    fn kind(&self) -> TaskKind {
        TaskKind::SourceTransform
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let paths = &runner.context().paths;
            let main = paths.styles.main_css();

            if !main.is_file() {
                warn!("{} not found, nothing to beautify", io::short(&main, &paths.root));
                return Ok(());
            }

            if beautify_file(&main)? {
                info!("beautified {}", io::short(&main, &paths.root));
            }
            Ok(())
        })
    }
}

/// Reformats the separately compiled stylesheets.
pub struct BeautifyOther;

impl Step for BeautifyOther {
    fn kind(&self) -> TaskKind {
        TaskKind::SourceTransform
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let styles = &runner.context().paths.styles;

            let mut done = 0;
            for file in io::find(&styles.output, "*.css")? {
                if is_minified(&file) {
                    continue;
                }
                if beautify_file(&file)? {
                    done += 1;
                }
            }

            info!("beautified {done} stylesheet(s)");
            Ok(())
        })
    }
}
