use camino::Utf8Path;
use serde_json::json;
use tracing::{error, info, warn};

use crate::BoxFuture;
use crate::config::StyleDirs;
use crate::error::{StepError, TransformError};
use crate::io;
use crate::runner::Runner;
use crate::task::{Step, TaskKind};

/// Compile a stylesheet with `grass`, resolving imports from the style entry
/// directory.
pub fn compile(path: &Utf8Path, styles: &StyleDirs) -> Result<String, TransformError> {
    let options = grass::Options::default()
        .load_path(&styles.entry)
        .style(grass::OutputStyle::Expanded);

    grass::from_path(path, &options).map_err(|e| TransformError::Sass(path.to_owned(), e))
}

/// Partials (`_*.scss`) are only ever imported, never compiled on their own.
fn is_partial(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.starts_with('_'))
}

/// Compiles every top-level stylesheet except the main one and partials into
/// the style output directory.
pub struct SassOthers;

impl Step for SassOthers {
    fn kind(&self) -> TaskKind {
        TaskKind::SourceTransform
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let paths = &runner.context().paths;
            let styles = &paths.styles;
            let main = styles.main_source();

            let mut compiled = 0;
            for file in io::find(&styles.entry, "*.scss")? {
                if file == main || is_partial(&file) {
                    continue;
                }

                let css = match compile(&file, styles) {
                    Ok(css) => css,
                    Err(e) => {
                        error!("{e}");
                        continue;
                    }
                };

                let stem = file.file_stem().unwrap_or_default();
                io::write(&styles.output.join(format!("{stem}.css")), css)?;
                compiled += 1;
            }

            info!("compiled {compiled} stylesheet(s) into {}", io::short(&styles.output, &paths.root));
            Ok(())
        })
    }
}

/// Compiles the main stylesheet next to its source map and tells connected
/// browsers to refresh their styles.
pub struct SassMain;

impl Step for SassMain {
    fn kind(&self) -> TaskKind {
        TaskKind::SourceTransform
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let context = runner.context();
            let paths = &context.paths;
            let styles = &paths.styles;
            let source = styles.main_source();

            if !source.is_file() {
                warn!("main stylesheet {} not found", io::short(&source, &paths.root));
                return Ok(());
            }

            let css = match compile(&source, styles) {
                Ok(css) => css,
                Err(e) => {
                    error!("{e}");
                    return Ok(());
                }
            };

            let css_path = styles.main_css();
            let map_path = styles.main_map();
            let map_name = map_path.file_name().unwrap_or_default();

            let map = json!({
                "version": 3,
                "file": css_path.file_name().unwrap_or_default(),
                "sourceRoot": "/",
                "sources": [io::short(&source, &paths.root).as_str()],
                "sourcesContent": [io::read_to_string(&source)?],
                "names": [],
                "mappings": "",
            });

            io::write(&css_path, format!("{css}\n/*# sourceMappingURL={map_name} */\n"))?;
            io::write(&map_path, map.to_string())?;

            info!("compiled {}", io::short(&css_path, &paths.root));
            context.reloader.refresh_styles();
            Ok(())
        })
    }
}
