use std::io::Cursor;

use camino::Utf8Path;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};
use tracing::{debug, error, info};

use crate::BoxFuture;
use crate::error::{StepError, TransformError};
use crate::io;
use crate::runner::Runner;
use crate::task::{Step, TaskKind};

const JPEG_QUALITY: u8 = 85;

/// Copies the whole image tree into the output directory as is.
pub struct CopyImages;

impl Step for CopyImages {
    fn kind(&self) -> TaskKind {
        TaskKind::Copy
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let dirs = &runner.context().paths.images;

            let files = io::find(&dirs.entry, "**/*")?;
            for file in &files {
                io::copy(file, &io::rebase(file, &dirs.entry, &dirs.output))?;
            }

            info!("copied {} image(s)", files.len());
            Ok(())
        })
    }
}

/// What the optimizer does with a given file, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Treatment {
    Png,
    Jpeg,
    /// Animated or vector formats pass through untouched.
    Verbatim,
}

fn treatment(path: &Utf8Path) -> Option<Treatment> {
    let ext = path.extension()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some(Treatment::Png),
        "jpg" => Some(Treatment::Jpeg),
        "gif" | "svg" => Some(Treatment::Verbatim),
        _ => None,
    }
}

/// Re-encode an image with stronger compression. The original bytes are
/// returned whenever the re-encoded result isn't smaller.
fn optimize(original: Vec<u8>, treatment: Treatment) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();

    match treatment {
        Treatment::Verbatim => return Ok(original),
        Treatment::Png => {
            let image = image::load_from_memory_with_format(&original, ImageFormat::Png)?;
            let encoder = PngEncoder::new_with_quality(
                Cursor::new(&mut buffer),
                CompressionType::Best,
                FilterType::Adaptive,
            );
            image.write_with_encoder(encoder)?;
        }
        Treatment::Jpeg => {
            let image = image::load_from_memory_with_format(&original, ImageFormat::Jpeg)?;
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buffer), JPEG_QUALITY);
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)?;
        }
    }

    if buffer.len() < original.len() {
        Ok(buffer)
    } else {
        Ok(original)
    }
}

/// Writes compressed copies of changed images into the output directory.
/// Images seen before with the same contents are skipped until the cache is
/// cleared.
pub struct OptimizeImages;

impl Step for OptimizeImages {
    fn kind(&self) -> TaskKind {
        TaskKind::SourceTransform
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let context = runner.context();
            let paths = &context.paths;
            let dirs = &paths.images;

            let mut written = 0;
            let mut cached = 0;

            for file in io::find(&dirs.entry, "**/*")? {
                let Some(treatment) = treatment(&file) else {
                    continue;
                };

                let original = io::read(&file)?;
                if !context.images.changed(&file, &original) {
                    cached += 1;
                    continue;
                }

                let before = original.len();
                let bytes = match optimize(original, treatment) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("{}", TransformError::Image(file.clone(), e));
                        continue;
                    }
                };

                debug!(
                    "{}: {before} -> {} bytes",
                    io::short(&file, &paths.root),
                    bytes.len()
                );

                io::write(&io::rebase(&file, &dirs.entry, &dirs.output), bytes)?;
                written += 1;
            }

            info!("optimized {written} image(s), {cached} unchanged");
            Ok(())
        })
    }
}

/// Forgets every image recorded by [`OptimizeImages`].
pub struct ClearCache;

impl Step for ClearCache {
    fn kind(&self) -> TaskKind {
        TaskKind::CacheReset
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let images = &runner.context().images;
            debug!("dropping {} cached image hash(es)", images.len());
            images.clear();
            Ok(())
        })
    }
}
