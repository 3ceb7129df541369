//! Image scaling backends.
//!
//! A backend turns a source image into a narrower copy at a path chosen by
//! the caller. Output is staged in a temporary file next to the destination
//! and only renamed into place once it is complete, so an existing output
//! path always means the backend succeeded.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, ImageResult};
use tempfile::NamedTempFile;
use tracing::debug;

use super::step::height_for_width;
use crate::config::ResizeConfig;
use crate::error::{MmsError, Result};

/// Something that can produce a smaller image file from a larger one.
pub trait ImageBackend: Send + Sync {
    /// Short name used in configuration and logs.
    fn name(&self) -> &str;

    /// Scale `source` to `target_width` pixels wide, keeping the aspect
    /// ratio, and write the result to `output`.
    ///
    /// On error `output` must not exist.
    fn resize(&self, source: &Path, target_width: u32, output: &Path) -> Result<()>;
}

/// How [`ImageCrateBackend`] resamples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    /// Lanczos3 convolution. Slow, best quality.
    Lanczos,
    /// Integer area averaging (`thumbnail`). Fast.
    Fast,
}

/// Pure Rust backend built on the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageCrateBackend {
    name: &'static str,
    sampling: Sampling,
}

impl ImageCrateBackend {
    pub fn lanczos() -> Self {
        Self {
            name: "image",
            sampling: Sampling::Lanczos,
        }
    }

    pub fn fast() -> Self {
        Self {
            name: "image-fast",
            sampling: Sampling::Fast,
        }
    }

    fn failure(&self, reason: impl ToString) -> MmsError {
        MmsError::Backend {
            backend: self.name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl ImageBackend for ImageCrateBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn resize(&self, source: &Path, target_width: u32, output: &Path) -> Result<()> {
        let img = open_image(source)
            .and_then(|r| r.decode())
            .map_err(|e| self.failure(e))?;
        let (width, height) = img.dimensions();
        let target_height = height_for_width(width, height, target_width);
        if target_height == 0 {
            return Err(self.failure(format!("cannot scale {width}x{height} to {target_width}")));
        }

        let scaled = match self.sampling {
            Sampling::Lanczos => img.resize_exact(target_width, target_height, FilterType::Lanczos3),
            Sampling::Fast => img.thumbnail_exact(target_width, target_height),
        };

        let format = ImageFormat::from_path(output)
            .or_else(|_| ImageFormat::from_path(source))
            .unwrap_or(ImageFormat::Jpeg);
        // JPEG has no alpha channel.
        let scaled = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(scaled.to_rgb8()),
            _ => scaled,
        };

        let mut staged = staging_file(output)?;
        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            scaled
                .write_to(&mut writer, format)
                .map_err(|e| self.failure(e))?;
            writer.flush().map_err(|e| self.failure(e))?;
        }
        staged
            .persist(output)
            .map_err(|e| MmsError::io(output, e.error))?;

        debug!(
            backend = self.name,
            source = %source.display(),
            output = %output.display(),
            width = target_width,
            height = target_height,
            "Scaled image"
        );
        Ok(())
    }
}

/// Backend that shells out to an ImageMagick-compatible program:
/// `<program> <source> -resize <width>x <output>`.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn failure(&self, reason: impl ToString) -> MmsError {
        MmsError::Backend {
            backend: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl ImageBackend for CommandBackend {
    fn name(&self) -> &str {
        "magick"
    }

    fn resize(&self, source: &Path, target_width: u32, output: &Path) -> Result<()> {
        // The program picks the format from the extension, so the staged
        // file needs to carry it.
        let staged = staging_file(output)?.into_temp_path();

        let result = Command::new(&self.program)
            .arg(source)
            .arg("-resize")
            .arg(format!("{target_width}x"))
            .arg(&*staged)
            .output()
            .map_err(|e| self.failure(format!("cannot run {}: {e}", self.program.display())))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(self.failure(format!("{}: {}", result.status, stderr.trim())));
        }

        staged
            .persist(output)
            .map_err(|e| MmsError::io(output, e.error))?;
        debug!(
            program = %self.program.display(),
            output = %output.display(),
            width = target_width,
            "Scaled image with external program"
        );
        Ok(())
    }
}

/// Open an image, trusting its magic bytes over its extension.
fn open_image(path: &Path) -> ImageResult<ImageReader<BufReader<File>>> {
    Ok(ImageReader::open(path)?.with_guessed_format()?)
}

/// Width and height of the image at `path`, reading only its header.
pub fn read_dimensions(path: &Path) -> ImageResult<(u32, u32)> {
    open_image(path)?.into_dimensions()
}

/// A temporary file beside `output` with the same extension. Deleted on drop
/// unless persisted.
fn staging_file(output: &Path) -> Result<NamedTempFile> {
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let suffix = output
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(".mmsfit-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(|e| MmsError::io(dir, e))
}

/// Build backends from configured names, keeping their order.
pub fn backends_from_names(
    names: &[String],
    config: &ResizeConfig,
) -> Result<Vec<Box<dyn ImageBackend>>> {
    names
        .iter()
        .map(|name| -> Result<Box<dyn ImageBackend>> {
            match name.as_str() {
                "image" => Ok(Box::new(ImageCrateBackend::lanczos())),
                "image-fast" => Ok(Box::new(ImageCrateBackend::fast())),
                "magick" => Ok(Box::new(CommandBackend::new(&config.magick_program))),
                other => Err(MmsError::UnknownBackend(other.to_string())),
            }
        })
        .collect()
}

/// Deterministic backend for tests: either fails, or writes a blank PNG of
/// the requested width. Records every call.
#[cfg(test)]
pub(crate) struct MockBackend {
    name: String,
    succeed: bool,
    pub calls: std::sync::Mutex<Vec<(PathBuf, u32, PathBuf)>>,
}

#[cfg(test)]
impl MockBackend {
    pub fn succeeding(name: &str) -> Self {
        Self {
            name: name.to_string(),
            succeed: true,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            succeed: false,
            ..Self::succeeding(name)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
impl ImageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn resize(&self, source: &Path, target_width: u32, output: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((source.to_path_buf(), target_width, output.to_path_buf()));
        if !self.succeed {
            return Err(MmsError::Backend {
                backend: self.name.clone(),
                reason: "mock failure".to_string(),
            });
        }
        image::RgbImage::new(target_width, 1)
            .save_with_format(output, ImageFormat::Png)
            .map_err(|e| MmsError::Backend {
                backend: self.name.clone(),
                reason: e.to_string(),
            })
    }
}
