//! Attachment resizing: shrink one image part by one step.
//!
//! [`AttachmentResizer::resize`] is a single attempt. It decodes the part's
//! source image, asks [`step::next_resize_step`] for the next step, and tries
//! each backend in order until one writes a decodable file. Only then are the
//! part's `file` and `resize_step` updated; on any failure the part is left
//! exactly as it was. Looping over steps is up to the caller (see [`fit`]).

pub mod backend;
pub mod fit;
pub mod step;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{MmsError, Result};
use crate::model::part::MessagePart;

pub use backend::{
    backends_from_names, read_dimensions, CommandBackend, ImageBackend, ImageCrateBackend,
};
pub use fit::{shrink_to_fit, FitReport};
pub use step::{next_resize_step, resize_plan, scaled_dimensions, PlannedStep, ResizeSettings};

/// What a successful resize did.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResizeOutcome {
    pub step: u32,
    pub backend: String,
    /// Dimensions of the source image.
    pub before: (u32, u32),
    /// Dimensions of the new file.
    pub after: (u32, u32),
    /// The part's `file` before the resize. Not deleted.
    pub previous_file: PathBuf,
    /// The part's new `file`.
    pub file: PathBuf,
}

/// Drives the backends for one part at a time.
pub struct AttachmentResizer {
    settings: ResizeSettings,
    backends: Vec<Box<dyn ImageBackend>>,
}

impl AttachmentResizer {
    pub fn new(settings: ResizeSettings, backends: Vec<Box<dyn ImageBackend>>) -> Self {
        Self { settings, backends }
    }

    /// Settings and backend order from the `[resize]` config section.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.resize.validate()?;
        let backends = backends_from_names(&config.resize.backends, &config.resize)?;
        Ok(Self::new(ResizeSettings::from(&config.resize), backends))
    }

    pub fn settings(&self) -> &ResizeSettings {
        &self.settings
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Shrink `part` by one step.
    pub fn resize(&self, part: &mut MessagePart) -> Result<ResizeOutcome> {
        let file = part.file.clone().ok_or(MmsError::NoBackingFile)?;
        let source = part
            .source_path()
            .ok_or(MmsError::NoBackingFile)?
            .to_path_buf();

        let (width, height) =
            read_dimensions(&source).map_err(|e| MmsError::Decode {
                path: source.clone(),
                reason: e.to_string(),
            })?;

        let step = next_resize_step(part.resize_step, width, height, &self.settings)?;
        let (target_w, target_h) = scaled_dimensions(width, height, step);
        let output = resized_file_name(&source, &file, step);

        for backend in &self.backends {
            if let Err(e) = backend.resize(&source, target_w, &output) {
                warn!(backend = backend.name(), error = %e, "Image backend failed");
                continue;
            }
            let after = match read_dimensions(&output) {
                Ok(dims) => dims,
                Err(e) => {
                    warn!(
                        backend = backend.name(),
                        output = %output.display(),
                        error = %e,
                        "Image backend produced an unreadable file"
                    );
                    let _ = std::fs::remove_file(&output);
                    continue;
                }
            };

            debug!(
                backend = backend.name(),
                step,
                from = %file.display(),
                to = %output.display(),
                before_width = width,
                before_height = height,
                after_width = after.0,
                after_height = after.1,
                expected_height = target_h,
                "Resized attachment"
            );
            part.file = Some(output.clone());
            part.resize_step = step;
            return Ok(ResizeOutcome {
                step,
                backend: backend.name().to_string(),
                before: (width, height),
                after,
                previous_file: file,
                file: output,
            });
        }

        Err(MmsError::BackendsFailed(source))
    }
}

/// `<dir of file>/<source stem>.resized-<step>.<source ext>`.
///
/// A `.resized-N` suffix already on the stem is dropped so names do not grow.
/// The result is never `source` or `file`: on a clash the step suffix is
/// appended to the full stem instead.
pub fn resized_file_name(source: &Path, file: &Path, step: u32) -> PathBuf {
    let full_stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let mut stem = match full_stem.rsplit_once(".resized-") {
        Some((base, n)) if n.chars().all(|c| c.is_ascii_digit()) => base.to_string(),
        _ => full_stem,
    };
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jpg".to_string());
    let dir = file.parent().unwrap_or(Path::new(""));
    loop {
        let name = dir.join(format!("{stem}.resized-{step}.{ext}"));
        if name != source && name != file {
            return name;
        }
        stem = format!("{stem}.resized-{step}");
    }
}

#[cfg(test)]
mod tests {
    use super::backend::MockBackend;
    use super::*;
    use std::sync::Arc;

    /// Lets a test keep a handle on a mock after boxing it.
    struct Shared(Arc<MockBackend>);

    impl ImageBackend for Shared {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn resize(&self, source: &Path, target_width: u32, output: &Path) -> Result<()> {
            self.0.resize(source, target_width, output)
        }
    }

    fn settings() -> ResizeSettings {
        ResizeSettings {
            max_steps: 8,
            min_width: 4,
            min_height: 4,
            max_pixels: None,
        }
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_resized_file_name() {
        let name = resized_file_name(Path::new("/m/orig/photo.png"), Path::new("/m/parts/photo.png"), 3);
        assert_eq!(name, PathBuf::from("/m/parts/photo.resized-3.png"));

        let name = resized_file_name(Path::new("/m/photo.resized-2.jpeg"), Path::new("/m/x"), 4);
        assert_eq!(name, PathBuf::from("/m/photo.resized-4.jpeg"));

        let name = resized_file_name(Path::new("blob"), Path::new("blob"), 1);
        assert_eq!(name, PathBuf::from("blob.resized-1.jpg"));
    }

    #[test]
    fn test_resized_file_name_never_targets_its_inputs() {
        let src = Path::new("/m/photo.resized-1.png");
        let name = resized_file_name(src, src, 1);
        assert_eq!(name, PathBuf::from("/m/photo.resized-1.resized-1.png"));

        // Only the current file clashes.
        let name = resized_file_name(Path::new("/m/p.png"), Path::new("/m/p.resized-1.png"), 1);
        assert_eq!(name, PathBuf::from("/m/p.resized-1.resized-1.png"));

        // No clash: the suffix is still replaced.
        let name = resized_file_name(src, src, 2);
        assert_eq!(name, PathBuf::from("/m/photo.resized-2.png"));
    }

    #[test]
    fn test_resize_does_not_overwrite_resized_looking_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("photo.resized-1.png");
        write_png(&src, 400, 300);
        let before = std::fs::read(&src).unwrap();

        let resizer = AttachmentResizer::new(settings(), vec![Box::new(ImageCrateBackend::fast())]);
        let mut part = MessagePart::new("image/png", &src);
        let outcome = resizer.resize(&mut part).unwrap();

        assert_ne!(outcome.file, src);
        assert_eq!(outcome.previous_file, src);
        assert_eq!(outcome.after, (200, 150));
        assert_eq!(std::fs::read(&src).unwrap(), before);
        assert_eq!(read_dimensions(&src).unwrap(), (400, 300));
    }

    #[test]
    fn test_promote_then_resize_keeps_orig() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("photo.png");
        write_png(&src, 400, 300);

        let resizer = AttachmentResizer::new(settings(), vec![Box::new(ImageCrateBackend::fast())]);
        let mut part = MessagePart::new("image/png", &src).with_orig(&src);
        let first = resizer.resize(&mut part).unwrap();
        assert_eq!(first.file, tmp.path().join("photo.resized-1.png"));

        part.promote_file().unwrap();
        let promoted = first.file.clone();
        assert_eq!(part.orig.as_deref(), Some(promoted.as_path()));
        assert_eq!(part.resize_step, 0);
        let promoted_bytes = std::fs::read(&promoted).unwrap();

        let second = resizer.resize(&mut part).unwrap();
        assert_eq!(second.step, 1);
        assert_ne!(second.file, promoted);
        assert_eq!(second.before, (200, 150));
        assert_eq!(second.after, (100, 75));

        assert_eq!(part.orig.as_deref(), Some(promoted.as_path()));
        assert_eq!(std::fs::read(&promoted).unwrap(), promoted_bytes);
        assert_eq!(read_dimensions(&promoted).unwrap(), (200, 150));
    }

    #[test]
    fn test_falls_through_to_next_backend() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("pic.png");
        write_png(&src, 80, 60);

        let first = Arc::new(MockBackend::failing("first"));
        let second = Arc::new(MockBackend::succeeding("second"));
        let resizer = AttachmentResizer::new(
            settings(),
            vec![Box::new(Shared(first.clone())), Box::new(Shared(second.clone()))],
        );

        let mut part = MessagePart::new("image/png", &src);
        let outcome = resizer.resize(&mut part).unwrap();

        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 1);
        assert_eq!(outcome.backend, "second");
        assert_eq!(outcome.step, 1);
        assert_eq!(outcome.before, (80, 60));
        assert_eq!(second.calls.lock().unwrap()[0].1, 40);
        assert_eq!(part.resize_step, 1);
        assert_eq!(part.file.as_deref(), Some(outcome.file.as_path()));
        assert!(src.exists(), "previous file is left for the caller");
    }

    #[test]
    fn test_first_success_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("pic.png");
        write_png(&src, 80, 60);

        let first = Arc::new(MockBackend::succeeding("first"));
        let second = Arc::new(MockBackend::succeeding("second"));
        let resizer = AttachmentResizer::new(
            settings(),
            vec![Box::new(Shared(first.clone())), Box::new(Shared(second.clone()))],
        );
        let mut part = MessagePart::new("image/png", &src);
        resizer.resize(&mut part).unwrap();
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 0);
    }

    #[test]
    fn test_all_backends_fail_leaves_part_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("pic.png");
        write_png(&src, 80, 60);

        let resizer = AttachmentResizer::new(
            settings(),
            vec![
                Box::new(MockBackend::failing("a")),
                Box::new(MockBackend::failing("b")),
            ],
        );
        let mut part = MessagePart::new("image/png", &src);
        part.resize_step = 1;

        let err = resizer.resize(&mut part).unwrap_err();
        assert!(matches!(err, MmsError::BackendsFailed(_)));
        assert!(!err.is_exhausted());
        assert_eq!(part.file.as_deref(), Some(src.as_path()));
        assert_eq!(part.resize_step, 1);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_decode_failure_does_not_call_backends() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("corrupt.png");
        std::fs::write(&src, b"not a png at all").unwrap();

        let mock = Arc::new(MockBackend::succeeding("mock"));
        let resizer = AttachmentResizer::new(settings(), vec![Box::new(Shared(mock.clone()))]);
        let mut part = MessagePart::new("image/png", &src);

        let err = resizer.resize(&mut part).unwrap_err();
        assert_eq!(err.reason_code(), "decode");
        assert_eq!(mock.call_count(), 0);
        assert_eq!(part.resize_step, 0);
        assert_eq!(part.file.as_deref(), Some(src.as_path()));
    }

    #[test]
    fn test_resizes_from_orig_not_from_current_file() {
        let tmp = tempfile::tempdir().unwrap();
        let orig = tmp.path().join("photo.png");
        let current = tmp.path().join("photo.resized-1.png");
        write_png(&orig, 120, 90);
        write_png(&current, 60, 45);

        let mock = Arc::new(MockBackend::succeeding("mock"));
        let resizer = AttachmentResizer::new(settings(), vec![Box::new(Shared(mock.clone()))]);
        let mut part = MessagePart::new("image/png", &current).with_orig(&orig);
        part.resize_step = 1;

        let outcome = resizer.resize(&mut part).unwrap();
        let calls = mock.calls.lock().unwrap();
        assert_eq!(calls[0].0, orig);
        assert_eq!(calls[0].1, 40);
        assert_eq!(outcome.step, 2);
        assert_eq!(outcome.previous_file, current);
        assert_eq!(outcome.file, tmp.path().join("photo.resized-2.png"));
    }

    #[test]
    fn test_repeated_resizes_shrink_until_exhausted() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("pic.png");
        write_png(&src, 64, 48);

        let resizer = AttachmentResizer::new(
            settings(),
            vec![Box::new(ImageCrateBackend::fast())],
        );
        let mut part = MessagePart::new("image/png", &src).with_orig(&src);

        let mut widths = Vec::new();
        let err = loop {
            match resizer.resize(&mut part) {
                Ok(outcome) => widths.push(outcome.after.0),
                Err(e) => break e,
            }
            assert!(widths.len() <= 16, "resize loop did not terminate");
        };

        assert!(err.is_exhausted());
        assert!(!widths.is_empty());
        for pair in widths.windows(2) {
            assert!(pair[1] < pair[0]);
        }
        assert!(widths.iter().all(|w| *w >= 4));
    }

    #[test]
    fn test_missing_file() {
        let resizer = AttachmentResizer::new(settings(), Vec::new());
        let mut part = MessagePart::new("image/png", "x.png");
        part.file = None;
        assert!(matches!(
            resizer.resize(&mut part),
            Err(MmsError::NoBackingFile)
        ));
    }

    #[test]
    fn test_from_config() {
        let resizer = AttachmentResizer::from_config(&Config::default()).unwrap();
        assert_eq!(resizer.backend_names(), vec!["image", "image-fast"]);
        assert_eq!(resizer.settings().max_steps, 8);

        let mut cfg = Config::default();
        cfg.resize.backends = vec!["nope".to_string()];
        assert!(AttachmentResizer::from_config(&cfg).is_err());
    }
}
