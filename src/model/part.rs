//! A single content item of a message.
//!
//! Parts are owned by exactly one [`Message`](super::message::Message) and are
//! only ever destroyed as part of that message's finalization.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{MmsError, Result};

/// One content item (text, image, ...) of an MMS message.
///
/// Not `Clone`: two copies would delete the same files on finalization.
///
/// ```compile_fail
/// let part = mmsfit::model::MessagePart::new("image/png", "a.png");
/// let _copy = part.clone();
/// ```
#[derive(Debug, serde::Serialize)]
pub struct MessagePart {
    /// MIME content type (e.g. `"image/jpeg"`).
    pub content_type: String,

    /// Content-ID used to reference the part from SMIL.
    pub content_id: Option<String>,

    /// Current backing content. Rewritten by the attachment resizer.
    pub file: Option<PathBuf>,

    /// Untouched original, so resizing always restarts from full fidelity.
    pub orig: Option<PathBuf>,

    /// Step used by the last successful resize (0 = never resized).
    pub resize_step: u32,
}

impl MessagePart {
    pub fn new(content_type: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            content_type: content_type.into(),
            content_id: None,
            file: Some(file.into()),
            orig: None,
            resize_step: 0,
        }
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn with_orig(mut self, orig: impl Into<PathBuf>) -> Self {
        self.orig = Some(orig.into());
        self
    }

    /// `true` for `image/*` content types.
    pub fn is_image(&self) -> bool {
        self.content_type
            .get(..6)
            .is_some_and(|p| p.eq_ignore_ascii_case("image/"))
    }

    /// The file a resize should start from: `orig` when present, else `file`.
    pub fn source_path(&self) -> Option<&Path> {
        self.orig.as_deref().or(self.file.as_deref())
    }

    /// On-disk size of `file`, 0 when unset or missing.
    pub fn file_size(&self) -> u64 {
        self.file
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Make the current (resized) `file` the new original.
    ///
    /// The previous original is deleted from disk and the step counter
    /// restarts, since later steps now scale from the promoted copy.
    pub fn promote_file(&mut self) -> Result<()> {
        let file = self.file.clone().ok_or(MmsError::NoBackingFile)?;
        if let Some(old) = self.orig.replace(file.clone()) {
            if old != file {
                match std::fs::remove_file(&old) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(MmsError::io(old, e)),
                }
            }
        }
        self.resize_step = 0;
        debug!(file = %file.display(), "Promoted resized file to original");
        Ok(())
    }

    /// Delete the backing files. Only called from message finalization.
    pub(crate) fn remove_files(&self, keep: bool) {
        if keep {
            return;
        }
        if let Some(file) = &self.file {
            remove_quietly(file);
        }
        if let Some(orig) = &self.orig {
            if self.file.as_ref() != Some(orig) {
                remove_quietly(orig);
            }
        }
    }
}

/// Best-effort removal; a missing file is not an error.
fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Deleted part file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete part file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_image() {
        assert!(MessagePart::new("image/jpeg", "a.jpg").is_image());
        assert!(MessagePart::new("IMAGE/PNG", "a.png").is_image());
        assert!(!MessagePart::new("text/plain", "a.txt").is_image());
        assert!(!MessagePart::new("img", "a").is_image());
    }

    #[test]
    fn test_source_prefers_orig() {
        let part = MessagePart::new("image/jpeg", "small.jpg");
        assert_eq!(part.source_path(), Some(Path::new("small.jpg")));
        let part = part.with_orig("big.jpg");
        assert_eq!(part.source_path(), Some(Path::new("big.jpg")));
    }

    #[test]
    fn test_remove_files_respects_keep() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        let orig = tmp.path().join("a.orig.txt");
        std::fs::write(&file, b"x").unwrap();
        std::fs::write(&orig, b"xx").unwrap();
        let part = MessagePart::new("text/plain", &file).with_orig(&orig);

        part.remove_files(true);
        assert!(file.exists() && orig.exists());

        part.remove_files(false);
        assert!(!file.exists());
        assert!(!orig.exists());

        // Already gone: must not panic or error.
        part.remove_files(false);
    }

    #[test]
    fn test_promote_file() {
        let tmp = tempfile::tempdir().unwrap();
        let orig = tmp.path().join("big.png");
        let resized = tmp.path().join("big.resized-2.png");
        std::fs::write(&orig, b"big").unwrap();
        std::fs::write(&resized, b"small").unwrap();

        let mut part = MessagePart::new("image/png", &resized).with_orig(&orig);
        part.resize_step = 2;
        part.promote_file().unwrap();

        assert_eq!(part.orig.as_deref(), Some(resized.as_path()));
        assert_eq!(part.resize_step, 0);
        assert!(!orig.exists());
        assert!(resized.exists());
        assert_eq!(part.file_size(), 5);
    }

    #[test]
    fn test_promote_without_file_fails() {
        let mut part = MessagePart::new("image/png", "x.png");
        part.file = None;
        assert!(matches!(part.promote_file(), Err(MmsError::NoBackingFile)));
    }
}
