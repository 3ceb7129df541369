//! Shrink a whole message under a size limit.
//!
//! This is the caller side of the resizer contract: every step is an
//! explicit [`AttachmentResizer::resize`] call, and intermediate files
//! left behind by a successful step are cleaned up here.

use std::io;

use tracing::{debug, info, warn};

use super::{AttachmentResizer, ResizeOutcome};
use crate::error::{MmsError, Result};
use crate::model::message::Message;

/// Summary of a [`shrink_to_fit`] run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FitReport {
    pub initial_size: u64,
    pub final_size: u64,
    pub limit: u64,
    /// Successful resizes as `(part index, outcome)`, in order.
    pub resizes: Vec<(usize, ResizeOutcome)>,
}

/// Resize image parts of `message`, biggest first, until the total size of
/// its part files is at most `limit`.
///
/// A part whose resize fails or is exhausted is set aside and the next
/// biggest image is tried. Returns [`MmsError::TooLarge`] once no image part
/// is left to shrink.
pub fn shrink_to_fit(
    message: &Message,
    resizer: &AttachmentResizer,
    limit: u64,
) -> Result<FitReport> {
    let mut data = message.lock();
    let initial_size = data.total_size();
    let mut report = FitReport {
        initial_size,
        final_size: initial_size,
        limit,
        resizes: Vec::new(),
    };
    let mut set_aside: Vec<usize> = Vec::new();

    loop {
        let size = data.total_size();
        report.final_size = size;
        if size <= limit {
            info!(
                object_id = message.object_id(),
                initial_size,
                size,
                limit,
                resizes = report.resizes.len(),
                "Message fits"
            );
            return Ok(report);
        }

        let Some(index) = data.largest_image_part(&set_aside) else {
            return Err(MmsError::TooLarge { size, limit });
        };
        let Some(part) = data.part_mut(index) else {
            return Err(MmsError::TooLarge { size, limit });
        };

        match resizer.resize(part) {
            Ok(outcome) => {
                if part.orig.is_none() {
                    // Later steps scale from the untouched original.
                    part.orig = Some(outcome.previous_file.clone());
                } else if part.orig.as_ref() != Some(&outcome.previous_file) {
                    match std::fs::remove_file(&outcome.previous_file) {
                        Ok(()) => {
                            debug!(path = %outcome.previous_file.display(), "Removed intermediate file")
                        }
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(MmsError::io(&outcome.previous_file, e)),
                    }
                }
                report.resizes.push((index, outcome));
            }
            Err(e) => {
                warn!(
                    part = index,
                    content_type = %part.content_type,
                    reason = e.reason_code(),
                    error = %e,
                    "Cannot shrink attachment further"
                );
                set_aside.push(index);
            }
        }
    }
}
