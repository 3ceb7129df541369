//! The reference-counted MMS message and its on-disk lifecycle.
//!
//! A [`Message`] is a cheap handle: cloning it (or calling [`Message::retain`])
//! adds a holder, dropping it (or calling [`Message::release`]) removes one.
//! When the last holder goes away the message is finalized exactly once, on
//! that holder's thread: every part's files are deleted in list order and the
//! part/message directories are removed if they are empty, unless
//! [`MessageFlags::KEEP_FILES`] is set.

use std::io;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::address::MmsAddress;
use super::part::MessagePart;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Message-level flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MessageFlags(u32);

impl MessageFlags {
    /// Leave part files and directories on disk when the message is destroyed.
    pub const KEEP_FILES: Self = Self(0x01);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// X-Mms-Priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// X-Mms-Message-Class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageClass {
    #[default]
    Personal,
    Advertisement,
    Informational,
    Auto,
}

/// Everything a message holds besides its reference count.
///
/// Reached through [`Message::lock`].
#[derive(Debug, Default, serde::Serialize)]
pub struct MessageData {
    /// Local database identifier.
    pub id: String,
    /// Message-ID assigned by the MMSC, once known.
    pub message_id: Option<String>,
    pub from: Option<MmsAddress>,
    pub to: Vec<MmsAddress>,
    pub cc: Vec<MmsAddress>,
    pub subject: Option<String>,
    pub class: MessageClass,
    pub priority: Priority,
    pub date: Option<DateTime<Utc>>,
    pub read_report_req: bool,
    pub delivery_report_req: bool,
    /// Directory holding the part files.
    pub parts_dir: Option<PathBuf>,
    /// Directory holding the message as a whole.
    pub msg_dir: Option<PathBuf>,
    pub flags: MessageFlags,
    /// In transmission order.
    parts: Vec<MessagePart>,
}

impl MessageData {
    /// Append a part. The message takes ownership of its files.
    pub fn add_part(&mut self, part: MessagePart) -> usize {
        self.parts.push(part);
        self.parts.len() - 1
    }

    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [MessagePart] {
        &mut self.parts
    }

    pub fn part_mut(&mut self, index: usize) -> Option<&mut MessagePart> {
        self.parts.get_mut(index)
    }

    pub fn keep_files(&self) -> bool {
        self.flags.contains(MessageFlags::KEEP_FILES)
    }

    /// Sum of the on-disk sizes of all parts' current files.
    pub fn total_size(&self) -> u64 {
        self.parts.iter().map(MessagePart::file_size).sum()
    }

    /// Index of the biggest image part by file size, ignoring `skip`.
    pub fn largest_image_part(&self, skip: &[usize]) -> Option<usize> {
        self.parts
            .iter()
            .enumerate()
            .filter(|(i, p)| p.is_image() && p.file.is_some() && !skip.contains(i))
            .max_by_key(|(i, p)| (p.file_size(), std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
    }
}

#[derive(Debug)]
struct Inner {
    object_id: u64,
    data: Mutex<MessageData>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let data = self.data.get_mut().unwrap_or_else(PoisonError::into_inner);
        finalize(self.object_id, data);
    }
}

/// Shared handle to an MMS message.
#[derive(Debug, Clone)]
pub struct Message {
    inner: Arc<Inner>,
}

impl Message {
    /// A new message with a single holder, normal priority, no parts and
    /// no flags.
    pub fn create() -> Self {
        Self::from_data(MessageData::default())
    }

    /// Wrap already-populated message data.
    pub fn from_data(data: MessageData) -> Self {
        let object_id = NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(object_id, id = %data.id, "Created message");
        Self {
            inner: Arc::new(Inner {
                object_id,
                data: Mutex::new(data),
            }),
        }
    }

    /// Add a holder and return its handle.
    pub fn retain(&self) -> Self {
        self.clone()
    }

    /// Give up this holder. The last release finalizes the message.
    pub fn release(self) {
        drop(self);
    }

    /// Number of live handles.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Process-unique identity, used in log output.
    pub fn object_id(&self) -> u64 {
        self.inner.object_id
    }

    /// Lock the message contents for reading or mutation.
    pub fn lock(&self) -> MutexGuard<'_, MessageData> {
        self.inner
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn finalize(object_id: u64, data: &mut MessageData) {
    let keep = data.keep_files();
    debug!(
        object_id,
        id = %data.id,
        parts = data.parts.len(),
        keep_files = keep,
        "Finalizing message"
    );

    for part in data.parts.drain(..) {
        part.remove_files(keep);
    }

    if !keep {
        if let Some(dir) = &data.parts_dir {
            remove_dir_if_empty(dir);
        }
        if let Some(dir) = &data.msg_dir {
            remove_dir_if_empty(dir);
        }
    }
}

/// Remove `dir` if empty. Never fails: outcomes are only logged.
fn remove_dir_if_empty(dir: &Path) {
    match std::fs::remove_dir(dir) {
        Ok(()) => debug!(dir = %dir.display(), "Deleted directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Directory already gone")
        }
        Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
            debug!(dir = %dir.display(), "Directory not empty, leaving it")
        }
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to delete directory"),
    }
}
