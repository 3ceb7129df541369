//! Centralized error types for mmsfit.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Why a resize sequence cannot continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedReason {
    /// The next step would exceed the configured maximum step count.
    StepLimit,
    /// The next target dimension would fall below the configured minimum.
    BelowMinimum,
}

impl fmt::Display for ExhaustedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepLimit => f.write_str("maximum resize step reached"),
            Self::BelowMinimum => f.write_str("target size below minimum"),
        }
    }
}

/// All errors produced by the mmsfit library.
#[derive(Error, Debug)]
pub enum MmsError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The source image could not be decoded.
    #[error("Cannot decode image '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    /// A single backend could not produce output.
    #[error("Backend '{backend}' failed: {reason}")]
    Backend { backend: String, reason: String },

    /// Every configured backend failed for this attempt.
    #[error("All image backends failed to resize '{0}'")]
    BackendsFailed(PathBuf),

    /// No further resize step is possible.
    #[error("Cannot resize further at step {step}: {reason}")]
    Exhausted { step: u32, reason: ExhaustedReason },

    /// The message is still over budget and nothing is left to shrink.
    #[error("Message is {size} bytes, over the {limit} byte limit, and cannot be shrunk further")]
    TooLarge { size: u64, limit: u64 },

    /// The part has no backing file to work with.
    #[error("Part has no backing file")]
    NoBackingFile,

    /// A backend name in the configuration is not known.
    #[error("Unknown image backend: {0}")]
    UnknownBackend(String),

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias for `Result<T, MmsError>`.
pub type Result<T> = std::result::Result<T, MmsError>;

impl MmsError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` when retrying cannot help and the attachment should be
    /// dropped or rejected.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Short, stable reason code for reporting a failed resize upstream.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Decode { .. } => "decode",
            Self::Backend { .. } => "backend",
            Self::BackendsFailed(_) => "backends-failed",
            Self::Exhausted { .. } => "exhausted",
            Self::TooLarge { .. } => "too-large",
            Self::NoBackingFile => "no-file",
            Self::UnknownBackend(_) => "unknown-backend",
            Self::InvalidConfig(_) => "config",
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `MmsError::io`).
impl From<std::io::Error> for MmsError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
