//! `mmsfit` — MMS message lifecycle and attachment downscaling.
//!
//! This crate provides the reference-counted message model, whose last
//! release cleans up the message's temporary files, and the attachment
//! resizer that shrinks oversized images step by step through a list of
//! interchangeable image backends.

pub mod config;
pub mod error;
pub mod model;
pub mod resize;

pub use error::{MmsError, Result};
