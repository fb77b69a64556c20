//! Error type shared by every module of the crate.
//!
//! Lifecycle misuse (loading something twice, unloading something that was never
//! loaded) is not an error: those calls are logged and ignored. Everything below is
//! surfaced to the caller, who decides whether it is fatal (startup) or recoverable
//! (hot-reload).

use std::path::PathBuf;

use crate::device::{FramebufferStatus, ShaderStage};
use crate::resource::gbuffer::MAX_SLOTS;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device refused to create a native object.
    #[error("failed to allocate {kind} for '{name}': {reason}")]
    Allocation {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// An operation needed a loaded entity.
    #[error("'{name}' must be loaded before {operation}")]
    NotLoaded {
        name: String,
        operation: &'static str,
    },

    #[error("resource '{0}' not found")]
    NotFound(String),

    #[error("resource '{name}' is a {actual}, not a {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Shader source was rejected. `diagnostic` is the full compiler output.
    #[error("shader '{name}' failed to compile:\n{diagnostic}")]
    Compile { name: String, diagnostic: String },

    #[error("program '{name}' failed to link: {diagnostic}")]
    Link { name: String, diagnostic: String },

    #[error("program '{name}' already has a {stage} shader")]
    DuplicateStage { name: String, stage: ShaderStage },

    #[error("texture slot {slot} is out of range (0..{})", MAX_SLOTS)]
    SlotRange { slot: usize },

    #[error("texture slot {slot} of '{name}' has no bound texture")]
    SlotNotBound { name: String, slot: usize },

    #[error("framebuffer '{name}' is incomplete: {status}")]
    FramebufferIncomplete {
        name: String,
        status: FramebufferStatus,
    },

    #[error("shader source '{identifier}' not found (searched {searched:?})")]
    SourceNotFound {
        identifier: String,
        searched: Vec<PathBuf>,
    },

    #[error("upload to '{name}' expected {expected} bytes, got {actual}")]
    InvalidUpload {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported pixel layout: {0}")]
    UnsupportedPixelLayout(String),

    /// Backend failure that has no better classification (adapter lost, readback failed).
    #[error("graphics device error: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn not_loaded(name: &str, operation: &'static str) -> Self {
        Error::NotLoaded {
            name: name.to_string(),
            operation,
        }
    }

    pub(crate) fn allocation(kind: &'static str, name: &str, reason: impl Into<String>) -> Self {
        Error::Allocation {
            kind,
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
