//! Error types shared across the crate.
//!
//! Fatal kinds (configuration, shape, IO, index corruption) escape as `MemvidError`.
//! Per-frame decode failures never become errors; they are reported as
//! [`FrameFault`](crate::types::FrameFault) values inside batch results.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{BackendStatus, VideoCodec};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MemvidError>;

#[derive(Debug, Error)]
pub enum MemvidError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error(
        "chunk {chunk_id} serializes to {bytes} bytes which exceeds QR capacity (max version {max_version})"
    )]
    CapacityExceeded {
        chunk_id: u64,
        bytes: usize,
        max_version: i16,
    },

    #[error("shape mismatch: {chunks} chunks but {frames} frame numbers")]
    ShapeMismatch { chunks: usize, frames: usize },

    #[error("no chunks to encode; add chunks before building")]
    EmptyBuild,

    #[error("codec '{codec}' requires the external backend but it is unavailable ({status})")]
    BackendUnavailable {
        codec: VideoCodec,
        status: BackendStatus,
    },

    #[error("external backend invocation failed: {reason}")]
    ExternalInvocation { reason: String },

    #[error("container writer is poisoned after a failed write; abort the build")]
    ContainerPoisoned,

    #[error("invalid container {path}: {reason}")]
    InvalidContainer { path: PathBuf, reason: String },

    #[error("vector index requires training before insertion")]
    IndexNotTrained,

    #[error("index artifact is corrupted: {reason}")]
    IndexCorrupted { reason: String },

    #[error("failed to encode vector index: {0}")]
    IndexEncode(#[from] bincode::error::EncodeError),

    #[error("failed to decode vector index: {0}")]
    IndexDecode(#[from] bincode::error::DecodeError),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    VecDimensionMismatch { expected: usize, actual: usize },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("embedding provider failed: {reason}")]
    Embedding { reason: String },

    #[error("text extraction failed for {path}: {reason}")]
    ExtractionFailed { path: PathBuf, reason: String },

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MemvidError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error is a configuration problem that retrying cannot fix.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::CapacityExceeded { .. })
    }
}
