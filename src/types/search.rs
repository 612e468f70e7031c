//! Retrieval results and per-frame decode outcomes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::chunk::{Chunk, FrameNumber};
use super::index::ChunkMetadata;

/// A ranked retrieval hit with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: u64,
    pub frame: FrameNumber,
    /// Text captured at index-build time.
    pub text: String,
    /// `1 / (1 + distance)`; higher is better.
    pub score: f32,
    pub distance: f32,
    pub metadata: ChunkMetadata,
    /// Set by verified searches: whether the frame decoded to the same text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

/// Why a single frame could not be turned back into a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FrameFault {
    /// The container could not be opened or read.
    ContainerUnavailable,
    /// The frame number is beyond the end of the container.
    OutOfRange,
    /// The stored frame bytes did not decode into a raster.
    Unreadable,
    /// No QR pattern was found or none of the found patterns decoded.
    NoPattern,
    /// The recovered payload is not a chunk record.
    Malformed,
    /// The payload names a different chunk or frame than the one requested.
    Mismatch { id: u64, frame: FrameNumber },
}

impl fmt::Display for FrameFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContainerUnavailable => f.write_str("container unavailable"),
            Self::OutOfRange => f.write_str("frame out of range"),
            Self::Unreadable => f.write_str("frame unreadable"),
            Self::NoPattern => f.write_str("no decodable QR pattern"),
            Self::Malformed => f.write_str("malformed payload"),
            Self::Mismatch { id, frame } => {
                write!(f, "payload belongs to chunk {id} / frame {frame}")
            }
        }
    }
}

/// Outcome of decoding a set of frames; individual failures never abort the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameBatch {
    pub decoded: BTreeMap<FrameNumber, Chunk>,
    pub failed: BTreeMap<FrameNumber, FrameFault>,
}

impl FrameBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.decoded.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoded.is_empty()
    }

    #[must_use]
    pub fn text(&self, frame: FrameNumber) -> Option<&str> {
        self.decoded.get(&frame).map(|chunk| chunk.text.as_str())
    }
}
