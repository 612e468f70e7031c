//! Embedding index records and statistics.

use serde::{Deserialize, Serialize};

use super::chunk::FrameNumber;

/// Nearest-neighbor structure backing the embedding index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exact L2 scan; best for small corpora.
    #[default]
    Flat,
    /// Inverted file over k-means clusters; needs one training pass.
    Ivf,
}

impl IndexKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Ivf => "ivf",
        }
    }
}

/// Metadata captured at index-build time for each chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub id: u64,
    pub text: String,
    pub frame: FrameNumber,
    /// Character count of `text`.
    pub length: usize,
}

/// Full view of one indexed chunk including its stored vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: u64,
    pub embedding: Vec<f32>,
    pub frame_number: FrameNumber,
    pub char_length: usize,
}

/// Ranked result from `EmbeddingIndex::search`; `metadata` is a snapshot, not a live reference.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk_id: u64,
    pub distance: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub total_frames: usize,
    pub index_kind: IndexKind,
    pub embedding_model: String,
    pub dimension: usize,
    pub avg_chunks_per_frame: f64,
}
