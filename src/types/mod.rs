//! Public types exposed by the `memvid-video` crate.

pub mod backend;
pub mod chunk;
pub mod index;
pub mod options;
pub mod profile;
pub mod search;

pub use backend::{BackendKind, BackendStatus, BuildStats, FallbackCause, Route};
pub use chunk::{Chunk, FrameNumber};
pub use index::{ChunkMetadata, IndexEntry, IndexHit, IndexKind, IndexStats};
pub use options::{
    BackendSettings, ChatSettings, ChunkingSettings, EmbeddingSettings, ErrorCorrection,
    IndexSettings, MemvidConfig, QrSettings, RetrievalSettings, VideoSettings,
};
pub use profile::{CodecProfile, VideoCodec};
pub use search::{FrameBatch, FrameFault, SearchHit};
