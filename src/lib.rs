#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::useless_vec,
        clippy::uninlined_format_args,
        clippy::cast_possible_truncation,
        clippy::float_cmp,
        clippy::cast_precision_loss
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: internal helpers are self-describing; public entry points carry docs.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Casts are bounded by frame counts, pixel sizes and vector dimensions.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
//
// Style
#![allow(clippy::too_many_lines)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::similar_names)] // frame_id, chunk_id, ...
#![allow(clippy::manual_let_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)] // constructors take owned configs
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::format_push_string)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::unreadable_literal)] // RIFF sizes and flags read better as hex
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::unused_self)]

/// The memvid-video crate version (matches `Cargo.toml`).
pub const MEMVID_VIDEO_VERSION: &str = env!("CARGO_PKG_VERSION");

// External encoding runtime and codec routing
pub mod backend;
pub mod codec;
pub mod constants;
pub mod embed;
pub mod error;
pub mod index;
// Frame containers: in-process AVI envelope, ffmpeg for everything else
pub mod io;
pub mod memvid;
mod process;
// Document text extraction for ingestion
pub mod reader;
pub mod text;
pub mod types;
pub mod vec;

// Local text embedding models - requires the ONNX runtime
#[cfg(feature = "vec")]
pub mod text_embed;

// API-based embedding providers (OpenAI, etc.) - requires network
#[cfg(feature = "api_embed")]
pub mod api_embed;

#[cfg(feature = "api_embed")]
pub use api_embed::OpenAIEmbedder;
pub use backend::{
    BackendRouter, ContainerRuntime, EncodeJob, EncodeOutcome, ExternalRequest,
    ExternalResponse, ExternalRuntime, should_use_external,
};
pub use codec::{FrameCodec, Raster, max_qr_version};
pub use embed::{HashingEmbedder, VecEmbedder, embedder_from_settings};
pub use error::{MemvidError, Result};
pub use index::EmbeddingIndex;
pub use io::{ContainerReader, ContainerWriter, FrameSpan, extract_frame};
pub use memvid::{
    AnswerBackend, ChatTurn, Conversation, ConversationStats, Encoder, EncoderStats, Responder,
    Retriever, RetrieverStats, SessionRecord,
};
pub use reader::{
    DocumentFormat, EpubExtractor, ExtractorRegistry, TextExtractor, extract_text,
};
pub use text::{chunk_text, chunk_text_within};
#[cfg(feature = "vec")]
pub use text_embed::{
    LocalTextEmbedder, TEXT_EMBED_MODELS, TextEmbedConfig, TextEmbedModelInfo,
    default_text_model_info, get_text_model_info,
};
pub use types::{
    BackendKind, BackendSettings, BackendStatus, BuildStats, ChatSettings, Chunk, ChunkMetadata,
    ChunkingSettings, CodecProfile, EmbeddingSettings, ErrorCorrection, FallbackCause,
    FrameBatch, FrameFault, FrameNumber, IndexEntry, IndexHit, IndexKind, IndexSettings,
    IndexStats, MemvidConfig, QrSettings, RetrievalSettings, Route, SearchHit, VideoCodec,
    VideoSettings,
};
pub use vec::{Neighbor, VectorIndex};
