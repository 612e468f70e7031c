//! Default values for configuration sections and fixed protocol names.

use std::time::Duration;

// QR layout
pub const QR_BOX_SIZE: u32 = 4;
pub const QR_BORDER: u32 = 4;
pub const QR_MAX_VERSION: i16 = 40;

// Video
pub const VIDEO_FPS: u32 = 30;
pub const FRAME_WIDTH: u32 = 512;
pub const FRAME_HEIGHT: u32 = 512;
pub const MJPEG_QUALITY: u8 = 95;

// Chunking
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

// Retrieval
pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_WORKERS: usize = 4;
pub const CACHE_SIZE: usize = 1000;
pub const DECODE_TIMEOUT: Duration = Duration::from_secs(10);

// Embedding
pub const EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
/// Offline feature-hashing embedder; must be selected explicitly.
pub const HASHING_EMBEDDING_MODEL: &str = "memvid-hash-v1";
pub const EMBEDDING_DIMENSION: usize = 384;
pub const EMBEDDING_BATCH_SIZE: usize = 32;
/// Base directory for local model exports when `embedding.model_dir` is unset.
pub const TEXT_MODELS_DIR: &str = "models";
pub const TEXT_MODELS_DIR_ENV: &str = "MEMVID_MODELS_DIR";
pub const TEXT_MODEL_FILE: &str = "model.onnx";
pub const TEXT_TOKENIZER_FILE: &str = "tokenizer.json";

// Vector index
pub const IVF_NLIST: usize = 100;
pub const IVF_NPROBE: usize = 8;
pub const IVF_TRAIN_ITERATIONS: usize = 20;

// Conversation
pub const MAX_HISTORY_LENGTH: usize = 10;
pub const CONTEXT_CHUNKS_PER_QUERY: usize = 5;

// External backend
pub const RUNTIME_COMMANDS: &[&str] = &["docker"];
pub const BACKEND_IMAGE: &str = "memvid-h265";
pub const BACKEND_DEFINITION_DIR: &str = "docker";
pub const BACKEND_SCRIPTS_DIR: &str = "docker/scripts";
pub const BACKEND_ENTRYPOINT: &str = "encode_frames.py";
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const IMAGE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const PROVISION_TIMEOUT: Duration = Duration::from_secs(300);
pub const ENCODE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Work-directory file names of the external encoding protocol.
pub const EXTERNAL_INPUT_FILE: &str = "chunks.json";
pub const EXTERNAL_OUTPUT_STEM: &str = "output";
pub const EXTERNAL_PROFILE_FILE: &str = "profile.json";
pub const EXTERNAL_MOUNT_DATA: &str = "/data";
pub const EXTERNAL_MOUNT_SCRIPTS: &str = "/scripts";

/// Codec names routed to the external backend.
pub const HIGH_DENSITY_CODECS: &[&str] = &[
    "h265",
    "hevc",
    "libx265",
    "h264",
    "avc",
    "libx264",
    "av1",
    "libaom-av1",
];

// Index artifact extensions
pub const INDEX_VECTORS_EXTENSION: &str = "vec";
pub const INDEX_SIDECAR_EXTENSION: &str = "json";
pub const INDEX_SIDECAR_VERSION: u32 = 1;
pub const INDEX_COMPRESSION_LEVEL: i32 = 3;
