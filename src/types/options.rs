//! Configuration for building and reading a video memory.
//!
//! Every section has serde defaults, so a JSON file only needs the keys it overrides.
//! `MemvidConfig::validate` runs once when an encoder or retriever is constructed;
//! nothing re-checks the configuration per frame.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::index::IndexKind;
use super::profile::{CodecProfile, VideoCodec};
use crate::constants::{
    BACKEND_DEFINITION_DIR, BACKEND_ENTRYPOINT, BACKEND_IMAGE, BACKEND_SCRIPTS_DIR, CACHE_SIZE,
    CONTEXT_CHUNKS_PER_QUERY, DECODE_TIMEOUT, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
    DEFAULT_TOP_K, EMBEDDING_BATCH_SIZE, EMBEDDING_DIMENSION, EMBEDDING_MODEL, ENCODE_TIMEOUT,
    HASHING_EMBEDDING_MODEL, IMAGE_QUERY_TIMEOUT, IVF_NLIST, IVF_NPROBE, MAX_HISTORY_LENGTH,
    MAX_WORKERS, PROBE_TIMEOUT, PROVISION_TIMEOUT, QR_BORDER, QR_BOX_SIZE, QR_MAX_VERSION,
    RUNTIME_COMMANDS,
};
use crate::error::{MemvidError, Result};

fn default_true() -> bool {
    true
}

/// QR error-correction level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ErrorCorrection {
    L,
    #[default]
    M,
    Q,
    H,
}

impl ErrorCorrection {
    pub(crate) fn to_qr(self) -> qrcode::EcLevel {
        match self {
            Self::L => qrcode::EcLevel::L,
            Self::M => qrcode::EcLevel::M,
            Self::Q => qrcode::EcLevel::Q,
            Self::H => qrcode::EcLevel::H,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QrSettings {
    /// Fixed QR version (1-40). `None` picks the smallest version that fits each payload.
    pub version: Option<i16>,
    pub error_correction: ErrorCorrection,
    /// Pixels per QR module.
    pub box_size: u32,
    /// Quiet-zone width in modules.
    pub border: u32,
}

impl Default for QrSettings {
    fn default() -> Self {
        Self {
            version: None,
            error_correction: ErrorCorrection::M,
            box_size: QR_BOX_SIZE,
            border: QR_BORDER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VideoSettings {
    /// Codec used when the caller does not name one.
    pub codec: VideoCodec,
    /// Per-codec overrides; codecs missing here use `CodecProfile::for_codec`.
    pub profiles: BTreeMap<VideoCodec, CodecProfile>,
}

impl VideoSettings {
    #[must_use]
    pub fn profile(&self, codec: VideoCodec) -> CodecProfile {
        self.profiles
            .get(&codec)
            .cloned()
            .unwrap_or_else(|| CodecProfile::for_codec(codec))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Size of the frame decode worker pool.
    pub max_workers: usize,
    /// Number of decoded frames kept in memory.
    pub cache_size: usize,
    /// Timeout for decoding a frame through the external `ffmpeg` reader.
    pub decode_timeout_secs: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_workers: MAX_WORKERS,
            cache_size: CACHE_SIZE,
            decode_timeout_secs: DECODE_TIMEOUT.as_secs(),
        }
    }
}

impl RetrievalSettings {
    #[must_use]
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_secs(self.decode_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Local sentence-embedding model, or `memvid-hash-v1` for the offline hashing embedder.
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    /// Directory holding `model.onnx` and `tokenizer.json`. Defaults to
    /// `$MEMVID_MODELS_DIR/<model>`, then `models/<model>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: EMBEDDING_MODEL.to_string(),
            dimension: EMBEDDING_DIMENSION,
            batch_size: EMBEDDING_BATCH_SIZE,
            model_dir: None,
        }
    }
}

impl EmbeddingSettings {
    /// Offline feature-hashing embedder. Matches shared vocabulary only, not meaning.
    #[must_use]
    pub fn hashing() -> Self {
        Self {
            model: HASHING_EMBEDDING_MODEL.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_hashing(&self) -> bool {
        self.model == HASHING_EMBEDDING_MODEL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub kind: IndexKind,
    /// Number of IVF clusters.
    pub nlist: usize,
    /// Number of IVF clusters scanned per query.
    pub nprobe: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            kind: IndexKind::Flat,
            nlist: IVF_NLIST,
            nprobe: IVF_NPROBE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Runtime executables tried in order when probing (e.g. `docker`, `podman`).
    pub runtime_commands: Vec<String>,
    /// Name of the prebuilt execution environment.
    pub image: String,
    /// Directory holding the environment definition used by provisioning.
    pub definition_dir: PathBuf,
    /// Directory mounted into the environment as the script directory.
    pub scripts_dir: PathBuf,
    /// Script invoked inside the environment.
    pub entrypoint: String,
    /// Fall back to the baseline codec when the external path is unavailable or fails.
    #[serde(default = "default_true")]
    pub allow_fallback: bool,
    /// Build the environment automatically when it is missing.
    pub auto_provision: bool,
    pub probe_timeout_secs: u64,
    pub image_query_timeout_secs: u64,
    pub provision_timeout_secs: u64,
    pub encode_timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            runtime_commands: RUNTIME_COMMANDS.iter().map(ToString::to_string).collect(),
            image: BACKEND_IMAGE.to_string(),
            definition_dir: PathBuf::from(BACKEND_DEFINITION_DIR),
            scripts_dir: PathBuf::from(BACKEND_SCRIPTS_DIR),
            entrypoint: BACKEND_ENTRYPOINT.to_string(),
            allow_fallback: true,
            auto_provision: false,
            probe_timeout_secs: PROBE_TIMEOUT.as_secs(),
            image_query_timeout_secs: IMAGE_QUERY_TIMEOUT.as_secs(),
            provision_timeout_secs: PROVISION_TIMEOUT.as_secs(),
            encode_timeout_secs: ENCODE_TIMEOUT.as_secs(),
        }
    }
}

impl BackendSettings {
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub fn image_query_timeout(&self) -> Duration {
        Duration::from_secs(self.image_query_timeout_secs)
    }

    #[must_use]
    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    #[must_use]
    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub max_history: usize,
    pub context_chunks: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_history: MAX_HISTORY_LENGTH,
            context_chunks: CONTEXT_CHUNKS_PER_QUERY,
        }
    }
}

/// Complete configuration; serialized into the index sidecar for provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemvidConfig {
    pub qr: QrSettings,
    pub video: VideoSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub backend: BackendSettings,
    pub chat: ChatSettings,
}

impl MemvidConfig {
    /// Load a JSON configuration file; missing keys take their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs_err::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs_err::write(path.as_ref(), json)?;
        Ok(())
    }

    #[must_use]
    pub fn profile(&self, codec: VideoCodec) -> CodecProfile {
        self.video.profile(codec)
    }

    /// Check every codec profile against the QR geometry and numeric ranges.
    pub fn validate(&self) -> Result<()> {
        if let Some(version) = self.qr.version {
            if !(1..=QR_MAX_VERSION).contains(&version) {
                return Err(MemvidError::config(format!(
                    "QR version {version} outside 1..={QR_MAX_VERSION}"
                )));
            }
        }
        if self.qr.box_size == 0 {
            return Err(MemvidError::config("QR box size must be non-zero"));
        }
        for (codec, profile) in &self.video.profiles {
            if *codec != profile.codec {
                return Err(MemvidError::config(format!(
                    "profile registered under {codec} declares codec {}",
                    profile.codec
                )));
            }
        }
        for codec in VideoCodec::ALL {
            let profile = self.profile(codec);
            profile.check_basics()?;
            crate::codec::max_qr_version(&self.qr, &profile)?;
        }
        if self.chunking.chunk_size == 0 || self.chunking.overlap >= self.chunking.chunk_size {
            return Err(MemvidError::config(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.max_workers == 0 {
            return Err(MemvidError::config("retrieval.max_workers must be non-zero"));
        }
        if self.embedding.dimension == 0 || self.embedding.batch_size == 0 {
            return Err(MemvidError::config(
                "embedding dimension and batch size must be non-zero",
            ));
        }
        if self.index.kind == IndexKind::Ivf && (self.index.nlist == 0 || self.index.nprobe == 0) {
            return Err(MemvidError::config("IVF nlist and nprobe must be non-zero"));
        }
        Ok(())
    }
}
