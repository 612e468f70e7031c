//! Backend routing state and build results.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::index::IndexStats;
use super::profile::VideoCodec;

/// Readiness of the external encoding backend, owned by one router instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Ready,
    ContainerMissing,
    NoRuntime,
    RuntimeNotRunning,
    #[default]
    Unknown,
}

impl BackendStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::ContainerMissing => "container_missing",
            Self::NoRuntime => "no_runtime",
            Self::RuntimeNotRunning => "runtime_not_running",
            Self::Unknown => "unknown",
        }
    }

    /// Human-readable explanation used in status reports and fallback warnings.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Ready => "external backend ready for high-density codecs",
            Self::ContainerMissing => "runtime available but the encoding environment is missing",
            Self::NoRuntime => "no container runtime found",
            Self::RuntimeNotRunning => "container runtime installed but not responding",
            Self::Unknown => "external backend state could not be determined",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which path produced a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    InProcess,
    External,
}

/// Reason a high-density request was downgraded to the baseline codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "cause")]
pub enum FallbackCause {
    /// The backend was not usable when the build started.
    Status { status: BackendStatus },
    /// Building the missing environment failed.
    ProvisionFailed { reason: String },
    /// The external invocation ran and failed (non-zero exit, timeout, missing output).
    InvocationFailed { reason: String },
}

impl fmt::Display for FallbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status } => write!(f, "{} ({status})", status.describe()),
            Self::ProvisionFailed { reason } => write!(f, "provisioning failed: {reason}"),
            Self::InvocationFailed { reason } => write!(f, "external encoding failed: {reason}"),
        }
    }
}

/// Encoding path chosen for a codec. A pure function of router status, flags, and codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    InProcess {
        codec: VideoCodec,
    },
    External {
        codec: VideoCodec,
        provision_first: bool,
    },
    Fallback {
        requested: VideoCodec,
        codec: VideoCodec,
        cause: FallbackCause,
    },
    Refuse {
        requested: VideoCodec,
        status: BackendStatus,
    },
}

/// Statistics returned by `Encoder::build_video`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    pub backend: BackendKind,
    /// Codec actually used for the container.
    pub codec: VideoCodec,
    pub requested_codec: VideoCodec,
    pub total_chunks: usize,
    pub total_frames: usize,
    pub video_file: PathBuf,
    pub index_file: PathBuf,
    pub video_size_bytes: u64,
    pub fps: u32,
    pub duration_seconds: f64,
    pub index_stats: IndexStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_sidecar: Option<PathBuf>,
    /// Fallback warnings emitted during the build.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
