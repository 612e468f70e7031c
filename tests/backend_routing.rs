//! Integration tests for high-density codec routing.
//! Tests: fallback to the baseline codec, refusal without fallback, external success

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use memvid_video::{
    BackendKind, BackendStatus, ContainerReader, EmbeddingSettings, Encoder, ExternalRequest,
    ExternalResponse, ExternalRuntime, HashingEmbedder, MemvidConfig, MemvidError, Result,
    Retriever, VideoCodec,
};
use tempfile::TempDir;

/// Scripted runtime: fixed status, and an invoke that either writes the output or fails.
struct Scripted {
    status: BackendStatus,
    succeed: bool,
    invocations: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(status: BackendStatus, succeed: bool) -> (Self, Arc<AtomicUsize>) {
        let invocations = Arc::new(AtomicUsize::new(0));
        (
            Self {
                status,
                succeed,
                invocations: Arc::clone(&invocations),
            },
            invocations,
        )
    }
}

impl ExternalRuntime for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn probe(&self) -> BackendStatus {
        self.status
    }

    fn provision(&self) -> Result<()> {
        Err(MemvidError::ExternalInvocation {
            reason: "no image definition".into(),
        })
    }

    fn invoke(&self, request: &ExternalRequest) -> Result<ExternalResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        assert!(request.work_dir.join(&request.input_name).is_file());
        assert!(request.work_dir.join(&request.profile_name).is_file());
        if !self.succeed {
            return Ok(ExternalResponse {
                exit_code: Some(2),
                video: request.output_path(),
                sidecar: None,
                stderr: "encoder crashed".into(),
            });
        }
        std::fs::write(request.output_path(), b"external container bytes")?;
        std::fs::write(request.sidecar_path(), br#"{"frames":2}"#)?;
        Ok(ExternalResponse {
            exit_code: Some(0),
            video: request.output_path(),
            sidecar: Some(request.sidecar_path()),
            stderr: String::new(),
        })
    }
}

fn config(allow_fallback: bool) -> MemvidConfig {
    let mut config = MemvidConfig::default();
    config.embedding = EmbeddingSettings::hashing();
    config.backend.allow_fallback = allow_fallback;
    config
}

fn encoder(runtime: Scripted, config: MemvidConfig) -> Encoder {
    let mut enc =
        Encoder::with_parts(config, Box::new(runtime), Arc::new(HashingEmbedder::default()))
            .unwrap();
    enc.add_chunks(["first chunk of text", "second chunk of text"]);
    enc
}

#[test]
fn unavailable_backend_falls_back_with_one_warning() {
    let dir = TempDir::new().unwrap();
    let video = dir.path().join("memory.mkv");
    let (runtime, invocations) = Scripted::new(BackendStatus::NoRuntime, true);
    let mut enc = encoder(runtime, config(true));

    let stats = enc
        .build_video(&video, dir.path().join("memory"), Some(VideoCodec::H265))
        .unwrap();
    assert_eq!(stats.backend, BackendKind::InProcess);
    assert_eq!(stats.codec, VideoCodec::Png);
    assert_eq!(stats.requested_codec, VideoCodec::H265);
    assert_eq!(stats.warnings.len(), 1);
    assert!(stats.warnings[0].contains("h265"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    // The fallback container keeps the requested path and stays readable.
    let retriever = Retriever::open(&video, dir.path().join("memory"), config(true)).unwrap();
    assert_eq!(retriever.decode_frames(&[0, 1]).len(), 2);
}

#[test]
fn fallback_disabled_refuses() {
    let dir = TempDir::new().unwrap();
    let video = dir.path().join("memory.mkv");
    let (runtime, _) = Scripted::new(BackendStatus::NoRuntime, true);
    let mut enc = encoder(runtime, config(false));

    let err = enc
        .build_video(&video, dir.path().join("memory"), Some(VideoCodec::H265))
        .unwrap_err();
    assert!(matches!(
        err,
        MemvidError::BackendUnavailable {
            codec: VideoCodec::H265,
            status: BackendStatus::NoRuntime,
        }
    ));
    assert!(!video.exists());
}

#[test]
fn failed_invocation_falls_back_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let video = dir.path().join("memory.mkv");
    let (runtime, invocations) = Scripted::new(BackendStatus::Ready, false);
    let mut enc = encoder(runtime, config(true));

    let stats = enc
        .build_video(&video, dir.path().join("memory"), Some(VideoCodec::H265))
        .unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(stats.codec, VideoCodec::Png);
    assert_eq!(stats.warnings.len(), 1);
    assert!(stats.warnings[0].contains("encoder crashed"));
    assert_eq!(ContainerReader::open(&video).unwrap().frame_count(), 2);
}

#[test]
fn ready_backend_produces_external_container() {
    let dir = TempDir::new().unwrap();
    let video = dir.path().join("memory.mkv");
    let (runtime, invocations) = Scripted::new(BackendStatus::Ready, true);
    let mut enc = encoder(runtime, config(true));

    let stats = enc
        .build_video(&video, dir.path().join("memory"), Some(VideoCodec::H265))
        .unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(stats.backend, BackendKind::External);
    assert_eq!(stats.codec, VideoCodec::H265);
    assert!(stats.warnings.is_empty());
    assert_eq!(std::fs::read(&video).unwrap(), b"external container bytes");
    let sidecar = stats.external_sidecar.expect("sidecar copied");
    assert_eq!(sidecar, dir.path().join("memory.backend.json"));
    assert_eq!(stats.index_stats.total_chunks, 2);
}

#[test]
fn routing_is_deterministic_for_a_status() {
    let (runtime, _) = Scripted::new(BackendStatus::ContainerMissing, true);
    let enc = encoder(runtime, config(true));
    let first = enc.router().plan(VideoCodec::Av1);
    for _ in 0..3 {
        assert_eq!(enc.router().plan(VideoCodec::Av1), first);
    }
    assert_eq!(enc.router().status(), BackendStatus::ContainerMissing);
}
