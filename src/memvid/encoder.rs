//! Builds a video memory: chunks → QR frames → container, plus the embedding index.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendRouter, ContainerRuntime, EncodeJob, ExternalRuntime};
use crate::codec::FrameCodec;
use crate::embed::{VecEmbedder, embedder_from_settings};
use crate::error::{MemvidError, Result};
use crate::index::EmbeddingIndex;
use crate::io::ContainerWriter;
use crate::reader::ExtractorRegistry;
use crate::text::chunk_text_within;
use crate::types::{BuildStats, Chunk, CodecProfile, FrameNumber, MemvidConfig, VideoCodec};

/// Pending-chunk summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderStats {
    pub total_chunks: usize,
    pub total_characters: usize,
    pub avg_chunk_size: f64,
}

pub struct Encoder {
    config: MemvidConfig,
    chunks: Vec<String>,
    router: BackendRouter,
    embedder: Arc<dyn VecEmbedder>,
    extractors: ExtractorRegistry,
    /// Chunk-text bytes one frame holds under every profile; computed on first use.
    text_budget: OnceCell<usize>,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("chunks", &self.chunks.len())
            .field("router", &self.router)
            .field("embedder", &self.embedder.model_name())
            .finish_non_exhaustive()
    }
}

impl Encoder {
    /// Validate `config`, probe the container runtime, and load the embedder named by
    /// `embedding.model`.
    pub fn new(config: MemvidConfig) -> Result<Self> {
        config.validate()?;
        let embedder = embedder_from_settings(&config.embedding)?;
        let runtime = ContainerRuntime::new(config.backend.clone());
        Self::with_parts(config, Box::new(runtime), embedder)
    }

    /// Construct with explicit collaborators.
    pub fn with_parts(
        config: MemvidConfig,
        runtime: Box<dyn ExternalRuntime>,
        embedder: Arc<dyn VecEmbedder>,
    ) -> Result<Self> {
        config.validate()?;
        let router = BackendRouter::new(runtime, config.backend.clone());
        Ok(Self {
            config,
            chunks: Vec::new(),
            router,
            embedder,
            extractors: ExtractorRegistry::default(),
            text_budget: OnceCell::new(),
        })
    }

    /// Chunk every document with the given window and collect the result.
    pub fn from_documents<S: AsRef<str>>(
        documents: &[S],
        chunk_size: usize,
        overlap: usize,
        config: MemvidConfig,
    ) -> Result<Self> {
        let mut encoder = Self::new(config)?;
        for document in documents {
            encoder.add_text(document.as_ref(), chunk_size, overlap)?;
        }
        Ok(encoder)
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        chunk_size: usize,
        overlap: usize,
        config: MemvidConfig,
    ) -> Result<Self> {
        let mut encoder = Self::new(config)?;
        let text = encoder.extractors.extract_text(path.as_ref())?;
        encoder.add_text(&text, chunk_size, overlap)?;
        Ok(encoder)
    }

    #[must_use]
    pub fn config(&self) -> &MemvidConfig {
        &self.config
    }

    #[must_use]
    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut BackendRouter {
        &mut self.router
    }

    /// Replace the extraction registry used by [`add_file`](Self::add_file).
    pub fn set_extractors(&mut self, extractors: ExtractorRegistry) {
        self.extractors = extractors;
    }

    #[must_use]
    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// Queue chunks as given. Empty and whitespace-only chunks are dropped; returns the
    /// number queued.
    pub fn add_chunks<I, S>(&mut self, chunks: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.chunks.len();
        let mut skipped = 0usize;
        for chunk in chunks {
            let chunk = chunk.into();
            if chunk.trim().is_empty() {
                skipped += 1;
            } else {
                self.chunks.push(chunk);
            }
        }
        if skipped > 0 {
            tracing::warn!(
                target = "memvid::encoder",
                skipped,
                "dropped empty chunks"
            );
        }
        let added = self.chunks.len() - before;
        tracing::debug!(
            target = "memvid::encoder",
            added,
            total = self.chunks.len(),
            "chunks added"
        );
        added
    }

    /// Chunk `text` and queue the pieces. Returns the number of chunks added.
    ///
    /// Windows are additionally capped so every chunk fits one frame of any configured
    /// profile, which matters for multi-byte scripts where 500 characters can exceed the
    /// QR capacity.
    pub fn add_text(&mut self, text: &str, chunk_size: usize, overlap: usize) -> Result<usize> {
        let budget = self.text_budget()?;
        let pieces = chunk_text_within(text, chunk_size, overlap, budget)?;
        Ok(self.add_chunks(pieces))
    }

    fn text_budget(&self) -> Result<usize> {
        self.text_budget
            .get_or_try_init(|| {
                let mut smallest: Option<FrameCodec> = None;
                for codec in VideoCodec::ALL {
                    let candidate = FrameCodec::new(&self.config.qr, &self.config.profile(codec))?;
                    if smallest
                        .as_ref()
                        .is_none_or(|current| candidate.max_version() < current.max_version())
                    {
                        smallest = Some(candidate);
                    }
                }
                Ok(smallest.map_or(0, |codec| codec.text_budget()))
            })
            .copied()
    }

    /// Extract text from a document and chunk it with the configured window.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let text = self.extractors.extract_text(path.as_ref())?;
        let (size, overlap) = (self.config.chunking.chunk_size, self.config.chunking.overlap);
        self.add_text(&text, size, overlap)
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    #[must_use]
    pub fn stats(&self) -> EncoderStats {
        let total_characters: usize = self.chunks.iter().map(|c| c.chars().count()).sum();
        EncoderStats {
            total_chunks: self.chunks.len(),
            total_characters,
            avg_chunk_size: if self.chunks.is_empty() {
                0.0
            } else {
                total_characters as f64 / self.chunks.len() as f64
            },
        }
    }

    /// Encode all pending chunks into `output` and write the index next to `index_path`.
    ///
    /// `codec` defaults to `video.codec` from the configuration. Chunk `i` is stored in frame
    /// `i`. High-density codecs go through the external backend, falling back to the baseline
    /// codec when allowed.
    pub fn build_video(
        &mut self,
        output: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        codec: Option<VideoCodec>,
    ) -> Result<BuildStats> {
        if self.chunks.is_empty() {
            return Err(MemvidError::EmptyBuild);
        }
        let output = output.as_ref();
        let requested = codec.unwrap_or(self.config.video.codec);
        let chunks = Chunk::sequence(&self.chunks);
        tracing::info!(
            target = "memvid::encoder",
            chunks = chunks.len(),
            codec = %requested,
            output = %output.display(),
            "building video"
        );

        if requested.is_high_density() {
            // Capacity problems are configuration errors; surface them before any backend work.
            check_capacity(&self.config, &self.config.profile(requested), &chunks)?;
            if self.config.backend.allow_fallback {
                // The baseline frame can be smaller than the requested one.
                let baseline = self.config.profile(VideoCodec::baseline());
                check_capacity(&self.config, &baseline, &chunks)?;
            }
        }

        let config = &self.config;
        let job = EncodeJob {
            chunks: &chunks,
            output,
            codec: requested,
            video: &config.video,
        };
        let outcome = self
            .router
            .encode(job, |profile| write_frames(config, profile, &chunks, output))?;

        let frame_numbers: Vec<FrameNumber> = chunks.iter().map(|chunk| chunk.frame).collect();
        let mut index = EmbeddingIndex::new(&self.config, Arc::clone(&self.embedder));
        index.add_chunks(&self.chunks, &frame_numbers)?;
        let index_file = index.save(index_path.as_ref())?;

        let video_size_bytes = fs_err::metadata(output)?.len();
        let fps = outcome.profile.fps;
        let stats = BuildStats {
            backend: outcome.backend,
            codec: outcome.codec,
            requested_codec: requested,
            total_chunks: chunks.len(),
            total_frames: frame_numbers.len(),
            video_file: PathBuf::from(output),
            index_file,
            video_size_bytes,
            fps,
            duration_seconds: frame_numbers.len() as f64 / f64::from(fps.max(1)),
            index_stats: index.stats(),
            external_sidecar: outcome.external_sidecar,
            warnings: outcome.warnings,
        };
        tracing::info!(
            target = "memvid::encoder",
            codec = %stats.codec,
            frames = stats.total_frames,
            bytes = stats.video_size_bytes,
            "video built"
        );
        Ok(stats)
    }
}

fn check_capacity(config: &MemvidConfig, profile: &CodecProfile, chunks: &[Chunk]) -> Result<()> {
    let codec = FrameCodec::new(&config.qr, profile)?;
    chunks
        .par_iter()
        .try_for_each(|chunk| codec.check_capacity(chunk))
}

/// In-process path: check every chunk, then write frames strictly in order.
fn write_frames(
    config: &MemvidConfig,
    profile: &CodecProfile,
    chunks: &[Chunk],
    output: &Path,
) -> Result<()> {
    check_capacity(config, profile, chunks)?;
    let codec = FrameCodec::new(&config.qr, profile)?;
    let mut writer = ContainerWriter::create(output, profile)?;
    for chunk in chunks {
        let raster = codec.encode(chunk)?;
        writer.write(&raster)?;
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::{ExternalRequest, ExternalResponse};
    use crate::constants::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
    use crate::embed::HashingEmbedder;
    use crate::types::{BackendKind, BackendStatus};

    struct AbsentRuntime;

    impl ExternalRuntime for AbsentRuntime {
        fn name(&self) -> &str {
            "absent"
        }

        fn probe(&self) -> BackendStatus {
            BackendStatus::NoRuntime
        }

        fn provision(&self) -> Result<()> {
            Err(MemvidError::ExternalInvocation {
                reason: "absent".into(),
            })
        }

        fn invoke(&self, _request: &ExternalRequest) -> Result<ExternalResponse> {
            Err(MemvidError::ExternalInvocation {
                reason: "absent".into(),
            })
        }
    }

    /// Reports ready and counts invocations; every invocation fails.
    struct CountingRuntime {
        invocations: Arc<AtomicUsize>,
    }

    impl ExternalRuntime for CountingRuntime {
        fn name(&self) -> &str {
            "counting"
        }

        fn probe(&self) -> BackendStatus {
            BackendStatus::Ready
        }

        fn provision(&self) -> Result<()> {
            Ok(())
        }

        fn invoke(&self, _request: &ExternalRequest) -> Result<ExternalResponse> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Err(MemvidError::ExternalInvocation {
                reason: "counting".into(),
            })
        }
    }

    fn encoder() -> Encoder {
        Encoder::with_parts(
            MemvidConfig::default(),
            Box::new(AbsentRuntime),
            Arc::new(HashingEmbedder::default()),
        )
        .expect("encoder")
    }

    #[test]
    fn empty_build_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp");
        let mut encoder = encoder();
        let err = encoder
            .build_video(dir.path().join("v.avi"), dir.path().join("i.json"), None)
            .expect_err("empty");
        assert!(matches!(err, MemvidError::EmptyBuild));
    }

    #[test]
    fn stats_track_pending_chunks() {
        let mut encoder = encoder();
        encoder.add_chunks(["ab", "abcd"]);
        let stats = encoder.stats();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_characters, 6);
        assert!((stats.avg_chunk_size - 3.0).abs() < f64::EPSILON);
        encoder.clear();
        assert_eq!(encoder.stats().total_chunks, 0);
    }

    #[test]
    fn oversized_chunk_fails_before_writing() {
        let dir = tempfile::tempdir().expect("tmp");
        let video = dir.path().join("v.avi");
        let mut encoder = encoder();
        encoder.add_chunks(["ok".to_string(), "z".repeat(5000)]);
        let err = encoder
            .build_video(&video, dir.path().join("i.json"), None)
            .expect_err("capacity");
        assert!(err.is_config_error());
        assert!(!video.exists());
    }

    #[test]
    fn mjpeg_build_is_in_process() {
        let dir = tempfile::tempdir().expect("tmp");
        let mut encoder = encoder();
        encoder.add_chunks(["first chunk", "second chunk"]);
        let stats = encoder
            .build_video(
                dir.path().join("v.avi"),
                dir.path().join("i.json"),
                Some(VideoCodec::Mjpeg),
            )
            .expect("build");
        assert_eq!(stats.backend, BackendKind::InProcess);
        assert_eq!(stats.codec, VideoCodec::Mjpeg);
        assert_eq!(stats.total_frames, 2);
        assert!(stats.warnings.is_empty());
        assert!(stats.video_size_bytes > 0);
    }

    #[test]
    fn blank_chunks_are_not_queued() {
        let dir = tempfile::tempdir().expect("tmp");
        let video = dir.path().join("v.avi");
        let mut encoder = encoder();
        assert_eq!(encoder.add_chunks(["", "   ", "beta", "\n\t"]), 1);
        assert_eq!(encoder.chunks(), ["beta".to_string()]);
        let stats = encoder
            .build_video(&video, dir.path().join("i.json"), None)
            .expect("build");
        assert_eq!(stats.total_frames, 1);
    }

    #[test]
    fn multibyte_text_with_default_window_builds() {
        let dir = tempfile::tempdir().expect("tmp");
        let mut encoder = encoder();
        let text = "日本語のテキストです。".repeat(60);
        let added = encoder
            .add_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
            .expect("chunk");
        assert!(added >= 2);
        let stats = encoder
            .build_video(dir.path().join("v.avi"), dir.path().join("i.json"), None)
            .expect("every chunk fits a frame");
        assert_eq!(stats.total_frames, added);
        assert!(
            encoder
                .chunks()
                .iter()
                .all(|chunk| chunk.chars().count() <= DEFAULT_CHUNK_SIZE)
        );
    }

    #[test]
    fn baseline_capacity_is_checked_before_the_backend_runs() {
        let dir = tempfile::tempdir().expect("tmp");
        let video = dir.path().join("v.mp4");
        let invocations = Arc::new(AtomicUsize::new(0));
        let runtime = CountingRuntime {
            invocations: Arc::clone(&invocations),
        };
        let mut encoder = Encoder::with_parts(
            MemvidConfig::default(),
            Box::new(runtime),
            Arc::new(HashingEmbedder::default()),
        )
        .expect("encoder");
        // Fits a 720px AV1 frame (version 38) but not the 512px fallback frame (version 25).
        encoder.add_chunks(["w".repeat(1500)]);
        let err = encoder
            .build_video(&video, dir.path().join("i.json"), Some(VideoCodec::Av1))
            .expect_err("fallback frame too small");
        assert!(matches!(
            err,
            MemvidError::CapacityExceeded {
                max_version: 25,
                ..
            }
        ));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert!(!video.exists());
    }

    #[test]
    fn av1_without_fallback_accepts_larger_chunks() {
        let mut config = MemvidConfig::default();
        config.backend.allow_fallback = false;
        let codec = FrameCodec::new(&config.qr, &config.profile(VideoCodec::Av1)).expect("codec");
        assert_eq!(codec.max_version(), 38);
        let chunks = Chunk::sequence(&["w".repeat(1500)]);
        check_capacity(&config, &config.profile(VideoCodec::Av1), &chunks)
            .expect("fits the requested profile");
    }

    #[test]
    fn add_file_uses_configured_window() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "word ".repeat(300)).unwrap();
        let mut encoder = encoder();
        let added = encoder.add_file(&path).unwrap();
        assert_eq!(added, encoder.chunks().len());
        assert!(added >= 3);
    }
}
