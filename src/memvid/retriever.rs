//! Semantic retrieval over a built video memory.
//!
//! Searches are answered from the index alone; frames are decoded only when asked for,
//! on a bounded worker pool, with a bounded cache of decoded chunks.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::codec::FrameCodec;
use crate::embed::{VecEmbedder, embedder_from_settings};
use crate::error::{MemvidError, Result};
use crate::index::EmbeddingIndex;
use crate::io::ContainerReader;
use crate::types::{
    Chunk, ChunkMetadata, FrameBatch, FrameFault, FrameNumber, IndexStats, MemvidConfig,
    SearchHit, VideoCodec,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverStats {
    pub video_file: PathBuf,
    /// `None` when the container could not be opened.
    pub total_frames: Option<u64>,
    pub cache_size: usize,
    pub max_cache_size: usize,
    pub index_stats: IndexStats,
}

/// Insertion-ordered cache; the oldest entry is evicted first.
#[derive(Debug, Default)]
struct FrameCache {
    capacity: usize,
    order: VecDeque<FrameNumber>,
    entries: HashMap<FrameNumber, Chunk>,
}

impl FrameCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn get(&self, frame: FrameNumber) -> Option<Chunk> {
        self.entries.get(&frame).cloned()
    }

    fn insert(&mut self, frame: FrameNumber, chunk: Chunk) {
        if self.capacity == 0 || self.entries.contains_key(&frame) {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(frame);
        self.entries.insert(frame, chunk);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

pub struct Retriever {
    video: PathBuf,
    reader: Option<ContainerReader>,
    index: EmbeddingIndex,
    codec: FrameCodec,
    pool: rayon::ThreadPool,
    cache: Mutex<FrameCache>,
    config: MemvidConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("video", &self.video)
            .field("frames", &self.reader.as_ref().map(ContainerReader::frame_count))
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// Open `video` with the index at `index_path`, embedding queries with the model named
    /// by `config.embedding`.
    pub fn open(
        video: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        config: MemvidConfig,
    ) -> Result<Self> {
        let embedder = embedder_from_settings(&config.embedding)?;
        Self::with_embedder(video, index_path, config, embedder)
    }

    /// Open with an explicit query embedder; it must match the one used at build time.
    ///
    /// A container that cannot be opened is not fatal: searches still work and every frame
    /// decode reports [`FrameFault::ContainerUnavailable`].
    pub fn with_embedder(
        video: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        config: MemvidConfig,
        embedder: Arc<dyn VecEmbedder>,
    ) -> Result<Self> {
        config.validate()?;
        let video = video.as_ref().to_path_buf();
        let index = EmbeddingIndex::load(index_path.as_ref(), embedder)?;
        let reader =
            match ContainerReader::open_with_timeout(&video, config.retrieval.decode_timeout()) {
                Ok(reader) => Some(reader),
                Err(err) => {
                    tracing::warn!(
                        target = "memvid::retriever",
                        video = %video.display(),
                        error = %err,
                        "container unavailable; frame decoding disabled"
                    );
                    None
                }
            };
        // QR detection is independent of the profile; the baseline one is always valid.
        let profile = config.profile(VideoCodec::baseline());
        let codec = FrameCodec::new(&config.qr, &profile)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.retrieval.max_workers.max(1))
            .thread_name(|i| format!("memvid-decode-{i}"))
            .build()
            .map_err(|err| MemvidError::config(format!("decode pool: {err}")))?;
        tracing::info!(
            target = "memvid::retriever",
            video = %video.display(),
            chunks = index.len(),
            frames = ?reader.as_ref().map(ContainerReader::frame_count),
            "retriever opened"
        );
        Ok(Self {
            video,
            reader,
            index,
            codec,
            pool,
            cache: Mutex::new(FrameCache::new(config.retrieval.cache_size)),
            config,
        })
    }

    #[must_use]
    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    #[must_use]
    pub fn config(&self) -> &MemvidConfig {
        &self.config
    }

    /// Chunk texts most similar to `query`, best first.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        Ok(self
            .search_with_metadata(query, top_k)?
            .into_iter()
            .map(|hit| hit.text)
            .collect())
    }

    /// Ranked hits with scores, distances and frame provenance. Frames are not decoded.
    pub fn search_with_metadata(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let hits = self.index.search(query, top_k)?;
        tracing::debug!(
            target = "memvid::retriever",
            top_k,
            hits = hits.len(),
            "search"
        );
        Ok(hits
            .into_iter()
            .map(|hit| SearchHit {
                chunk_id: hit.chunk_id,
                frame: hit.metadata.frame,
                text: hit.metadata.text.clone(),
                score: 1.0 / (1.0 + hit.distance),
                distance: hit.distance,
                metadata: hit.metadata,
                verified: None,
            })
            .collect())
    }

    /// Search, then decode each hit's frame and record whether it reproduces the indexed text.
    pub fn search_verified(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let mut hits = self.search_with_metadata(query, top_k)?;
        let frames: Vec<FrameNumber> = hits.iter().map(|hit| hit.frame).collect();
        let batch = self.decode_frames(&frames);
        for hit in &mut hits {
            hit.verified = Some(batch.text(hit.frame) == Some(hit.text.as_str()));
        }
        Ok(hits)
    }

    /// Decode a set of frames in parallel. Duplicates are decoded once; a failing frame is
    /// reported in [`FrameBatch::failed`] and never aborts the rest.
    pub fn decode_frames(&self, frames: &[FrameNumber]) -> FrameBatch {
        let mut batch = FrameBatch::default();
        let mut pending: Vec<FrameNumber> = Vec::new();
        {
            let cache = self.lock_cache();
            for &frame in frames {
                if batch.decoded.contains_key(&frame) || pending.contains(&frame) {
                    continue;
                }
                match cache.get(frame) {
                    Some(chunk) => {
                        batch.decoded.insert(frame, chunk);
                    }
                    None => pending.push(frame),
                }
            }
        }
        if pending.is_empty() {
            return batch;
        }

        let results: Vec<(FrameNumber, std::result::Result<Chunk, FrameFault>)> =
            self.pool.install(|| {
                pending
                    .par_iter()
                    .map(|&frame| (frame, self.decode_one(frame)))
                    .collect()
            });

        let mut cache = self.lock_cache();
        for (frame, result) in results {
            match result {
                Ok(chunk) => {
                    cache.insert(frame, chunk.clone());
                    batch.decoded.insert(frame, chunk);
                }
                Err(fault) => {
                    tracing::debug!(
                        target = "memvid::retriever",
                        frame,
                        fault = %fault,
                        "frame decode failed"
                    );
                    batch.failed.insert(frame, fault);
                }
            }
        }
        batch
    }

    fn decode_one(&self, frame: FrameNumber) -> std::result::Result<Chunk, FrameFault> {
        let reader = self.reader.as_ref().ok_or(FrameFault::ContainerUnavailable)?;
        if frame >= reader.frame_count() {
            return Err(FrameFault::OutOfRange);
        }
        let raster = reader.frame(frame).ok_or(FrameFault::Unreadable)?;
        self.codec.decode_detailed(&raster, frame)
    }

    /// Decode one chunk by id through its frame.
    pub fn chunk(&self, chunk_id: u64) -> Option<Chunk> {
        let frame = self.index.frame_of(chunk_id)?;
        self.decode_frames(&[frame])
            .decoded
            .remove(&frame)
            .filter(|chunk| chunk.id == chunk_id)
    }

    /// Indexed metadata of `chunk_id` and up to `window` neighbors on either side, in id order.
    #[must_use]
    pub fn context_window(&self, chunk_id: u64, window: usize) -> Vec<&ChunkMetadata> {
        let window = window as u64;
        let start = chunk_id.saturating_sub(window);
        let last = (self.index.len() as u64).saturating_sub(1);
        let end = chunk_id.saturating_add(window).min(last);
        (start..=end).filter_map(|id| self.index.chunk(id)).collect()
    }

    #[must_use]
    pub fn stats(&self) -> RetrieverStats {
        RetrieverStats {
            video_file: self.video.clone(),
            total_frames: self.reader.as_ref().map(ContainerReader::frame_count),
            cache_size: self.lock_cache().len(),
            max_cache_size: self.config.retrieval.cache_size,
            index_stats: self.index.stats(),
        }
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, FrameCache> {
        // A poisoned cache only holds clones of decoded chunks; keep using it.
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::types::EmbeddingSettings;

    fn offline_config() -> MemvidConfig {
        MemvidConfig {
            embedding: EmbeddingSettings::hashing(),
            ..MemvidConfig::default()
        }
    }

    #[test]
    fn cache_evicts_oldest_first() {
        let mut cache = FrameCache::new(2);
        cache.insert(0, Chunk::new(0, "a"));
        cache.insert(1, Chunk::new(1, "b"));
        cache.insert(2, Chunk::new(2, "c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(0).is_none());
        assert_eq!(cache.get(2).map(|c| c.text), Some("c".to_string()));
    }

    #[test]
    fn zero_capacity_cache_stores_nothing() {
        let mut cache = FrameCache::new(0);
        cache.insert(0, Chunk::new(0, "a"));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn missing_container_still_searches() {
        let dir = tempfile::tempdir().expect("tmp");
        let config = offline_config();
        let mut index = EmbeddingIndex::new(&config, Arc::new(HashingEmbedder::default()));
        index.add_chunks(&["apples and pears", "rust borrow checker"], &[0, 1]).unwrap();
        let index_path = dir.path().join("memory");
        index.save(&index_path).unwrap();

        let retriever =
            Retriever::open(dir.path().join("absent.avi"), &index_path, config).expect("open");
        let hits = retriever.search("borrow checker", 1).unwrap();
        assert_eq!(hits, vec!["rust borrow checker".to_string()]);

        let batch = retriever.decode_frames(&[0, 1, 1]);
        assert!(batch.is_empty());
        assert_eq!(batch.failed.len(), 2);
        assert_eq!(batch.failed[&0], FrameFault::ContainerUnavailable);
        assert!(retriever.stats().total_frames.is_none());
    }

    #[test]
    fn context_window_clamps_at_edges() {
        let dir = tempfile::tempdir().expect("tmp");
        let config = offline_config();
        let mut index = EmbeddingIndex::new(&config, Arc::new(HashingEmbedder::default()));
        index.add_chunks(&["a", "b", "c", "d"], &[0, 1, 2, 3]).unwrap();
        let index_path = dir.path().join("memory");
        index.save(&index_path).unwrap();
        let retriever =
            Retriever::open(dir.path().join("absent.avi"), &index_path, config).expect("open");

        let ids: Vec<u64> = retriever.context_window(0, 1).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1]);
        let ids: Vec<u64> = retriever.context_window(2, 5).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[cfg(not(feature = "vec"))]
    #[test]
    fn default_model_is_not_silently_replaced() {
        let dir = tempfile::tempdir().expect("tmp");
        let embedder = Arc::new(HashingEmbedder::default());
        let mut index = EmbeddingIndex::new(&offline_config(), embedder);
        index.add_chunks(&["a"], &[0]).unwrap();
        let index_path = dir.path().join("memory");
        index.save(&index_path).unwrap();

        let video = dir.path().join("absent.avi");
        let err = Retriever::open(video, &index_path, MemvidConfig::default())
            .err()
            .expect("local model unavailable");
        assert!(err.is_config_error());
    }
}
