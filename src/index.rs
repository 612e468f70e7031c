//! Embedding index: chunk vectors, chunk↔frame mappings and build-time metadata.
//!
//! Persisted as two files sharing a stem: `<stem>.vec` holds the compressed vector index and
//! `<stem>.json` the sidecar with metadata, mappings, configuration and the `.vec` checksum.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atomic_write_file::AtomicWriteFile;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::{INDEX_SIDECAR_EXTENSION, INDEX_SIDECAR_VERSION, INDEX_VECTORS_EXTENSION};
use crate::embed::VecEmbedder;
use crate::error::{MemvidError, Result};
use crate::types::{
    ChunkMetadata, FrameNumber, IndexEntry, IndexHit, IndexKind, IndexStats, MemvidConfig,
};
use crate::vec::VectorIndex;

/// Paths of the vector file and sidecar for an index path (its extension is replaced).
#[must_use]
pub fn artifact_paths(path: &Path) -> (PathBuf, PathBuf) {
    (
        path.with_extension(INDEX_VECTORS_EXTENSION),
        path.with_extension(INDEX_SIDECAR_EXTENSION),
    )
}

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    version: u32,
    embedding_model: String,
    dimension: usize,
    index_kind: IndexKind,
    metadata: Vec<ChunkMetadata>,
    chunk_to_frame: BTreeMap<u64, FrameNumber>,
    frame_to_chunks: BTreeMap<FrameNumber, Vec<u64>>,
    config: MemvidConfig,
    /// BLAKE3 of the `.vec` file, hex encoded.
    checksum: String,
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    let mut file = AtomicWriteFile::open(path)?;
    file.write_all(bytes)?;
    file.commit()?;
    Ok(())
}

pub struct EmbeddingIndex {
    embedder: Arc<dyn VecEmbedder>,
    config: MemvidConfig,
    vectors: VectorIndex,
    /// Indexed by chunk id.
    metadata: Vec<ChunkMetadata>,
    chunk_to_frame: BTreeMap<u64, FrameNumber>,
    frame_to_chunks: BTreeMap<FrameNumber, Vec<u64>>,
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("model", &self.embedder.model_name())
            .field("kind", &self.vectors.kind())
            .field("chunks", &self.metadata.len())
            .finish_non_exhaustive()
    }
}

impl EmbeddingIndex {
    /// Empty index; the vector dimension is taken from the embedder.
    #[must_use]
    pub fn new(config: &MemvidConfig, embedder: Arc<dyn VecEmbedder>) -> Self {
        let vectors = VectorIndex::new(&config.index, embedder.embedding_dimension());
        Self {
            embedder,
            config: config.clone(),
            vectors,
            metadata: Vec::new(),
            chunk_to_frame: BTreeMap::new(),
            frame_to_chunks: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn VecEmbedder> {
        &self.embedder
    }

    /// Embed and insert chunks; `frame_numbers[i]` is the frame holding `chunks[i]`.
    ///
    /// Returns the assigned chunk ids, which continue from the current size. A blank chunk
    /// rejects the whole call before anything is embedded.
    pub fn add_chunks<S>(&mut self, chunks: &[S], frame_numbers: &[FrameNumber]) -> Result<Vec<u64>>
    where
        S: AsRef<str> + Sync,
    {
        if chunks.len() != frame_numbers.len() {
            return Err(MemvidError::ShapeMismatch {
                chunks: chunks.len(),
                frames: frame_numbers.len(),
            });
        }
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(position) = chunks.iter().position(|chunk| chunk.as_ref().trim().is_empty()) {
            return Err(MemvidError::config(format!(
                "chunk at position {position} is empty; chunk text must be non-empty"
            )));
        }

        let texts: Vec<&str> = chunks.iter().map(AsRef::as_ref).collect();
        let batch_size = self.config.embedding.batch_size.max(1);
        let embedder = &self.embedder;
        let batches = texts
            .par_chunks(batch_size)
            .map(|batch| embedder.embed_chunks(batch))
            .collect::<Result<Vec<_>>>()?;
        let embeddings: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        if embeddings.len() != texts.len() {
            return Err(MemvidError::Embedding {
                reason: format!(
                    "embedder returned {} vectors for {} chunks",
                    embeddings.len(),
                    texts.len()
                ),
            });
        }

        if self.vectors.requires_training() && !self.vectors.is_trained() {
            tracing::info!(
                target = "memvid::index",
                samples = embeddings.len(),
                kind = self.vectors.kind().label(),
                "training vector index"
            );
            self.vectors.train(&embeddings)?;
        }

        let start = self.metadata.len() as u64;
        self.vectors.add(embeddings)?;

        let mut ids = Vec::with_capacity(texts.len());
        for (offset, (text, &frame)) in texts.iter().zip(frame_numbers).enumerate() {
            let id = start + offset as u64;
            self.metadata.push(ChunkMetadata {
                id,
                text: (*text).to_string(),
                frame,
                length: text.chars().count(),
            });
            self.chunk_to_frame.insert(id, frame);
            self.frame_to_chunks.entry(frame).or_default().push(id);
            ids.push(id);
        }
        tracing::debug!(
            target = "memvid::index",
            added = ids.len(),
            total = self.metadata.len(),
            "chunks indexed"
        );
        Ok(ids)
    }

    /// Nearest chunks to `query`, ascending by squared L2 distance.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<IndexHit>> {
        if top_k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if query.trim().is_empty() {
            return Err(MemvidError::InvalidQuery {
                reason: "query text is empty".into(),
            });
        }
        let embedding = self.embedder.embed_query(query)?;
        let neighbors = self.vectors.search(&embedding, top_k)?;
        Ok(neighbors
            .into_iter()
            .filter(|neighbor| !neighbor.is_sentinel())
            .filter_map(|neighbor| {
                let metadata = self.metadata.get(neighbor.id as usize)?;
                Some(IndexHit {
                    chunk_id: metadata.id,
                    distance: neighbor.distance,
                    metadata: metadata.clone(),
                })
            })
            .collect())
    }

    #[must_use]
    pub fn chunk(&self, chunk_id: u64) -> Option<&ChunkMetadata> {
        self.metadata.get(usize::try_from(chunk_id).ok()?)
    }

    #[must_use]
    pub fn frame_of(&self, chunk_id: u64) -> Option<FrameNumber> {
        self.chunk_to_frame.get(&chunk_id).copied()
    }

    /// Chunks stored in `frame`, in insertion order.
    #[must_use]
    pub fn chunks_by_frame(&self, frame: FrameNumber) -> Vec<&ChunkMetadata> {
        self.frame_to_chunks
            .get(&frame)
            .into_iter()
            .flatten()
            .filter_map(|id| self.chunk(*id))
            .collect()
    }

    #[must_use]
    pub fn frame_to_chunks(&self) -> &BTreeMap<FrameNumber, Vec<u64>> {
        &self.frame_to_chunks
    }

    #[must_use]
    pub fn entry(&self, chunk_id: u64) -> Option<IndexEntry> {
        let metadata = self.chunk(chunk_id)?;
        let embedding = self.vectors.vector(usize::try_from(chunk_id).ok()?)?;
        Some(IndexEntry {
            chunk_id,
            embedding: embedding.to_vec(),
            frame_number: metadata.frame,
            char_length: metadata.length,
        })
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let total_frames = self.frame_to_chunks.len();
        IndexStats {
            total_chunks: self.metadata.len(),
            total_frames,
            index_kind: self.vectors.kind(),
            embedding_model: self.embedder.model_name().to_string(),
            dimension: self.vectors.dimension(),
            avg_chunks_per_frame: if total_frames == 0 {
                0.0
            } else {
                self.metadata.len() as f64 / total_frames as f64
            },
        }
    }

    /// Write `<stem>.vec` and `<stem>.json`; returns the sidecar path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let (vec_path, sidecar_path) = artifact_paths(path.as_ref());
        let bytes = self.vectors.to_bytes()?;
        write_atomic(&vec_path, &bytes)?;

        let sidecar = Sidecar {
            version: INDEX_SIDECAR_VERSION,
            embedding_model: self.embedder.model_name().to_string(),
            dimension: self.vectors.dimension(),
            index_kind: self.vectors.kind(),
            metadata: self.metadata.clone(),
            chunk_to_frame: self.chunk_to_frame.clone(),
            frame_to_chunks: self.frame_to_chunks.clone(),
            config: self.config.clone(),
            checksum: blake3::hash(&bytes).to_hex().to_string(),
        };
        write_atomic(&sidecar_path, &serde_json::to_vec_pretty(&sidecar)?)?;
        tracing::info!(
            target = "memvid::index",
            path = %sidecar_path.display(),
            chunks = self.metadata.len(),
            "index saved"
        );
        Ok(sidecar_path)
    }

    /// Load an index written by [`save`](Self::save). The embedder must match the stored
    /// dimension.
    pub fn load(path: impl AsRef<Path>, embedder: Arc<dyn VecEmbedder>) -> Result<Self> {
        let (vec_path, sidecar_path) = artifact_paths(path.as_ref());
        let sidecar: Sidecar = serde_json::from_slice(&fs_err::read(&sidecar_path)?)?;
        let bytes = fs_err::read(&vec_path)?;

        let checksum = blake3::hash(&bytes).to_hex().to_string();
        if checksum != sidecar.checksum {
            return Err(MemvidError::IndexCorrupted {
                reason: format!("{} checksum mismatch", vec_path.display()),
            });
        }
        let vectors = VectorIndex::from_bytes(&bytes)?;
        if vectors.dimension() != embedder.embedding_dimension() {
            return Err(MemvidError::VecDimensionMismatch {
                expected: vectors.dimension(),
                actual: embedder.embedding_dimension(),
            });
        }
        if vectors.len() != sidecar.metadata.len()
            || sidecar.metadata.iter().enumerate().any(|(i, m)| m.id != i as u64)
        {
            return Err(MemvidError::IndexCorrupted {
                reason: format!(
                    "{} vectors but {} metadata records",
                    vectors.len(),
                    sidecar.metadata.len()
                ),
            });
        }
        if sidecar.embedding_model != embedder.model_name() {
            tracing::warn!(
                target = "memvid::index",
                stored = %sidecar.embedding_model,
                embedder = %embedder.model_name(),
                "index was built with a different embedding model"
            );
        }

        Ok(Self {
            embedder,
            config: sidecar.config,
            vectors,
            metadata: sidecar.metadata,
            chunk_to_frame: sidecar.chunk_to_frame,
            frame_to_chunks: sidecar.frame_to_chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::types::IndexSettings;

    fn index() -> EmbeddingIndex {
        EmbeddingIndex::new(&MemvidConfig::default(), Arc::new(HashingEmbedder::default()))
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut index = index();
        let err = index.add_chunks(&["a", "b"], &[0]).expect_err("mismatch");
        assert!(matches!(err, MemvidError::ShapeMismatch { chunks: 2, frames: 1 }));
    }

    #[test]
    fn blank_chunks_are_rejected_before_embedding() {
        let mut index = index();
        let err = index
            .add_chunks(&["", "   ", "beta"], &[0, 1, 2])
            .expect_err("blank text");
        assert!(err.is_config_error());
        assert!(index.is_empty());
        assert_eq!(index.add_chunks(&["beta"], &[0]).unwrap(), vec![0]);
    }

    #[test]
    fn ids_continue_across_batches() {
        let mut index = index();
        assert_eq!(index.add_chunks(&["a", "b"], &[0, 1]).unwrap(), vec![0, 1]);
        assert_eq!(index.add_chunks(&["c"], &[2]).unwrap(), vec![2]);
        assert_eq!(index.chunk(2).unwrap().text, "c");
        assert_eq!(index.frame_of(1), Some(1));
        assert_eq!(index.entry(2).unwrap().embedding.len(), 384);
    }

    #[test]
    fn exact_text_ranks_first() {
        let mut index = index();
        index
            .add_chunks(
                &["rust ownership rules", "python garbage collection", "video codecs"],
                &[0, 1, 2],
            )
            .unwrap();
        let hits = index.search("video codecs", 3).unwrap();
        assert_eq!(hits[0].metadata.text, "video codecs");
        assert!(hits[0].distance < 1e-6);
        assert!(index.search("anything", 0).unwrap().is_empty());
    }

    #[test]
    fn one_frame_may_hold_many_chunks() {
        let mut index = index();
        index.add_chunks(&["a", "b", "c"], &[0, 0, 1]).unwrap();
        let texts: Vec<&str> = index.chunks_by_frame(0).iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        let stats = index.stats();
        assert_eq!(stats.total_frames, 2);
        assert!((stats.avg_chunks_per_frame - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn ivf_trains_on_first_batch() {
        let mut config = MemvidConfig::default();
        config.index = IndexSettings {
            kind: IndexKind::Ivf,
            nlist: 4,
            nprobe: 4,
        };
        let mut index = EmbeddingIndex::new(&config, Arc::new(HashingEmbedder::default()));
        let texts: Vec<String> = (0..12).map(|i| format!("document number {i}")).collect();
        let frames: Vec<u64> = (0..12).collect();
        index.add_chunks(&texts, &frames).unwrap();
        index.add_chunks(&["late arrival"], &[12]).unwrap();
        let hits = index.search("late arrival", 1).unwrap();
        assert_eq!(hits[0].chunk_id, 12);
    }

    #[test]
    fn tampered_vectors_are_detected() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("memory.json");
        let mut index = index();
        index.add_chunks(&["x"], &[0]).unwrap();
        index.save(&path).unwrap();

        let (vec_path, _) = artifact_paths(&path);
        let mut bytes = std::fs::read(&vec_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&vec_path, bytes).unwrap();

        let err = EmbeddingIndex::load(&path, Arc::new(HashingEmbedder::default()))
            .expect_err("checksum");
        assert!(matches!(err, MemvidError::IndexCorrupted { .. }));
    }

    #[test]
    fn dimension_mismatch_on_load() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("memory.json");
        let mut index = index();
        index.add_chunks(&["x"], &[0]).unwrap();
        index.save(&path).unwrap();
        let err = EmbeddingIndex::load(&path, Arc::new(HashingEmbedder::new(16).unwrap()))
            .expect_err("dimension");
        assert!(matches!(err, MemvidError::VecDimensionMismatch { .. }));
    }
}
