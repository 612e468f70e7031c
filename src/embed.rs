//! Text embedders and selection by model name.

use std::sync::Arc;

use crate::constants::{EMBEDDING_DIMENSION, HASHING_EMBEDDING_MODEL};
use crate::error::{MemvidError, Result};
use crate::types::EmbeddingSettings;

/// Produces fixed-dimension embeddings. Implementations are shared across the decode and
/// embedding pools, so they must be `Send + Sync`.
pub trait VecEmbedder: Send + Sync {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_chunks(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_query(text)?);
        }
        Ok(embeddings)
    }

    fn embedding_dimension(&self) -> usize;

    /// Identifier recorded in index statistics and the sidecar.
    fn model_name(&self) -> &str;
}

/// Build the embedder named by `settings.model`.
///
/// `memvid-hash-v1` selects the offline [`HashingEmbedder`]. Every other name is a local
/// sentence-embedding model and needs the `vec` feature; without it this is a configuration
/// error rather than a silent downgrade to hashing.
pub fn embedder_from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn VecEmbedder>> {
    if settings.is_hashing() {
        tracing::debug!(
            target = "memvid::embed",
            dimension = settings.dimension,
            "using offline hashing embedder"
        );
        return Ok(Arc::new(HashingEmbedder::new(settings.dimension)?));
    }
    local_embedder(settings)
}

#[cfg(feature = "vec")]
fn local_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn VecEmbedder>> {
    use crate::text_embed::{LocalTextEmbedder, TextEmbedConfig, get_text_model_info};

    let info = get_text_model_info(&settings.model).ok_or_else(|| {
        MemvidError::config(format!(
            "unknown embedding model '{}'; use one of {} or '{HASHING_EMBEDDING_MODEL}'",
            settings.model,
            crate::text_embed::model_names().join(", ")
        ))
    })?;
    if info.dimension != settings.dimension {
        return Err(MemvidError::VecDimensionMismatch {
            expected: settings.dimension,
            actual: info.dimension,
        });
    }
    let embedder = LocalTextEmbedder::new(TextEmbedConfig::from_settings(settings))?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "vec"))]
fn local_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn VecEmbedder>> {
    Err(MemvidError::config(format!(
        "embedding model '{}' runs locally and needs the `vec` feature; \
         set embedding.model to '{HASHING_EMBEDDING_MODEL}' for the offline hashing embedder",
        settings.model
    )))
}

/// Offline, deterministic feature-hashing embedder.
///
/// Lower-cased word tokens and character trigrams are hashed with BLAKE3 into signed buckets;
/// the vector is L2-normalized. Texts sharing vocabulary land close together, which is enough
/// for exact-match and keyword-heavy retrieval without a model download. It has no notion of
/// synonyms, so it is only used when `memvid-hash-v1` is configured.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model: String,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimension: EMBEDDING_DIMENSION,
            model: HASHING_EMBEDDING_MODEL.to_string(),
        }
    }
}

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(MemvidError::config("embedding dimension must be non-zero"));
        }
        Ok(Self {
            dimension,
            model: HASHING_EMBEDDING_MODEL.to_string(),
        })
    }

    fn bump(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(word) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl VecEmbedder for HashingEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            self.bump(&mut vector, token.as_bytes(), WORD_WEIGHT);
            let chars: Vec<char> = format!(" {token} ").chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                self.bump(&mut vector, trigram.as_bytes(), TRIGRAM_WEIGHT);
            }
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub(crate) fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_query("Video memory stores text").unwrap();
        let b = embedder.embed_query("Video memory stores text").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIMENSION);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_is_closer() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed_query("quantum computing qubits").unwrap();
        let near = embedder.embed_query("qubits in quantum computing").unwrap();
        let far = embedder.embed_query("baking sourdough bread").unwrap();
        assert!(l2_squared(&query, &near) < l2_squared(&query, &far));
    }

    #[test]
    fn hashing_is_selected_only_by_name() {
        assert!(!EmbeddingSettings::default().is_hashing());
        let embedder = embedder_from_settings(&EmbeddingSettings::hashing()).unwrap();
        assert_eq!(embedder.model_name(), HASHING_EMBEDDING_MODEL);
        assert_eq!(embedder.embedding_dimension(), EMBEDDING_DIMENSION);
    }

    #[cfg(not(feature = "vec"))]
    #[test]
    fn local_model_without_feature_is_config_error() {
        let err = embedder_from_settings(&EmbeddingSettings::default())
            .err()
            .expect("no local runtime compiled in");
        assert!(err.is_config_error());
        assert!(err.to_string().contains("`vec` feature"));
    }

    #[cfg(feature = "vec")]
    #[test]
    fn local_model_dimension_must_match_settings() {
        let settings = EmbeddingSettings {
            dimension: 768,
            ..EmbeddingSettings::default()
        };
        let err = embedder_from_settings(&settings).err().expect("mismatch");
        assert!(matches!(
            err,
            MemvidError::VecDimensionMismatch {
                expected: 768,
                actual: 384
            }
        ));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16).unwrap();
        assert_eq!(embedder.embed_query("  ").unwrap(), vec![0.0; 16]);
        assert!(HashingEmbedder::new(0).is_err());
    }
}
