//! Local sentence-embedding models run through ONNX Runtime.
//!
//! A model directory holds `model.onnx` and `tokenizer.json` exported from a
//! sentence-transformers checkpoint. Token states are mean-pooled over the attention mask and
//! L2-normalized, so squared L2 distance between two embeddings is `2 - 2 * cosine`.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::constants::{
    TEXT_MODEL_FILE, TEXT_MODELS_DIR, TEXT_MODELS_DIR_ENV, TEXT_TOKENIZER_FILE,
};
use crate::embed::VecEmbedder;
use crate::error::{MemvidError, Result};
use crate::types::EmbeddingSettings;

/// Static description of a supported model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEmbedModelInfo {
    pub name: &'static str,
    pub dimension: usize,
    /// Longer inputs are truncated to this many tokens.
    pub max_tokens: usize,
}

pub const TEXT_EMBED_MODELS: &[TextEmbedModelInfo] = &[
    TextEmbedModelInfo {
        name: "all-MiniLM-L6-v2",
        dimension: 384,
        max_tokens: 256,
    },
    TextEmbedModelInfo {
        name: "all-MiniLM-L12-v2",
        dimension: 384,
        max_tokens: 256,
    },
    TextEmbedModelInfo {
        name: "paraphrase-multilingual-MiniLM-L12-v2",
        dimension: 384,
        max_tokens: 128,
    },
    TextEmbedModelInfo {
        name: "all-mpnet-base-v2",
        dimension: 768,
        max_tokens: 384,
    },
];

#[must_use]
pub fn default_text_model_info() -> TextEmbedModelInfo {
    TEXT_EMBED_MODELS[0]
}

#[must_use]
pub fn get_text_model_info(name: &str) -> Option<TextEmbedModelInfo> {
    TEXT_EMBED_MODELS
        .iter()
        .find(|info| info.name.eq_ignore_ascii_case(name))
        .copied()
}

pub(crate) fn model_names() -> Vec<&'static str> {
    TEXT_EMBED_MODELS.iter().map(|info| info.name).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEmbedConfig {
    pub model: String,
    /// Directory containing `model.onnx` and `tokenizer.json`.
    pub model_dir: PathBuf,
    /// Overrides the model's token limit when set.
    pub max_tokens: Option<usize>,
    pub intra_threads: usize,
}

impl TextEmbedConfig {
    /// Resolve the model directory: explicit setting, then `$MEMVID_MODELS_DIR/<model>`, then
    /// `models/<model>` relative to the working directory.
    #[must_use]
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        let model_dir = settings.model_dir.clone().unwrap_or_else(|| {
            std::env::var_os(TEXT_MODELS_DIR_ENV)
                .map_or_else(|| PathBuf::from(TEXT_MODELS_DIR), PathBuf::from)
                .join(&settings.model)
        });
        Self {
            model: settings.model.clone(),
            model_dir,
            max_tokens: None,
            intra_threads: 1,
        }
    }
}

impl Default for TextEmbedConfig {
    fn default() -> Self {
        Self::from_settings(&EmbeddingSettings::default())
    }
}

fn load_error(path: &Path, err: impl Display) -> MemvidError {
    MemvidError::config(format!("failed to load {}: {err}", path.display()))
}

fn inference_error(err: impl Display) -> MemvidError {
    MemvidError::Embedding {
        reason: format!("local model inference failed: {err}"),
    }
}

/// Sentence embedder backed by an ONNX export and its HuggingFace tokenizer.
pub struct LocalTextEmbedder {
    info: TextEmbedModelInfo,
    tokenizer: Tokenizer,
    // `Session::run` needs exclusive access.
    session: Mutex<Session>,
    token_type_ids: bool,
}

impl std::fmt::Debug for LocalTextEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTextEmbedder")
            .field("model", &self.info.name)
            .field("dimension", &self.info.dimension)
            .finish_non_exhaustive()
    }
}

impl LocalTextEmbedder {
    pub fn new(config: TextEmbedConfig) -> Result<Self> {
        let info = get_text_model_info(&config.model).ok_or_else(|| {
            MemvidError::config(format!(
                "unknown text embedding model '{}'; supported: {}",
                config.model,
                model_names().join(", ")
            ))
        })?;
        let model_path = config.model_dir.join(TEXT_MODEL_FILE);
        let tokenizer_path = config.model_dir.join(TEXT_TOKENIZER_FILE);
        for path in [&model_path, &tokenizer_path] {
            if !path.is_file() {
                return Err(MemvidError::config(format!(
                    "{} not found; export {} to ONNX into {} or set embedding.model_dir",
                    path.display(),
                    info.name,
                    config.model_dir.display()
                )));
            }
        }

        let mut tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|err| load_error(&tokenizer_path, err))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_tokens.unwrap_or(info.max_tokens),
                ..TruncationParams::default()
            }))
            .map_err(|err| load_error(&tokenizer_path, err))?;

        let session = Session::builder()
            .map_err(|err| load_error(&model_path, err))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|err| load_error(&model_path, err))?
            .with_intra_threads(config.intra_threads.max(1))
            .map_err(|err| load_error(&model_path, err))?
            .commit_from_file(&model_path)
            .map_err(|err| load_error(&model_path, err))?;
        let token_type_ids = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        tracing::info!(
            target = "memvid::embed",
            model = info.name,
            dimension = info.dimension,
            path = %model_path.display(),
            "local text model loaded"
        );
        Ok(Self {
            info,
            tokenizer,
            session: Mutex::new(session),
            token_type_ids,
        })
    }

    #[must_use]
    pub fn info(&self) -> TextEmbedModelInfo {
        self.info
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|err| MemvidError::Embedding {
                reason: format!("tokenization failed: {err}"),
            })?;
        let rows = encodings.len();
        let cols = encodings.first().map_or(0, |encoding| encoding.get_ids().len());

        let mut ids = Vec::with_capacity(rows * cols);
        let mut mask = Vec::with_capacity(rows * cols);
        let mut types = Vec::with_capacity(rows * cols);
        for encoding in &encodings {
            ids.extend(encoding.get_ids().iter().map(|&v| i64::from(v)));
            mask.extend(encoding.get_attention_mask().iter().map(|&v| i64::from(v)));
            types.extend(encoding.get_type_ids().iter().map(|&v| i64::from(v)));
        }
        let shape = [rows, cols];
        let ids_tensor = Tensor::from_array((shape, ids)).map_err(inference_error)?;
        let mask_tensor = Tensor::from_array((shape, mask.clone())).map_err(inference_error)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| inference_error("session lock poisoned"))?;
        let outputs = if self.token_type_ids {
            let types_tensor = Tensor::from_array((shape, types)).map_err(inference_error)?;
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => types_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            ])
        }
        .map_err(inference_error)?;

        let (out_shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;
        if out_shape.len() != 3 {
            return Err(inference_error(format!(
                "expected token states [batch, tokens, hidden], got {} dimensions",
                out_shape.len()
            )));
        }
        let seq = usize::try_from(out_shape[1]).map_err(inference_error)?;
        let dim = usize::try_from(out_shape[2]).map_err(inference_error)?;
        if dim != self.info.dimension {
            return Err(MemvidError::VecDimensionMismatch {
                expected: self.info.dimension,
                actual: dim,
            });
        }
        Ok(mean_pool(hidden, &mask, rows, seq, cols, dim))
    }
}

/// Average token states where the attention mask is set, then L2-normalize each row.
fn mean_pool(
    hidden: &[f32],
    mask: &[i64],
    rows: usize,
    seq: usize,
    cols: usize,
    dim: usize,
) -> Vec<Vec<f32>> {
    let mut pooled = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut sum = vec![0.0f32; dim];
        let mut count = 0.0f32;
        for token in 0..seq.min(cols) {
            if mask[row * cols + token] == 0 {
                continue;
            }
            let start = (row * seq + token) * dim;
            for (acc, value) in sum.iter_mut().zip(&hidden[start..start + dim]) {
                *acc += value;
            }
            count += 1.0;
        }
        if count > 0.0 {
            for value in &mut sum {
                *value /= count;
            }
        }
        let norm = sum.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-12);
        for value in &mut sum {
            *value /= norm;
        }
        pooled.push(sum);
    }
    pooled
}

impl VecEmbedder for LocalTextEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| inference_error("model returned no embedding"))
    }

    fn embed_chunks(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts)
    }

    fn embedding_dimension(&self) -> usize {
        self.info.dimension
    }

    fn model_name(&self) -> &str {
        self.info.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_lookup_is_case_insensitive() {
        let info = get_text_model_info("ALL-minilm-l6-v2").expect("known");
        assert_eq!(info, default_text_model_info());
        assert_eq!(info.dimension, 384);
        assert!(get_text_model_info("bert-base-uncased").is_none());
    }

    #[test]
    fn explicit_model_dir_wins() {
        let settings = EmbeddingSettings {
            model_dir: Some(PathBuf::from("/opt/models/minilm")),
            ..EmbeddingSettings::default()
        };
        let config = TextEmbedConfig::from_settings(&settings);
        assert_eq!(config.model_dir, PathBuf::from("/opt/models/minilm"));
        assert_eq!(config.model, "all-MiniLM-L6-v2");
    }

    #[test]
    fn missing_export_is_config_error() {
        let dir = tempfile::tempdir().expect("tmp");
        let config = TextEmbedConfig {
            model_dir: dir.path().to_path_buf(),
            ..TextEmbedConfig::default()
        };
        let err = LocalTextEmbedder::new(config).err().expect("no model files");
        assert!(err.is_config_error());
        assert!(err.to_string().contains("model.onnx"));
    }

    #[test]
    fn pooling_ignores_padding() {
        // One row, three token slots, the last one padded.
        let hidden = [1.0, 0.0, 3.0, 0.0, 100.0, 100.0];
        let pooled = mean_pool(&hidden, &[1, 1, 0], 1, 3, 3, 2);
        assert_eq!(pooled.len(), 1);
        assert!((pooled[0][0] - 1.0).abs() < 1e-6);
        assert!(pooled[0][1].abs() < 1e-6);
    }
}
