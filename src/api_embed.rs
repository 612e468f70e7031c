//! Embeddings from OpenAI-compatible HTTP endpoints.

use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::embed::VecEmbedder;
use crate::error::{MemvidError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_RETRIES: usize = 3;
const MAX_BATCH: usize = 256;

fn embedding_error(reason: impl Into<String>) -> MemvidError {
    MemvidError::Embedding {
        reason: reason.into(),
    }
}

/// Blocking client for `POST {base_url}/embeddings`.
#[derive(Clone)]
pub struct OpenAIEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OpenAIEmbedder {
    /// Build a client; `base_url` defaults to the OpenAI API.
    pub fn new(
        api_key: &str,
        base_url: Option<&str>,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(embedding_error("missing API key"));
        }
        if model.trim().is_empty() || dimension == 0 {
            return Err(MemvidError::config("embedding model and dimension are required"));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .map_err(|_| embedding_error("invalid API key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| embedding_error(format!("failed to build HTTP client: {err}")))?;
        let endpoint = format!(
            "{}/embeddings",
            base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/')
        );
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            dimension,
        })
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env(model: &str, dimension: usize, timeout: Duration) -> Result<Self> {
        let key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| embedding_error("OPENAI_API_KEY is not set"))?;
        let base = std::env::var("OPENAI_BASE_URL").ok();
        Self::new(&key, base.as_deref(), model, dimension, timeout)
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: Some(self.dimension),
            };
            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(resp) if resp.status().is_success() => {
                    let mut parsed: EmbeddingResponse = resp
                        .json()
                        .map_err(|err| embedding_error(format!("unreadable response: {err}")))?;
                    parsed.data.sort_by_key(|entry| entry.index);
                    if parsed.data.len() != inputs.len() {
                        return Err(embedding_error(format!(
                            "{} embeddings returned for {} inputs",
                            parsed.data.len(),
                            inputs.len()
                        )));
                    }
                    let vectors: Vec<Vec<f32>> =
                        parsed.data.into_iter().map(|entry| entry.embedding).collect();
                    if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
                        return Err(MemvidError::VecDimensionMismatch {
                            expected: self.dimension,
                            actual: bad.len(),
                        });
                    }
                    return Ok(vectors);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().unwrap_or_default();
                    if retryable(status) && attempt + 1 < MAX_RETRIES {
                        attempt += 1;
                        thread::sleep(backoff(attempt));
                        continue;
                    }
                    return Err(embedding_error(format!("request failed ({status}): {body}")));
                }
                Err(err) if (err.is_timeout() || err.is_connect()) && attempt + 1 < MAX_RETRIES => {
                    attempt += 1;
                    thread::sleep(backoff(attempt));
                }
                Err(err) => return Err(embedding_error(err.to_string())),
            }
        }
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

impl VecEmbedder for OpenAIEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| embedding_error("empty response"))
    }

    fn embed_chunks(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            out.extend(self.embed_batch(batch)?);
        }
        Ok(out)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_key() {
        assert!(OpenAIEmbedder::new(" ", None, "text-embedding-3-small", 384, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn endpoint_is_normalized() {
        let embedder = OpenAIEmbedder::new(
            "sk-test",
            Some("http://localhost:8080/v1/"),
            "m",
            8,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(embedder.endpoint, "http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.embedding_dimension(), 8);
    }
}
