//! OpenAI-compatible embeddings client implementing the embedding port.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use vigil_core::error::AppError;
use vigil_core::models::VectorKind;
use vigil_core::traits::Embedder;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Embedding client for any OpenAI-compatible `/embeddings` endpoint.
///
/// The dimension is a configuration parameter agreed with the core; a
/// reply with a different dimension is rejected rather than silently
/// stored.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, model: &str, dimension: usize) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, dimension, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: &str,
        model: &str,
        dimension: usize,
        base_url: &str,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimension,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str, kind: VectorKind) -> Result<Vec<f32>, AppError> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(30)
                } else {
                    AppError::VectorizationError(format!("embedding request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(AppError::RateLimitExceeded);
            }
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VectorizationError(format!(
                "embedding API returned HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let reply: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::VectorizationError(format!("invalid embedding response: {e}"))
        })?;

        let embedding = reply
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| {
                AppError::VectorizationError("embedding response had no rows".into())
            })?;

        if embedding.len() != self.dimension {
            return Err(AppError::VectorizationError(format!(
                "embedding dimension mismatch: expected {}, got {} (kind {kind})",
                self.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
