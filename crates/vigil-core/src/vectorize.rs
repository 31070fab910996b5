//! Embedding preprocessing and vector construction.
//!
//! Text is cleaned (tags stripped, volatile tokens replaced with
//! placeholders), truncated to the configured cap, and chunked on sentence
//! boundaries when long; chunk embeddings are mean-pooled into the
//! snapshot's main vector. Embedding failures are non-fatal — the
//! classifier runs without vectors.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::config::VectorizerConfig;
use crate::error::AppError;
use crate::extract::ExtractedContent;
use crate::models::{ContentVector, VectorKind};
use crate::traits::Embedder;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("static regex")
});
static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("static regex"));
static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("static regex"));
static SENTENCE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("static regex"));

/// Prepares content for embedding and assembles per-kind vectors.
#[derive(Debug, Clone)]
pub struct Vectorizer {
    config: VectorizerConfig,
}

impl Vectorizer {
    pub fn new(config: VectorizerConfig) -> Self {
        Self { config }
    }

    /// Clean and bound a text for the embedding model.
    pub fn preprocess(&self, text: &str) -> String {
        let cleaned = TAG_PATTERN.replace_all(text, " ");
        let cleaned = URL_PATTERN.replace_all(&cleaned, "[URL]");
        let cleaned = EMAIL_PATTERN.replace_all(&cleaned, "[EMAIL]");
        let cleaned = NUMBER_PATTERN.replace_all(&cleaned, "[NUM]");

        let mut normalized = cleaned
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        if normalized.chars().count() > self.config.max_content_length {
            normalized = normalized
                .chars()
                .take(self.config.max_content_length)
                .collect();
        }
        normalized
    }

    /// Split a long text into chunks on sentence boundaries. Texts at or
    /// under the threshold come back whole.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.len() <= self.config.chunk_threshold {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        for sentence in SENTENCE_SPLIT.split(text) {
            if !current.is_empty() && current.len() + sentence.len() > self.config.chunk_threshold {
                chunks.push(current.trim().to_string());
                current = String::new();
            }
            current.push_str(sentence);
            current.push_str(". ");
        }
        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }

        if chunks.is_empty() {
            chunks.push(text.chars().take(self.config.chunk_threshold).collect());
        }
        chunks
    }

    /// Embed one text, chunking long inputs and mean-pooling the result.
    pub async fn embed_text<E: Embedder>(
        &self,
        embedder: &E,
        text: &str,
        kind: VectorKind,
    ) -> Result<Vec<f32>, AppError> {
        let prepared = self.preprocess(text);
        if prepared.is_empty() {
            return Err(AppError::VectorizationError(
                "no content left after preprocessing".into(),
            ));
        }

        let chunks = self.chunk(&prepared);
        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            embeddings.push(embedder.embed(chunk, kind).await?);
        }
        Ok(mean_pool(&embeddings))
    }

    /// Build the vector family for a snapshot: main, title, text blocks,
    /// meta description, and a combined vector. Kinds with no source
    /// content are skipped.
    pub async fn vectorize_content<E: Embedder>(
        &self,
        embedder: &E,
        content: &ExtractedContent,
        site_id: Uuid,
        snapshot_id: Uuid,
    ) -> Result<Vec<ContentVector>, AppError> {
        let mut vectors = Vec::new();

        if !content.normalized_text.is_empty() {
            let v = self
                .embed_text(embedder, &content.normalized_text, VectorKind::Main)
                .await?;
            vectors.push(make_vector(site_id, snapshot_id, VectorKind::Main, v));
        }
        if !content.title.is_empty() {
            let v = self
                .embed_text(embedder, &content.title, VectorKind::Title)
                .await?;
            vectors.push(make_vector(site_id, snapshot_id, VectorKind::Title, v));
        }
        if !content.text_blocks.is_empty() {
            // First blocks carry the page's lead content.
            let joined = content
                .text_blocks
                .iter()
                .take(10)
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            let v = self
                .embed_text(embedder, &joined, VectorKind::TextBlocks)
                .await?;
            vectors.push(make_vector(site_id, snapshot_id, VectorKind::TextBlocks, v));
        }
        if !content.meta_description.is_empty() {
            let v = self
                .embed_text(embedder, &content.meta_description, VectorKind::Meta)
                .await?;
            vectors.push(make_vector(site_id, snapshot_id, VectorKind::Meta, v));
        }

        if !vectors.is_empty() {
            let mut combined_parts = Vec::new();
            if !content.title.is_empty() {
                combined_parts.push(content.title.clone());
            }
            if !content.normalized_text.is_empty() {
                combined_parts.push(content.normalized_text.chars().take(2000).collect());
            }
            if !content.meta_description.is_empty() {
                combined_parts.push(content.meta_description.clone());
            }
            let v = self
                .embed_text(embedder, &combined_parts.join(" "), VectorKind::Combined)
                .await?;
            vectors.push(make_vector(site_id, snapshot_id, VectorKind::Combined, v));
        }

        Ok(vectors)
    }
}

fn make_vector(
    site_id: Uuid,
    snapshot_id: Uuid,
    kind: VectorKind,
    payload: Vec<f32>,
) -> ContentVector {
    ContentVector {
        id: Uuid::new_v4(),
        site_id,
        snapshot_id,
        kind,
        dimension: payload.len(),
        payload,
    }
}

/// Element-wise mean of equal-dimension embeddings.
fn mean_pool(embeddings: &[Vec<f32>]) -> Vec<f32> {
    match embeddings {
        [] => Vec::new(),
        [single] => single.clone(),
        many => {
            let dim = many[0].len();
            let mut pooled = vec![0.0f32; dim];
            for embedding in many {
                for (acc, v) in pooled.iter_mut().zip(embedding) {
                    *acc += v;
                }
            }
            let n = many.len() as f32;
            for v in &mut pooled {
                *v /= n;
            }
            pooled
        }
    }
}

/// Cosine similarity between two vectors; 0 on mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
