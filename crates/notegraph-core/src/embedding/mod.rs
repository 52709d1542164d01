//! Embeddings
//!
//! Dense-vector embedding of note text via a local embedding model exposed
//! over HTTP (OpenAI-compatible `/v1/embeddings`). Vectors are truncated to
//! the configured dimension when the model returns more, and always
//! L2-normalized by this caller so that cosine similarity equals dot
//! product everywhere downstream.

use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::llm::http_client;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Transport-level failure
    #[error("Embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Endpoint answered with a non-success status
    #[error("Embedding endpoint returned {status}")]
    Endpoint { status: u16 },
    /// Invalid input (empty text) or unusable response vector
    #[error("Invalid embedding input: {0}")]
    InvalidInput(String),
    /// Model returned fewer dimensions than the corpus is configured for
    #[error("Embedding dimension mismatch: got {got}, need {need}")]
    DimensionMismatch { got: usize, need: usize },
}

/// Embedding result type
pub type Result<T> = std::result::Result<T, EmbeddingError>;

// ============================================================================
// CLIENT
// ============================================================================

/// Maximum text length sent to the embedding endpoint (bytes; truncated on a
/// char boundary when longer)
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Client for the local embedding model endpoint
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    endpoint: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.embedding_endpoint,
            &config.embedding_model,
            config.embedding_dimensions,
        )
    }

    /// Model id, as stored alongside each embedding row
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Configured vector dimension
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed one text. The returned vector has exactly the configured
    /// dimension and unit L2 norm.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }
        let text = truncate_chars(text, MAX_TEXT_LENGTH);

        let response = http_client()
            .post(format!("{}/v1/embeddings", self.endpoint))
            .json(&json!({ "model": self.model, "input": [text] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Endpoint {
                status: status.as_u16(),
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let mut vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidInput("empty response".to_string()))?;

        if vector.len() < self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                got: vector.len(),
                need: self.dimensions,
            });
        }
        vector.truncate(self.dimensions);
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Normalize a vector to unit length in place. Zero vectors are left as-is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 { dot / denominator } else { 0.0 }
}

/// Dot product; equals cosine similarity for unit vectors
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Brute-force top-k similarity scan over an in-memory candidate set.
///
/// Candidates at or above `threshold` are ranked by similarity descending,
/// ties broken by id ascending so identical corpora rank identically. The
/// linear scan is the required baseline; an ANN index may replace it above
/// ~5,000 notes provided it preserves these ranking semantics.
pub fn top_k_similar(
    query: &[f32],
    candidates: &[(String, Vec<f32>)],
    k: usize,
    threshold: f32,
) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = candidates
        .iter()
        .map(|(id, vector)| (id.clone(), dot_product(query, vector)))
        .filter(|(_, sim)| *sim >= threshold)
        .collect();

    scored.sort_by(|x, y| {
        y.1.partial_cmp(&x.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| x.0.cmp(&y.0))
    });
    scored.truncate(k);
    scored
}

// ============================================================================
// TESTS
// ============================================================================
