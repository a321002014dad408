//! Embedding generation
//!
//! Two backends:
//! - OpenAI-compatible API (text-embedding-3-small, 1536 dimensions)
//! - Deterministic feature-hashing fallback (no external dependencies)
//!
//! Provider input is silently truncated to [`MAX_EMBED_INPUT_CHARS`] before
//! submission. A failed provider call is fatal to the enclosing operation;
//! there is no retry loop, only a bounded request timeout.

mod hashing;

pub use hashing::HashingEmbedder;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{MemoriaError, Result};
use crate::types::EmbeddingConfig;

/// Maximum number of characters submitted to the embedding provider.
/// Longer input is truncated without informing the caller.
pub const MAX_EMBED_INPUT_CHARS: usize = 8_000;

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Truncate text to the provider input cap on a char boundary
fn truncate_for_provider(text: &str) -> &str {
    match text.char_indices().nth(MAX_EMBED_INPUT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// OpenAI embedding client
///
/// Supports OpenAI, Azure OpenAI, and other OpenAI-compatible APIs via
/// `base_url`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    /// Create a new embedder with default settings
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_config(api_key, None, None, None, 30)
    }

    /// Create a new embedder with custom settings
    ///
    /// # Arguments
    /// * `api_key` - API key for authentication
    /// * `base_url` - API base URL (default: https://api.openai.com/v1)
    /// * `model` - Model name (default: text-embedding-3-small)
    /// * `dimensions` - Expected embedding dimensions (default: 1536)
    /// * `timeout_secs` - Request timeout; a hung provider surfaces as an error
    pub fn with_config(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        dimensions: Option<usize>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.unwrap_or_else(|| "text-embedding-3-small".to_string()),
            dimensions: dimensions.unwrap_or(1536),
        })
    }

    /// Async embedding call to an OpenAI-compatible API
    pub async fn embed_async(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let input = truncate_for_provider(text);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": input,
                "model": self.model,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoriaError::Embedding(format!(
                "Embedding API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let embedding: Vec<f32> = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| MemoriaError::Embedding("Invalid response format".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if embedding.len() != self.dimensions {
            return Err(MemoriaError::Embedding(format!(
                "Embedding dimensions mismatch: expected {}, got {}",
                self.dimensions,
                embedding.len()
            )));
        }

        Ok(embedding)
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Blocking call for the sync interface
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.embed_async(text))
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create an embedder from configuration
///
/// - `"openai"`: remote provider, requires `api_key`
/// - `"hashing"`: deterministic local fallback
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                MemoriaError::Config(
                    "api_key is required when the embedding provider is 'openai'".to_string(),
                )
            })?;
            Ok(Arc::new(OpenAiEmbedder::with_config(
                api_key,
                config.base_url.clone(),
                config.model.clone(),
                Some(config.dimensions),
                config.timeout_secs,
            )?))
        }
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        other => Err(MemoriaError::Config(format!(
            "Unknown embedding provider: '{}'. Use 'openai' or 'hashing'",
            other
        ))),
    }
}

/// Cosine similarity between two vectors
///
/// For L2-normalized vectors this equals `1 - cosine_distance`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_truncation_boundary() {
        let short = "a".repeat(MAX_EMBED_INPUT_CHARS);
        assert_eq!(truncate_for_provider(&short).len(), MAX_EMBED_INPUT_CHARS);

        let long = "a".repeat(MAX_EMBED_INPUT_CHARS + 100);
        assert_eq!(
            truncate_for_provider(&long).chars().count(),
            MAX_EMBED_INPUT_CHARS
        );
    }

    #[test]
    fn test_truncation_multibyte_boundary() {
        // Each snowman is 3 bytes; truncation must count chars, not bytes
        let long: String = std::iter::repeat('☃').take(MAX_EMBED_INPUT_CHARS + 5).collect();
        let truncated = truncate_for_provider(&long);
        assert_eq!(truncated.chars().count(), MAX_EMBED_INPUT_CHARS);
    }

    #[test]
    fn test_create_embedder_hashing() {
        let config = EmbeddingConfig {
            provider: "hashing".to_string(),
            dimensions: 64,
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimensions(), 64);
    }

    #[test]
    fn test_create_embedder_openai_requires_key() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn test_create_embedder_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "cuneiform".to_string(),
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
