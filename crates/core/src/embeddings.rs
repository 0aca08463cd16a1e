use crate::error::EmbedError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Text-to-vector provider. One provider (and therefore one dimension)
/// serves both ingestion and queries for the whole deployment.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbedError::MissingItem { index: 0 })
    }
}

/// Deterministic local embedder hashing character trigrams into a fixed
/// number of buckets, L2-normalized. Useful offline and in tests; not a
/// semantic model.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingsItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/v1/embeddings` server.
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            model: model.into(),
            dimensions,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbedError::Endpoint {
                endpoint,
                status: response.status().to_string(),
            });
        }

        let payload: EmbeddingsResponse = response.json().await?;
        if payload.data.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                requested: texts.len(),
                returned: payload.data.len(),
            });
        }

        // The server may return items out of order; reassemble by index.
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for item in payload.data {
            if item.embedding.len() != self.dimensions {
                return Err(EmbedError::Dimension {
                    expected: self.dimensions,
                    got: item.embedding.len(),
                });
            }
            if item.index < vectors.len() {
                vectors[item.index] = Some(item.embedding);
            }
        }

        vectors
            .into_iter()
            .enumerate()
            .map(|(index, vector)| vector.ok_or(EmbedError::MissingItem { index }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ngram_embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Kirchhoff's current law at a node");
        let second = embedder.embed("Kirchhoff's current law at a node");
        assert_eq!(first, second);
    }

    #[test]
    fn ngram_embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("abc").len(), 32);
        assert_eq!(embedder.embed("").len(), 32);
    }

    #[test]
    fn ngram_embedder_output_is_unit_length() {
        let embedder = CharacterNgramEmbedder::default();
        let vector = embedder.embed("ohm's law relates voltage and current");
        let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn embed_query_returns_a_single_vector() {
        let embedder = CharacterNgramEmbedder::default();
        let vector = embedder.embed_query("definition of entropy").await.unwrap();
        assert_eq!(vector.len(), DEFAULT_EMBEDDING_DIMENSIONS);
    }
}
