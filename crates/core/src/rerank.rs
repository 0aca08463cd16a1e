use crate::error::QueryError;
use crate::models::RetrievalCandidate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RerankConfig {
    pub enabled: bool,
    /// Only the top-M candidates by initial distance are rescored.
    pub top_m: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_m: 30,
        }
    }
}

/// Cross-encoder relevance scoring: one scalar per (query, content) pair.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, contents: &[String]) -> Result<Vec<f64>, QueryError>;
}

#[derive(Debug, Clone, Serialize)]
struct RerankHttpRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    query: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct RerankHttpResponse {
    scores: Vec<f64>,
}

/// Client for an external cross-encoder scoring service.
pub struct HttpReranker {
    endpoint: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl HttpReranker {
    pub fn new(endpoint: impl Into<String>, model: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, contents: &[String]) -> Result<Vec<f64>, QueryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RerankHttpRequest {
                model: self.model.as_deref(),
                query,
                texts: contents,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::Inference(format!(
                "rerank endpoint {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: RerankHttpResponse = response.json().await?;
        Ok(payload.scores)
    }
}

/// Rescore the top-M candidates and reorder them by descending relevance;
/// ties keep the retriever's order (stable sort). Scoring failures degrade
/// to the incoming order rather than failing the request.
pub async fn apply_rerank(
    reranker: &dyn Reranker,
    query: &str,
    mut candidates: Vec<RetrievalCandidate>,
    top_m: usize,
) -> Vec<RetrievalCandidate> {
    let window = top_m.min(candidates.len());
    if window == 0 {
        return candidates;
    }

    let contents: Vec<String> = candidates[..window]
        .iter()
        .map(|candidate| candidate.chunk.content.clone())
        .collect();

    let scores = match reranker.score(query, &contents).await {
        Ok(scores) if scores.len() == window => scores,
        Ok(scores) => {
            warn!(
                expected = window,
                returned = scores.len(),
                "reranker returned wrong score count; keeping retrieval order"
            );
            return candidates;
        }
        Err(error) => {
            warn!(error = %error, "reranker unavailable; keeping retrieval order");
            return candidates;
        }
    };

    let tail = candidates.split_off(window);
    for (candidate, score) in candidates.iter_mut().zip(scores) {
        candidate.rerank_score = Some(score);
    }
    candidates.sort_by(|left, right| {
        right
            .rerank_score
            .unwrap_or(f64::MIN)
            .total_cmp(&left.rerank_score.unwrap_or(f64::MIN))
    });
    candidates.extend(tail);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkAttributes;
    use crate::models::ChunkRecord;
    use uuid::Uuid;

    struct FixedReranker {
        scores: Vec<f64>,
    }

    #[async_trait]
    impl Reranker for FixedReranker {
        async fn score(&self, _query: &str, _contents: &[String]) -> Result<Vec<f64>, QueryError> {
            Ok(self.scores.clone())
        }
    }

    struct BrokenReranker;

    #[async_trait]
    impl Reranker for BrokenReranker {
        async fn score(&self, _query: &str, _contents: &[String]) -> Result<Vec<f64>, QueryError> {
            Err(QueryError::Inference("model not loaded".to_string()))
        }
    }

    fn candidate(index: usize, distance: f64) -> RetrievalCandidate {
        RetrievalCandidate {
            chunk: ChunkRecord {
                document_id: Uuid::nil(),
                chunk_index: index,
                content: format!("content {index}"),
                token_count: 40,
                embedding: Vec::new(),
                exam: "GATE_DA".to_string(),
                subject: None,
                topic: None,
                doc_type: None,
                year: None,
                source_title: "Fixture".to_string(),
                section_path: None,
                attributes: ChunkAttributes::default(),
                content_hash: format!("hash-{index}"),
            },
            distance,
            score: RetrievalCandidate::score_from_distance(distance),
            rerank_score: None,
        }
    }

    #[tokio::test]
    async fn rerank_reorders_the_scored_window() {
        let candidates = vec![candidate(0, 0.1), candidate(1, 0.2), candidate(2, 0.3)];
        let reranker = FixedReranker {
            scores: vec![0.2, 0.9, 0.5],
        };
        let reordered = apply_rerank(&reranker, "query", candidates, 3).await;
        let order: Vec<usize> = reordered.iter().map(|c| c.chunk.chunk_index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(reordered[0].rerank_score, Some(0.9));
    }

    #[tokio::test]
    async fn candidates_beyond_top_m_keep_their_position() {
        let candidates = vec![candidate(0, 0.1), candidate(1, 0.2), candidate(2, 0.3)];
        let reranker = FixedReranker {
            scores: vec![0.1, 0.8],
        };
        let reordered = apply_rerank(&reranker, "query", candidates, 2).await;
        let order: Vec<usize> = reordered.iter().map(|c| c.chunk.chunk_index).collect();
        assert_eq!(order, vec![1, 0, 2]);
        assert_eq!(reordered[2].rerank_score, None);
    }

    #[tokio::test]
    async fn unavailable_reranker_passes_order_through() {
        let candidates = vec![candidate(0, 0.1), candidate(1, 0.2)];
        let reordered = apply_rerank(&BrokenReranker, "query", candidates, 2).await;
        let order: Vec<usize> = reordered.iter().map(|c| c.chunk.chunk_index).collect();
        assert_eq!(order, vec![0, 1]);
        assert!(reordered.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn wrong_score_count_passes_order_through() {
        let candidates = vec![candidate(0, 0.1), candidate(1, 0.2)];
        let reranker = FixedReranker { scores: vec![0.5] };
        let reordered = apply_rerank(&reranker, "query", candidates, 2).await;
        let order: Vec<usize> = reordered.iter().map(|c| c.chunk.chunk_index).collect();
        assert_eq!(order, vec![0, 1]);
    }
}
