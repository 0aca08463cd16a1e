use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::models::{RetrievalCandidate, RetrieveRequest};
use crate::rerank::{apply_rerank, Reranker, RerankConfig};
use crate::store::VectorStore;
use std::sync::Arc;

/// Query-time pipeline: embed, filtered vector search, optional rerank,
/// truncate. Stateless across requests.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    reranker: Option<Arc<dyn Reranker>>,
    rerank_config: RerankConfig,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            reranker: None,
            rerank_config: RerankConfig::default(),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>, config: RerankConfig) -> Self {
        self.reranker = Some(reranker);
        self.rerank_config = config;
        self
    }

    pub async fn retrieve(
        &self,
        request: &RetrieveRequest,
    ) -> Result<Vec<RetrievalCandidate>, QueryError> {
        if request.query.trim().is_empty() {
            return Err(QueryError::Validation("query is empty".to_string()));
        }
        if request.filters.exam.trim().is_empty() {
            return Err(QueryError::Config(
                "exam filter is required for retrieval".to_string(),
            ));
        }

        let embedding = self.embedder.embed_query(&request.query).await?;
        if embedding.len() != self.store.dimensions() {
            return Err(QueryError::Config(format!(
                "query embedding dimension {} does not match store dimension {}",
                embedding.len(),
                self.store.dimensions()
            )));
        }

        let mut candidates = self
            .store
            .search(
                &embedding,
                &request.filters,
                &request.exclude_tags,
                request.top_k,
            )
            .await?;

        candidates.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then_with(|| left.chunk.chunk_index.cmp(&right.chunk.chunk_index))
                .then_with(|| left.chunk.document_id.cmp(&right.chunk.document_id))
        });

        if let Some(reranker) = &self.reranker {
            if self.rerank_config.enabled {
                candidates = apply_rerank(
                    reranker.as_ref(),
                    &request.query,
                    candidates,
                    self.rerank_config.top_m,
                )
                .await;
            }
        }

        candidates.truncate(request.top_n);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::QueryError;
    use crate::models::{ChunkAttributes, ChunkRecord, ChunkTag, QueryFilters};
    use crate::stores::MemoryStore;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn record(embedder: &CharacterNgramEmbedder, index: usize, content: &str) -> ChunkRecord {
        ChunkRecord {
            document_id: Uuid::nil(),
            chunk_index: index,
            content: content.to_string(),
            token_count: 40,
            embedding: embedder.embed(content),
            exam: "GATE_DA".to_string(),
            subject: None,
            topic: None,
            doc_type: None,
            year: None,
            source_title: "Fixture".to_string(),
            section_path: None,
            attributes: ChunkAttributes::default(),
            content_hash: format!("hash-{index}"),
        }
    }

    async fn fixture_store(
        embedder: &CharacterNgramEmbedder,
        records: Vec<ChunkRecord>,
    ) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new(embedder.dimensions));
        store.replace_document(Uuid::nil(), records).await.unwrap();
        store
    }

    #[tokio::test]
    async fn missing_exam_filter_is_a_configuration_error() {
        let embedder = CharacterNgramEmbedder::default();
        let store = fixture_store(&embedder, Vec::new()).await;
        let retriever = Retriever::new(Arc::new(embedder), store);

        let mut request = RetrieveRequest::new("what is entropy", "GATE_DA");
        request.filters = QueryFilters::default();
        let result = retriever.retrieve(&request).await;
        assert!(matches!(result, Err(QueryError::Config(_))));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let embedder = CharacterNgramEmbedder::default();
        let store = fixture_store(&embedder, Vec::new()).await;
        let retriever = Retriever::new(Arc::new(embedder), store);

        let request = RetrieveRequest::new("   ", "GATE_DA");
        assert!(matches!(
            retriever.retrieve(&request).await,
            Err(QueryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn no_matching_chunks_is_an_empty_result_not_an_error() {
        let embedder = CharacterNgramEmbedder::default();
        let store = fixture_store(&embedder, Vec::new()).await;
        let retriever = Retriever::new(Arc::new(embedder), store);

        let request = RetrieveRequest::new("what is entropy", "GATE_DA");
        let candidates = retriever.retrieve(&request).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn results_are_truncated_to_top_n_in_distance_order() {
        let embedder = CharacterNgramEmbedder::default();
        let records = (0..6)
            .map(|i| record(&embedder, i, &format!("thermodynamics passage number {i}")))
            .collect();
        let store = fixture_store(&embedder, records).await;
        let retriever = Retriever::new(Arc::new(embedder), store);

        let mut request = RetrieveRequest::new("thermodynamics passage", "GATE_DA");
        request.top_k = 6;
        request.top_n = 3;
        request.exclude_tags = BTreeSet::new();
        let candidates = retriever.retrieve(&request).await.unwrap();
        assert_eq!(candidates.len(), 3);
        assert!(candidates
            .windows(2)
            .all(|pair| pair[0].distance <= pair[1].distance));
    }

    #[tokio::test]
    async fn excluded_tag_removes_the_best_match() {
        let embedder = CharacterNgramEmbedder::default();
        let mut best = record(&embedder, 0, "exact matching content");
        best.attributes.tags.insert(ChunkTag::FrontMatter);
        let other = record(&embedder, 1, "exact matching content with extra words");
        let store = fixture_store(&embedder, vec![best, other]).await;
        let retriever = Retriever::new(Arc::new(embedder), store);

        let mut request = RetrieveRequest::new("exact matching content", "GATE_DA");
        request.exclude_tags = BTreeSet::from([ChunkTag::FrontMatter]);
        let candidates = retriever.retrieve(&request).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].chunk.chunk_index, 1);
    }

    #[tokio::test]
    async fn identical_queries_return_identical_results() {
        let embedder = CharacterNgramEmbedder::default();
        let records = (0..5)
            .map(|i| record(&embedder, i, &format!("probability distribution notes {i}")))
            .collect();
        let store = fixture_store(&embedder, records).await;
        let retriever = Retriever::new(Arc::new(embedder), store);

        let request = RetrieveRequest::new("probability distribution", "GATE_DA");
        let first = retriever.retrieve(&request).await.unwrap();
        let second = retriever.retrieve(&request).await.unwrap();
        let ids = |candidates: &[RetrievalCandidate]| {
            candidates
                .iter()
                .map(|c| c.chunk.chunk_id())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn disabled_reranker_passes_distance_order_through() {
        use crate::rerank::Reranker;
        use async_trait::async_trait;

        struct InvertingReranker;

        #[async_trait]
        impl Reranker for InvertingReranker {
            async fn score(
                &self,
                _query: &str,
                contents: &[String],
            ) -> Result<Vec<f64>, QueryError> {
                Ok((0..contents.len()).map(|i| i as f64).collect())
            }
        }

        let embedder = CharacterNgramEmbedder::default();
        let records = (0..4)
            .map(|i| record(&embedder, i, &format!("signal processing basics {i}")))
            .collect();
        let store = fixture_store(&embedder, records).await;

        let disabled = RerankConfig {
            enabled: false,
            top_m: 4,
        };
        let retriever = Retriever::new(Arc::new(embedder), store)
            .with_reranker(Arc::new(InvertingReranker), disabled);

        let request = RetrieveRequest::new("signal processing", "GATE_DA");
        let candidates = retriever.retrieve(&request).await.unwrap();
        assert!(candidates
            .windows(2)
            .all(|pair| pair[0].distance <= pair[1].distance));
        assert!(candidates.iter().all(|c| c.rerank_score.is_none()));
    }
}
