use crate::error::StoreError;
use crate::models::{ChunkRecord, ChunkTag, QueryFilters, RetrievalCandidate};
use crate::store::{carries_excluded_tag, matches_filters, VectorStore};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory store with exact cosine distance. Chunk sets swap under a
/// single write lock, which gives the replace-is-atomic guarantee for free.
/// The reference backend for tests and offline runs.
pub struct MemoryStore {
    dimensions: usize,
    documents: RwLock<HashMap<Uuid, Vec<ChunkRecord>>>,
}

impl MemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub async fn document_chunks(&self, document_id: Uuid) -> Vec<ChunkRecord> {
        self.documents
            .read()
            .await
            .get(&document_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn chunk_count(&self) -> usize {
        self.documents
            .read()
            .await
            .values()
            .map(|chunks| chunks.len())
            .sum()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn replace_document(
        &self,
        document_id: Uuid,
        chunks: Vec<ChunkRecord>,
    ) -> Result<usize, StoreError> {
        for chunk in &chunks {
            if chunk.embedding.len() != self.dimensions {
                return Err(StoreError::Dimension {
                    expected: self.dimensions,
                    got: chunk.embedding.len(),
                });
            }
        }
        let count = chunks.len();
        self.documents.write().await.insert(document_id, chunks);
        Ok(count)
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<(), StoreError> {
        self.documents.write().await.remove(&document_id);
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        filters: &QueryFilters,
        exclude_tags: &BTreeSet<ChunkTag>,
        top_k: usize,
    ) -> Result<Vec<RetrievalCandidate>, StoreError> {
        if embedding.len() != self.dimensions {
            return Err(StoreError::Dimension {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let documents = self.documents.read().await;
        let mut candidates: Vec<RetrievalCandidate> = documents
            .values()
            .flatten()
            .filter(|chunk| matches_filters(chunk, filters))
            .filter(|chunk| !carries_excluded_tag(chunk, exclude_tags))
            .map(|chunk| {
                let distance = cosine_distance(embedding, &chunk.embedding);
                RetrievalCandidate {
                    chunk: chunk.clone(),
                    distance,
                    score: RetrievalCandidate::score_from_distance(distance),
                    rerank_score: None,
                }
            })
            .collect();

        candidates.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then_with(|| left.chunk.chunk_index.cmp(&right.chunk.chunk_index))
                .then_with(|| left.chunk.document_id.cmp(&right.chunk.document_id))
        });
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

pub fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right.iter()) {
        dot += f64::from(*a) * f64::from(*b);
        left_norm += f64::from(*a) * f64::from(*a);
        right_norm += f64::from(*b) * f64::from(*b);
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 1.0;
    }
    1.0 - dot / (left_norm.sqrt() * right_norm.sqrt())
}
