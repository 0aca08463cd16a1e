use crate::error::StoreError;
use crate::models::{ChunkRecord, ChunkTag, QueryFilters, RetrievalCandidate};
use async_trait::async_trait;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Vector store boundary. The store is the sole authority for chunk
/// persistence; a document's chunk set is only ever replaced wholesale so
/// readers never observe a partially written set.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Atomically swap a document's chunk set for `chunks`. Returns the
    /// persisted count.
    async fn replace_document(
        &self,
        document_id: Uuid,
        chunks: Vec<ChunkRecord>,
    ) -> Result<usize, StoreError>;

    async fn delete_document(&self, document_id: Uuid) -> Result<(), StoreError>;

    /// Nearest-neighbor search by cosine distance, restricted to exact-match
    /// taxonomy filters; chunks carrying any tag in `exclude_tags` are
    /// removed from candidacy entirely.
    async fn search(
        &self,
        embedding: &[f32],
        filters: &QueryFilters,
        exclude_tags: &BTreeSet<ChunkTag>,
        top_k: usize,
    ) -> Result<Vec<RetrievalCandidate>, StoreError>;
}

pub(crate) fn matches_filters(chunk: &ChunkRecord, filters: &QueryFilters) -> bool {
    if !filters.exam.is_empty() && chunk.exam != filters.exam {
        return false;
    }
    if let Some(subject) = &filters.subject {
        if chunk.subject.as_deref() != Some(subject.as_str()) {
            return false;
        }
    }
    if let Some(topic) = &filters.topic {
        if chunk.topic.as_deref() != Some(topic.as_str()) {
            return false;
        }
    }
    if let Some(doc_type) = &filters.doc_type {
        if chunk.doc_type.as_deref() != Some(doc_type.as_str()) {
            return false;
        }
    }
    if let Some(year) = filters.year {
        if chunk.year != Some(year) {
            return false;
        }
    }
    true
}

pub(crate) fn carries_excluded_tag(chunk: &ChunkRecord, exclude_tags: &BTreeSet<ChunkTag>) -> bool {
    chunk
        .attributes
        .tags
        .iter()
        .any(|tag| exclude_tags.contains(tag))
}
