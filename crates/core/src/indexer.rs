use crate::embeddings::Embedder;
use crate::error::{EmbedError, IngestError};
use crate::models::{ChunkRecord, Document, TaggedChunk};
use crate::store::VectorStore;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_EMBED_BATCH_SIZE: usize = 16;

/// Embeds accepted chunks and swaps them into the vector store. The full
/// record set is built before any write, so an embedding failure mid-batch
/// leaves the previous chunk set untouched.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, batch_size: usize) -> Self {
        Self {
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn index(
        &self,
        document: &Document,
        accepted: &[TaggedChunk],
    ) -> Result<usize, IngestError> {
        let dimensions = self.embedder.dimensions();
        if dimensions != self.store.dimensions() {
            return Err(IngestError::Config(format!(
                "embedding dimension {} does not match store dimension {}",
                dimensions,
                self.store.dimensions()
            )));
        }

        let mut records: Vec<ChunkRecord> = Vec::with_capacity(accepted.len());
        for batch in accepted.chunks(self.batch_size) {
            let texts: Vec<String> = batch
                .iter()
                .map(|chunk| chunk.draft.text.clone())
                .collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    requested: batch.len(),
                    returned: embeddings.len(),
                }
                .into());
            }

            for (chunk, embedding) in batch.iter().zip(embeddings) {
                if embedding.len() != dimensions {
                    return Err(EmbedError::Dimension {
                        expected: dimensions,
                        got: embedding.len(),
                    }
                    .into());
                }
                records.push(ChunkRecord {
                    document_id: document.id,
                    chunk_index: chunk.draft.index,
                    content: chunk.draft.text.clone(),
                    token_count: chunk.draft.token_count,
                    embedding,
                    exam: document.exam.clone(),
                    subject: document.subject.clone(),
                    topic: document.topic.clone(),
                    doc_type: document.doc_type.clone(),
                    year: document.year,
                    source_title: document.title.clone(),
                    section_path: chunk
                        .draft
                        .parent_section
                        .clone()
                        .or_else(|| chunk.draft.section_path.clone()),
                    attributes: chunk.attributes.clone(),
                    content_hash: chunk.content_hash.clone(),
                });
            }
        }

        let count = self.store.replace_document(document.id, records).await?;
        info!(document_id = %document.id, chunks = count, "chunk set replaced");
        Ok(count)
    }
}
