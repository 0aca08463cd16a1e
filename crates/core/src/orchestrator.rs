use crate::chunking::{ChunkerConfig, SectionChunker};
use crate::dispatch::TaskDispatcher;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::DocumentExtractor;
use crate::filter::{ChunkFilter, FilterConfig};
use crate::indexer::{Indexer, DEFAULT_EMBED_BATCH_SIZE};
use crate::models::{Document, IngestReceipt, IngestRequest, IngestionJob, JobStatus};
use crate::normalize::{cleanup_markdown, normalize_markdown, DEFAULT_MIN_REPEATS};
use crate::store::VectorStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Relational boundary for documents and their jobs. The transition methods
/// enforce the job state machine: queued -> running -> done | failed, with
/// reset back to queued only for finished jobs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Register a document together with its queued job.
    async fn insert(&self, document: Document) -> Result<(), IngestError>;

    async fn document(&self, document_id: Uuid) -> Result<Option<Document>, IngestError>;

    async fn job(&self, document_id: Uuid) -> Result<Option<IngestionJob>, IngestError>;

    /// queued -> running; at most one worker wins the claim.
    async fn claim(&self, document_id: Uuid) -> Result<(), IngestError>;

    /// running -> done.
    async fn complete(&self, document_id: Uuid) -> Result<(), IngestError>;

    /// queued | running -> failed with error detail.
    async fn fail(&self, document_id: Uuid, error: String) -> Result<(), IngestError>;

    /// done | failed -> queued, for re-ingestion.
    async fn reset(&self, document_id: Uuid) -> Result<(), IngestError>;

    async fn remove(&self, document_id: Uuid) -> Result<(), IngestError>;
}

/// In-memory document registry; the reference [`DocumentStore`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    entries: RwLock<HashMap<Uuid, (Document, IngestionJob)>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_claimable(document_id: Uuid, status: JobStatus) -> IngestError {
    IngestError::NotClaimable {
        document_id,
        state: status.as_str().to_string(),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, document: Document) -> Result<(), IngestError> {
        let job = IngestionJob::queued(document.id);
        self.entries
            .write()
            .await
            .insert(document.id, (document, job));
        Ok(())
    }

    async fn document(&self, document_id: Uuid) -> Result<Option<Document>, IngestError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&document_id)
            .map(|(document, _)| document.clone()))
    }

    async fn job(&self, document_id: Uuid) -> Result<Option<IngestionJob>, IngestError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&document_id)
            .map(|(_, job)| job.clone()))
    }

    async fn claim(&self, document_id: Uuid) -> Result<(), IngestError> {
        let mut entries = self.entries.write().await;
        let (_, job) = entries
            .get_mut(&document_id)
            .ok_or(IngestError::DocumentNotFound(document_id))?;
        if job.status != JobStatus::Queued {
            return Err(not_claimable(document_id, job.status));
        }
        job.status = JobStatus::Running;
        job.error = None;
        job.started_at = Some(Utc::now());
        job.finished_at = None;
        Ok(())
    }

    async fn complete(&self, document_id: Uuid) -> Result<(), IngestError> {
        let mut entries = self.entries.write().await;
        let (_, job) = entries
            .get_mut(&document_id)
            .ok_or(IngestError::DocumentNotFound(document_id))?;
        if job.status != JobStatus::Running {
            return Err(not_claimable(document_id, job.status));
        }
        job.status = JobStatus::Done;
        job.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(&self, document_id: Uuid, error: String) -> Result<(), IngestError> {
        let mut entries = self.entries.write().await;
        let (_, job) = entries
            .get_mut(&document_id)
            .ok_or(IngestError::DocumentNotFound(document_id))?;
        if !matches!(job.status, JobStatus::Queued | JobStatus::Running) {
            return Err(not_claimable(document_id, job.status));
        }
        job.status = JobStatus::Failed;
        job.error = Some(error);
        job.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn reset(&self, document_id: Uuid) -> Result<(), IngestError> {
        let mut entries = self.entries.write().await;
        let (_, job) = entries
            .get_mut(&document_id)
            .ok_or(IngestError::DocumentNotFound(document_id))?;
        match job.status {
            JobStatus::Queued => Ok(()),
            JobStatus::Running => Err(not_claimable(document_id, job.status)),
            JobStatus::Done | JobStatus::Failed => {
                *job = IngestionJob::queued(document_id);
                Ok(())
            }
        }
    }

    async fn remove(&self, document_id: Uuid) -> Result<(), IngestError> {
        self.entries.write().await.remove(&document_id);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunker: ChunkerConfig,
    pub filter: FilterConfig,
    pub cleanup_min_repeats: usize,
    pub embed_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            filter: FilterConfig::default(),
            cleanup_min_repeats: DEFAULT_MIN_REPEATS,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }
}

/// Drives a document through extract -> normalize -> chunk -> filter ->
/// index, recording progress on its job. Failures are isolated per
/// document and never touch a previously indexed chunk set.
pub struct IngestionOrchestrator {
    documents: Arc<dyn DocumentStore>,
    store: Arc<dyn VectorStore>,
    extractor: Arc<dyn DocumentExtractor>,
    dispatcher: Arc<dyn TaskDispatcher>,
    chunker: SectionChunker,
    filter: Mutex<ChunkFilter>,
    indexer: Indexer,
    cleanup_min_repeats: usize,
}

impl IngestionOrchestrator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        store: Arc<dyn VectorStore>,
        extractor: Arc<dyn DocumentExtractor>,
        embedder: Arc<dyn Embedder>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: PipelineConfig,
    ) -> Result<Self, IngestError> {
        let filter = ChunkFilter::new(config.filter)?;
        let indexer = Indexer::new(embedder, store.clone(), config.embed_batch_size);
        Ok(Self {
            documents,
            store,
            extractor,
            dispatcher,
            chunker: SectionChunker::new(config.chunker),
            filter: Mutex::new(filter),
            indexer,
            cleanup_min_repeats: config.cleanup_min_repeats,
        })
    }

    /// Register a document and enqueue its ingestion; returns immediately
    /// with a queued job handle.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt, IngestError> {
        if request.source.trim().is_empty() {
            return Err(IngestError::Validation("source is empty".to_string()));
        }
        if request.title.trim().is_empty() {
            return Err(IngestError::Validation("title is empty".to_string()));
        }
        if request.exam.trim().is_empty() {
            return Err(IngestError::Validation("exam is empty".to_string()));
        }

        let document = Document {
            id: Uuid::new_v4(),
            source: request.source,
            title: request.title,
            exam: request.exam,
            subject: request.subject,
            topic: request.topic,
            doc_type: request.doc_type,
            year: request.year,
            metadata: request.metadata,
            ingested_at: Utc::now(),
        };
        let document_id = document.id;
        self.documents.insert(document).await?;

        if let Err(error) = self.dispatcher.dispatch(document_id).await {
            self.documents
                .fail(document_id, format!("enqueue failed: {error}"))
                .await?;
            return Err(error);
        }

        info!(document_id = %document_id, "ingestion queued");
        Ok(IngestReceipt {
            document_id,
            status: JobStatus::Queued,
        })
    }

    /// Reset a finished job to queued and re-run the full pipeline. Not
    /// incremental: the chunk set is rebuilt from scratch.
    pub async fn reingest(&self, document_id: Uuid) -> Result<IngestReceipt, IngestError> {
        self.documents.reset(document_id).await?;
        if let Err(error) = self.dispatcher.dispatch(document_id).await {
            self.documents
                .fail(document_id, format!("enqueue failed: {error}"))
                .await?;
            return Err(error);
        }
        Ok(IngestReceipt {
            document_id,
            status: JobStatus::Queued,
        })
    }

    pub async fn status(&self, document_id: Uuid) -> Result<IngestionJob, IngestError> {
        self.documents
            .job(document_id)
            .await?
            .ok_or(IngestError::DocumentNotFound(document_id))
    }

    /// Delete a document and everything it owns: chunks and job record.
    pub async fn delete(&self, document_id: Uuid) -> Result<(), IngestError> {
        self.store.delete_document(document_id).await?;
        self.documents.remove(document_id).await
    }

    /// One delivery from the task queue. Claims the job, runs the pipeline,
    /// and records the outcome; a duplicate delivery finds the job already
    /// claimed and is ignored.
    pub async fn run(&self, document_id: Uuid) -> Result<(), IngestError> {
        match self.documents.claim(document_id).await {
            Ok(()) => {}
            Err(IngestError::NotClaimable { state, .. }) => {
                warn!(document_id = %document_id, state = %state, "skipping unclaimable delivery");
                return Ok(());
            }
            Err(error) => return Err(error),
        }

        let document = match self.documents.document(document_id).await? {
            Some(document) => document,
            None => return Err(IngestError::DocumentNotFound(document_id)),
        };

        match self.run_pipeline(&document).await {
            Ok(chunk_count) => {
                info!(document_id = %document_id, chunks = chunk_count, "ingestion done");
                self.documents.complete(document_id).await
            }
            Err(error) => {
                warn!(document_id = %document_id, error = %error, "ingestion failed");
                self.documents.fail(document_id, error.to_string()).await
            }
        }
    }

    async fn run_pipeline(&self, document: &Document) -> Result<usize, IngestError> {
        let extracted = self.extractor.extract(&document.source).await?;
        let markdown = cleanup_markdown(
            &normalize_markdown(&extracted.markdown),
            self.cleanup_min_repeats,
        );

        let drafts = self.chunker.chunk(&markdown);
        let (accepted, stats) = self.filter.lock().await.apply(drafts);
        info!(
            document_id = %document.id,
            total_in = stats.total_in,
            total_out = stats.total_out,
            dropped = stats.dropped(),
            tags = ?stats.tag_counts,
            "chunk filter stats"
        );

        self.indexer.index(document, &accepted).await
    }
}
