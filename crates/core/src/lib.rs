pub mod chat;
pub mod chunking;
pub mod dispatch;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod indexer;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod prompt;
pub mod rerank;
pub mod retrieve;
pub mod store;
pub mod stores;

pub use chat::{ChatMessage, ChatProvider, MockChatProvider, OpenAiChatProvider, TutorConfig, TutorService};
pub use chunking::{ChunkerConfig, HeuristicCounter, SectionChunker, TokenCounter};
pub use dispatch::{spawn_worker, LocalDispatcher, TaskDispatcher};
pub use embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{EmbedError, IngestError, QueryError, StoreError};
pub use extractor::{DocumentExtractor, ExtractedDocument, MarkdownExtractor, RemoteExtractor};
pub use filter::{content_hash, ChunkFilter, FilterConfig, FilterStats};
pub use indexer::{Indexer, DEFAULT_EMBED_BATCH_SIZE};
pub use ingest::{discover_markdown_files, title_from_path};
pub use models::{
    default_exclude_tags, ChatEvent, ChatRequest, ChatResponse, ChunkAttributes, ChunkDraft,
    ChunkRecord, ChunkTag, Citation, Document, IngestReceipt, IngestRequest, IngestionJob,
    JobStatus, QueryFilters, RetrievalCandidate, RetrieveRequest, TaggedChunk, TutorMode,
};
pub use normalize::{cleanup_markdown, normalize_markdown, IMAGE_MARKER};
pub use orchestrator::{
    DocumentStore, IngestionOrchestrator, MemoryDocumentStore, PipelineConfig,
};
pub use prompt::{build_prompt, cap_sources, to_chat_messages, PromptConfig, PromptParts};
pub use rerank::{HttpReranker, Reranker, RerankConfig};
pub use retrieve::Retriever;
pub use store::VectorStore;
pub use stores::{MemoryStore, QdrantStore};
