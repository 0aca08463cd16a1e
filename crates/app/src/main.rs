use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tutor_rag_core::{
    discover_markdown_files, spawn_worker, CharacterNgramEmbedder, ChatEvent, ChatRequest,
    ChunkTag, DocumentExtractor, Embedder, HttpEmbedder, HttpReranker, IngestRequest,
    IngestionOrchestrator, JobStatus, LocalDispatcher, MarkdownExtractor, MemoryDocumentStore,
    MemoryStore, MockChatProvider, OpenAiChatProvider, PipelineConfig, QdrantStore, QueryFilters,
    RemoteExtractor, RerankConfig, RetrieveRequest, Retriever, TutorConfig, TutorMode,
    TutorService, VectorStore,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tutor-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL; when unset, an in-memory store is used.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection name.
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "study_chunks")]
    qdrant_collection: String,

    /// Embeddings server base URL; when unset, the local deterministic
    /// embedder is used.
    #[arg(long, env = "EMBEDDINGS_BASE_URL")]
    embeddings_url: Option<String>,

    /// Embedding model name.
    #[arg(long, env = "EMBEDDINGS_MODEL", default_value = "BAAI/bge-m3")]
    embeddings_model: String,

    /// Embedding dimension; must match the store schema.
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value = "128")]
    embedding_dimensions: usize,

    /// Document conversion service endpoint for non-markdown sources.
    #[arg(long, env = "CONVERTER_ENDPOINT")]
    converter_endpoint: Option<String>,

    /// OpenAI-compatible chat server base URL; when unset, a mock provider
    /// answers.
    #[arg(long, env = "LLM_BASE_URL")]
    llm_url: Option<String>,

    /// Chat model name.
    #[arg(long, env = "LLM_MODEL", default_value = "meta-llama/Llama-3.1-8B-Instruct")]
    llm_model: String,

    /// Chat server API key.
    #[arg(long, env = "LLM_API_KEY", default_value = "")]
    llm_api_key: String,

    /// Cross-encoder rerank endpoint; reranking is enabled when set.
    #[arg(long, env = "RERANK_ENDPOINT")]
    rerank_endpoint: Option<String>,

    /// How many candidates the reranker rescores.
    #[arg(long, env = "RERANK_TOP_M", default_value = "30")]
    rerank_top_m: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Register a study document and run ingestion to completion.
    Ingest {
        /// Path or URL of the document.
        #[arg(long)]
        source: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        exam: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        doc_type: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Ingest every markdown/text file under a folder.
    IngestDir {
        #[arg(long)]
        folder: String,
        #[arg(long)]
        exam: String,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Print the ingestion job state for a document.
    Status {
        #[arg(long)]
        document_id: Uuid,
    },
    /// Debug retrieval: ranked chunks with scores, no side effects.
    Retrieve {
        #[arg(long)]
        query: String,
        #[arg(long)]
        exam: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        doc_type: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, default_value = "20")]
        top_k: usize,
        #[arg(long, default_value = "8")]
        top_n: usize,
        /// Comma-separated tags to exclude (defaults to the standard set).
        #[arg(long)]
        exclude_tags: Option<String>,
    },
    /// Ask the tutor a question grounded in the indexed corpus.
    Chat {
        #[arg(long)]
        message: String,
        #[arg(long)]
        exam: String,
        /// One of: doubt, practice, pyq.
        #[arg(long, default_value = "doubt")]
        mode: String,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        topic: Option<String>,
    },
    /// Delete a document, its chunks, and its job record.
    Delete {
        #[arg(long)]
        document_id: Uuid,
    },
}

struct Stack {
    orchestrator: Arc<IngestionOrchestrator>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

async fn build_stack(cli: &Cli) -> anyhow::Result<Stack> {
    let embedder: Arc<dyn Embedder> = match &cli.embeddings_url {
        Some(url) => Arc::new(HttpEmbedder::new(
            url,
            &cli.embeddings_model,
            cli.embedding_dimensions,
        )),
        None => Arc::new(CharacterNgramEmbedder {
            dimensions: cli.embedding_dimensions,
        }),
    };

    let store: Arc<dyn VectorStore> = match &cli.qdrant_url {
        Some(url) => {
            let qdrant = QdrantStore::new(url, &cli.qdrant_collection, cli.embedding_dimensions);
            qdrant
                .ensure_collection()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            Arc::new(qdrant)
        }
        None => Arc::new(MemoryStore::new(cli.embedding_dimensions)),
    };

    let extractor: Arc<dyn DocumentExtractor> = match &cli.converter_endpoint {
        Some(endpoint) => Arc::new(RemoteExtractor::new(endpoint.clone(), None)),
        None => Arc::new(MarkdownExtractor),
    };

    let (dispatcher, receiver) = LocalDispatcher::new(64);
    let orchestrator = Arc::new(
        IngestionOrchestrator::new(
            Arc::new(MemoryDocumentStore::new()),
            store.clone(),
            extractor,
            embedder.clone(),
            Arc::new(dispatcher),
            PipelineConfig::default(),
        )
        .map_err(|error| anyhow::anyhow!(error.to_string()))?,
    );
    spawn_worker(receiver, orchestrator.clone());

    Ok(Stack {
        orchestrator,
        store,
        embedder,
    })
}

fn build_retriever(cli: &Cli, stack: &Stack) -> Retriever {
    let retriever = Retriever::new(stack.embedder.clone(), stack.store.clone());
    match &cli.rerank_endpoint {
        Some(endpoint) => retriever.with_reranker(
            Arc::new(HttpReranker::new(endpoint.clone(), None)),
            RerankConfig {
                enabled: true,
                top_m: cli.rerank_top_m,
            },
        ),
        None => retriever,
    }
}

async fn wait_for_terminal(
    orchestrator: &IngestionOrchestrator,
    document_id: Uuid,
) -> anyhow::Result<()> {
    loop {
        let job = orchestrator
            .status(document_id)
            .await
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
        match job.status {
            JobStatus::Done => {
                println!("document {document_id}: done");
                return Ok(());
            }
            JobStatus::Failed => {
                println!(
                    "document {document_id}: failed ({})",
                    job.error.as_deref().unwrap_or("unknown error")
                );
                return Ok(());
            }
            JobStatus::Queued | JobStatus::Running => {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

fn parse_exclude_tags(raw: &str) -> Vec<ChunkTag> {
    raw.split(',')
        .filter_map(|tag| {
            let parsed = ChunkTag::parse(tag);
            if parsed.is_none() && !tag.trim().is_empty() {
                warn!(tag = tag.trim(), "ignoring unknown exclude tag");
            }
            parsed
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "tutor-rag boot"
    );

    match &cli.command {
        Command::Ingest {
            source,
            title,
            exam,
            subject,
            topic,
            doc_type,
            year,
        } => {
            let stack = build_stack(&cli).await?;
            let mut request = IngestRequest::new(source, title, exam);
            request.subject = subject.clone();
            request.topic = topic.clone();
            request.doc_type = doc_type.clone();
            request.year = *year;

            let receipt = stack
                .orchestrator
                .ingest(request)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!(
                "document {} queued at {}",
                receipt.document_id,
                Utc::now().to_rfc3339()
            );
            wait_for_terminal(&stack.orchestrator, receipt.document_id).await?;
        }
        Command::IngestDir {
            folder,
            exam,
            subject,
        } => {
            let stack = build_stack(&cli).await?;
            let files = discover_markdown_files(Path::new(folder));
            if files.is_empty() {
                println!("no markdown files found in {folder}");
                return Ok(());
            }

            let mut document_ids = Vec::new();
            for file in files {
                let title = tutor_rag_core::title_from_path(&file);
                let mut request =
                    IngestRequest::new(file.to_string_lossy().to_string(), title, exam);
                request.subject = subject.clone();
                match stack.orchestrator.ingest(request).await {
                    Ok(receipt) => document_ids.push(receipt.document_id),
                    Err(error) => warn!(path = %file.display(), error = %error, "ingest rejected"),
                }
            }

            println!("{} documents queued", document_ids.len());
            for document_id in document_ids {
                wait_for_terminal(&stack.orchestrator, document_id).await?;
            }
        }
        Command::Status { document_id } => {
            let stack = build_stack(&cli).await?;
            let job = stack
                .orchestrator
                .status(*document_id)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("status={}", job.status.as_str());
            if let Some(error) = job.error {
                println!("error={error}");
            }
        }
        Command::Retrieve {
            query,
            exam,
            subject,
            topic,
            doc_type,
            year,
            top_k,
            top_n,
            exclude_tags,
        } => {
            let stack = build_stack(&cli).await?;
            let retriever = build_retriever(&cli, &stack);

            let mut request = RetrieveRequest::new(query, exam);
            request.filters = QueryFilters {
                exam: exam.clone(),
                subject: subject.clone(),
                topic: topic.clone(),
                doc_type: doc_type.clone(),
                year: *year,
            };
            request.top_k = *top_k;
            request.top_n = *top_n;
            if let Some(raw) = exclude_tags {
                request.exclude_tags = parse_exclude_tags(raw).into_iter().collect();
            }

            let candidates = retriever
                .retrieve(&request)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("query: {query}");
            for candidate in candidates {
                let rerank = candidate
                    .rerank_score
                    .map(|score| format!(" rerank={score:.4}"))
                    .unwrap_or_default();
                println!(
                    "[{}] score={:.4} distance={:.4}{} title={}",
                    candidate.chunk.chunk_id(),
                    candidate.score,
                    candidate.distance,
                    rerank,
                    candidate.chunk.source_title
                );
                println!("  {}", candidate.chunk.content);
            }
        }
        Command::Chat {
            message,
            exam,
            mode,
            language,
            subject,
            topic,
        } => {
            let mode = TutorMode::parse(mode)
                .ok_or_else(|| anyhow::anyhow!("unknown mode: {mode} (expected doubt|practice|pyq)"))?;
            let stack = build_stack(&cli).await?;
            let retriever = build_retriever(&cli, &stack);

            let provider: Arc<dyn tutor_rag_core::ChatProvider> = match &cli.llm_url {
                Some(url) => Arc::new(OpenAiChatProvider::new(
                    url,
                    &cli.llm_model,
                    &cli.llm_api_key,
                )),
                None => Arc::new(MockChatProvider::default()),
            };
            let service = TutorService::new(retriever, provider, TutorConfig::default());

            let mut request = ChatRequest::new(message, exam, mode);
            request.language = language.clone();
            request.filters.subject = subject.clone();
            request.filters.topic = topic.clone();

            let mut events = service
                .chat(&request, None)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            use std::io::Write as _;
            while let Some(event) = events.recv().await {
                match event {
                    ChatEvent::Token { delta } => {
                        print!("{delta}");
                        std::io::stdout().flush().ok();
                    }
                    ChatEvent::Final(response) => {
                        println!();
                        for citation in response.citations {
                            println!("cited: [chunk:{}] {}", citation.chunk_id, citation.source_title);
                        }
                        println!("grounded on {} chunk(s)", response.used_chunks.len());
                    }
                    ChatEvent::Error { detail } => {
                        println!();
                        anyhow::bail!("chat failed: {detail}");
                    }
                }
            }
        }
        Command::Delete { document_id } => {
            let stack = build_stack(&cli).await?;
            stack
                .orchestrator
                .delete(*document_id)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("document {document_id} deleted");
        }
    }

    Ok(())
}
