use thiserror::Error;
use uuid::Uuid;

/// Failures of the external embedding provider.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding endpoint {endpoint} returned {status}")]
    Endpoint { endpoint: String, status: String },

    #[error("embedding response missing item {index}")]
    MissingItem { index: usize },

    #[error("embedding provider returned {returned} vectors for {requested} inputs")]
    CountMismatch { requested: usize, returned: usize },

    #[error("embedding dimension {got} does not match configured {expected}")]
    Dimension { expected: usize, got: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures of the vector store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("chunk embedding dimension {got} does not match store dimension {expected}")]
    Dimension { expected: usize, got: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid ingest request: {0}")]
    Validation(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk filter pattern: {0}")]
    RegexError(#[from] regex::Error),

    #[error("document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("job for document {document_id} is not claimable from state {state}")]
    NotClaimable { document_id: Uuid, state: String },

    #[error("ingestion queue rejected document {0}")]
    DispatchFailed(Uuid),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("inference request failed: {0}")]
    Inference(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
