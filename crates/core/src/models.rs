use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub source: String,
    pub title: String,
    pub exam: String,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub doc_type: Option<String>,
    pub year: Option<i32>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

/// One-to-one with a [`Document`]; tracks the background ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub document_id: Uuid,
    pub status: JobStatus,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IngestionJob {
    pub fn queued(document_id: Uuid) -> Self {
        Self {
            document_id,
            status: JobStatus::Queued,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Quality labels attached by the chunk filter. The set is closed: unknown
/// labels are rejected at the store boundary instead of being threaded
/// through as free-form strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkTag {
    FrontMatter,
    Boilerplate,
    ImageOnly,
    Duplicate,
    LowSignal,
    Oversize,
}

impl ChunkTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkTag::FrontMatter => "front_matter",
            ChunkTag::Boilerplate => "boilerplate",
            ChunkTag::ImageOnly => "image_only",
            ChunkTag::Duplicate => "duplicate",
            ChunkTag::LowSignal => "low_signal",
            ChunkTag::Oversize => "oversize",
        }
    }

    pub fn parse(raw: &str) -> Option<ChunkTag> {
        match raw.trim().to_lowercase().as_str() {
            "front_matter" => Some(ChunkTag::FrontMatter),
            "boilerplate" => Some(ChunkTag::Boilerplate),
            "image_only" => Some(ChunkTag::ImageOnly),
            "duplicate" => Some(ChunkTag::Duplicate),
            "low_signal" => Some(ChunkTag::LowSignal),
            "oversize" => Some(ChunkTag::Oversize),
            _ => None,
        }
    }
}

/// Tags used by default to keep non-substantive chunks out of retrieval.
pub fn default_exclude_tags() -> BTreeSet<ChunkTag> {
    BTreeSet::from([
        ChunkTag::FrontMatter,
        ChunkTag::Boilerplate,
        ChunkTag::ImageOnly,
        ChunkTag::Duplicate,
    ])
}

/// The typed attribute bag persisted alongside each chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkAttributes {
    pub tags: BTreeSet<ChunkTag>,
    pub quality_score: f64,
}

impl Default for ChunkAttributes {
    fn default() -> Self {
        Self {
            tags: BTreeSet::new(),
            quality_score: 1.0,
        }
    }
}

/// Chunker output before filtering and embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub index: usize,
    pub text: String,
    pub token_count: usize,
    pub section_path: Option<String>,
    pub parent_section: Option<String>,
    pub oversize: bool,
}

/// A draft that passed classification, ready for embedding.
#[derive(Debug, Clone)]
pub struct TaggedChunk {
    pub draft: ChunkDraft,
    pub attributes: ChunkAttributes,
    pub content_hash: String,
}

/// Persisted chunk row. Taxonomy fields are denormalized from the owning
/// document so the store can filter without a join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub document_id: Uuid,
    pub chunk_index: usize,
    pub content: String,
    pub token_count: usize,
    pub embedding: Vec<f32>,
    pub exam: String,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub doc_type: Option<String>,
    pub year: Option<i32>,
    pub source_title: String,
    pub section_path: Option<String>,
    pub attributes: ChunkAttributes,
    pub content_hash: String,
}

impl ChunkRecord {
    pub fn chunk_id(&self) -> String {
        format!("{}:{}", self.document_id, self.chunk_index)
    }
}

/// Request-scoped search hit; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub chunk: ChunkRecord,
    pub distance: f64,
    pub score: f64,
    pub rerank_score: Option<f64>,
}

impl RetrievalCandidate {
    /// Stable positive similarity derived from cosine distance.
    pub fn score_from_distance(distance: f64) -> f64 {
        1.0 / (1.0 + distance)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryFilters {
    pub exam: String,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub doc_type: Option<String>,
    pub year: Option<i32>,
}

impl QueryFilters {
    pub fn exam(exam: impl Into<String>) -> Self {
        Self {
            exam: exam.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    pub filters: QueryFilters,
    pub exclude_tags: BTreeSet<ChunkTag>,
    pub top_k: usize,
    pub top_n: usize,
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>, exam: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: QueryFilters::exam(exam),
            exclude_tags: default_exclude_tags(),
            top_k: 20,
            top_n: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TutorMode {
    Doubt,
    Practice,
    Pyq,
}

impl TutorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TutorMode::Doubt => "doubt",
            TutorMode::Practice => "practice",
            TutorMode::Pyq => "pyq",
        }
    }

    pub fn parse(raw: &str) -> Option<TutorMode> {
        match raw.trim().to_lowercase().as_str() {
            "doubt" => Some(TutorMode::Doubt),
            "practice" => Some(TutorMode::Practice),
            "pyq" => Some(TutorMode::Pyq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub mode: TutorMode,
    pub language: String,
    pub filters: QueryFilters,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, exam: impl Into<String>, mode: TutorMode) -> Self {
        Self {
            message: message.into(),
            mode,
            language: "en".to_string(),
            filters: QueryFilters::exam(exam),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub source_title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub used_chunks: Vec<RetrievalCandidate>,
}

/// Ordered stream items for a chat request: zero or more tokens followed by
/// exactly one terminal event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    Token { delta: String },
    Final(ChatResponse),
    Error { detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source: String,
    pub title: String,
    pub exam: String,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub doc_type: Option<String>,
    pub year: Option<i32>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl IngestRequest {
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        exam: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            exam: exam.into(),
            subject: None,
            topic: None,
            doc_type: None,
            year: None,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub document_id: Uuid,
    pub status: JobStatus,
}
