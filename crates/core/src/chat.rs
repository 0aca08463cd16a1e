use crate::error::QueryError;
use crate::models::{
    default_exclude_tags, ChatEvent, ChatRequest, ChatResponse, ChunkTag, Citation,
    RetrievalCandidate, RetrieveRequest,
};
use crate::prompt::{build_prompt, cap_sources, style_hint, to_chat_messages, PromptConfig};
use crate::retrieve::Retriever;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

pub type ChatDelta = Result<String, QueryError>;

/// Chat-completion boundary: providers yield token deltas over a channel.
/// Dropping the receiver cancels the stream.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<ChatDelta>, QueryError>;
}

/// Deterministic stub provider for offline development and tests.
pub struct MockChatProvider {
    reply: String,
}

impl Default for MockChatProvider {
    fn default() -> Self {
        Self {
            reply: "(mock) I can answer once an inference server is connected. \
                    Retrieved sources are available; configure an LLM endpoint."
                .to_string(),
        }
    }
}

impl MockChatProvider {
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn stream_chat(
        &self,
        _messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<ChatDelta>, QueryError> {
        let (tx, rx) = mpsc::channel(8);
        let reply = self.reply.clone();
        tokio::spawn(async move {
            for piece in reply.split_inclusive(' ') {
                if tx.send(Ok(piece.to_string())).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Client for an OpenAI-compatible streaming `/chat/completions` server
/// (vLLM and friends).
pub struct OpenAiChatProvider {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChatProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<ChatDelta>, QueryError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.2,
            "top_p": 0.9,
            "max_tokens": 600,
            "stream": true,
        });

        let mut request = self.client.post(&url).json(&payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let mut response = request.send().await?;
        if !response.status().is_success() {
            return Err(QueryError::Inference(format!(
                "chat endpoint {} returned {}",
                url,
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut buffer = String::new();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(newline) = buffer.find('\n') {
                            let line = buffer[..newline].trim().to_string();
                            buffer.drain(..=newline);
                            let Some(data) = line.strip_prefix("data:") else {
                                continue;
                            };
                            let data = data.trim();
                            if data == "[DONE]" {
                                return;
                            }
                            match serde_json::from_str::<Value>(data) {
                                Ok(event) => {
                                    let delta = event
                                        .pointer("/choices/0/delta/content")
                                        .and_then(Value::as_str)
                                        .unwrap_or_default();
                                    if !delta.is_empty()
                                        && tx.send(Ok(delta.to_string())).await.is_err()
                                    {
                                        return;
                                    }
                                }
                                Err(_) => {
                                    // Best-effort parsing; log and continue.
                                    let preview: String = data.chars().take(200).collect();
                                    warn!(raw = %preview, "stream parse failed");
                                }
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(error) => {
                        let _ = tx.send(Err(QueryError::Http(error))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Debug, Clone)]
pub struct TutorConfig {
    pub top_k: usize,
    pub top_n: usize,
    /// Candidates scoring below this are too weak to ground an answer.
    pub min_score: f64,
    pub exclude_tags: BTreeSet<ChunkTag>,
    pub prompt: PromptConfig,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            top_n: 8,
            min_score: 0.15,
            exclude_tags: default_exclude_tags(),
            prompt: PromptConfig::default(),
        }
    }
}

/// Request-scoped chat pipeline: retrieve, ground, stream. Emits zero or
/// more `Token` events followed by exactly one `Final` or `Error`.
pub struct TutorService {
    retriever: Retriever,
    provider: Arc<dyn ChatProvider>,
    config: TutorConfig,
}

impl TutorService {
    pub fn new(retriever: Retriever, provider: Arc<dyn ChatProvider>, config: TutorConfig) -> Self {
        Self {
            retriever,
            provider,
            config,
        }
    }

    pub async fn chat(
        &self,
        request: &ChatRequest,
        memory: Option<String>,
    ) -> Result<mpsc::Receiver<ChatEvent>, QueryError> {
        let retrieve_request = RetrieveRequest {
            query: request.message.clone(),
            filters: request.filters.clone(),
            exclude_tags: self.config.exclude_tags.clone(),
            top_k: self.config.top_k,
            top_n: self.config.top_n,
        };
        let retrieved = self.retriever.retrieve(&retrieve_request).await?;

        let used: Vec<RetrievalCandidate> = retrieved
            .into_iter()
            .filter(|candidate| candidate.score >= self.config.min_score)
            .collect();
        let used = cap_sources(used, &self.config.prompt);

        let question = format!(
            "{}\n\nSTYLE NOTE: {}",
            request.message,
            style_hint(&request.filters.exam)
        );
        let parts = build_prompt(
            request.mode,
            &request.filters.exam,
            &request.language,
            &question,
            &used,
            memory.as_deref(),
        );
        let messages = to_chat_messages(&parts);

        let mut deltas = self.provider.stream_chat(messages).await?;
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut answer = String::new();
            while let Some(delta) = deltas.recv().await {
                match delta {
                    Ok(piece) => {
                        answer.push_str(&piece);
                        if tx.send(ChatEvent::Token { delta: piece }).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = tx
                            .send(ChatEvent::Error {
                                detail: format!("LLM request failed: {error}"),
                            })
                            .await;
                        return;
                    }
                }
            }

            let citations = used
                .iter()
                .take(5)
                .map(|candidate| Citation {
                    chunk_id: candidate.chunk.chunk_id(),
                    source_title: candidate.chunk.source_title.clone(),
                })
                .collect();
            let _ = tx
                .send(ChatEvent::Final(ChatResponse {
                    answer: answer.trim().to_string(),
                    citations,
                    used_chunks: used,
                }))
                .await;
        });

        Ok(rx)
    }

    /// Non-streaming convenience: drain the event stream into the final
    /// response, surfacing a stream error as a request failure.
    pub async fn complete(
        &self,
        request: &ChatRequest,
        memory: Option<String>,
    ) -> Result<ChatResponse, QueryError> {
        let mut events = self.chat(request, memory).await?;
        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::Token { .. } => continue,
                ChatEvent::Final(response) => return Ok(response),
                ChatEvent::Error { detail } => return Err(QueryError::Inference(detail)),
            }
        }
        Err(QueryError::Inference(
            "chat stream ended without a terminal event".to_string(),
        ))
    }
}
