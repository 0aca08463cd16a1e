use crate::error::IngestError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Normalized output of the document-conversion boundary: markdown-like text
/// with heading and image markers.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub markdown: String,
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, source: &str) -> Result<ExtractedDocument, IngestError>;
}

pub(crate) fn is_remote_source(source: &str) -> bool {
    Url::parse(source)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Reads already-converted markdown (and plain text) from disk. Everything
/// else belongs to the remote conversion service.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownExtractor;

const MARKDOWN_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

#[async_trait]
impl DocumentExtractor for MarkdownExtractor {
    async fn extract(&self, source: &str) -> Result<ExtractedDocument, IngestError> {
        if is_remote_source(source) {
            return Err(IngestError::Extraction(format!(
                "remote source requires a conversion endpoint: {source}"
            )));
        }

        let path = Path::new(source);
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                MARKDOWN_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if !supported {
            return Err(IngestError::Extraction(format!(
                "unsupported file type: {source}"
            )));
        }

        let markdown = tokio::fs::read_to_string(path).await.map_err(|error| {
            IngestError::Extraction(format!("unable to read {source}: {error}"))
        })?;

        if markdown.trim().is_empty() {
            return Err(IngestError::Extraction(format!(
                "document has no readable text: {source}"
            )));
        }

        Ok(ExtractedDocument { markdown })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ConvertRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_base64: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConvertResponse {
    markdown: Option<String>,
}

/// Client for a document-conversion service that turns arbitrary formats
/// into markdown. Local files are shipped base64-encoded; URLs are passed
/// through for the service to fetch.
pub struct RemoteExtractor {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteExtractor {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Build from `CONVERTER_ENDPOINT` / `CONVERTER_API_KEY` when configured.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("CONVERTER_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }
        let api_key = std::env::var("CONVERTER_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Some(Self::new(endpoint, api_key))
    }

    async fn build_request(&self, source: &str) -> Result<ConvertRequest, IngestError> {
        if is_remote_source(source) {
            return Ok(ConvertRequest {
                source_url: Some(source.to_string()),
                filename: None,
                content_base64: None,
            });
        }

        let path = Path::new(source);
        let bytes = tokio::fs::read(path).await.map_err(|error| {
            IngestError::Extraction(format!("unable to read {source}: {error}"))
        })?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.to_string());

        Ok(ConvertRequest {
            source_url: None,
            filename,
            content_base64: Some(STANDARD.encode(bytes)),
        })
    }
}

#[async_trait]
impl DocumentExtractor for RemoteExtractor {
    async fn extract(&self, source: &str) -> Result<ExtractedDocument, IngestError> {
        let payload = self.build_request(source).await?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| IngestError::Extraction(err.to_string()))?;
        if !response.status().is_success() {
            return Err(IngestError::Extraction(format!(
                "conversion request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: ConvertResponse = response
            .json()
            .await
            .map_err(|err| IngestError::Extraction(err.to_string()))?;
        let markdown = payload
            .markdown
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                IngestError::Extraction(format!("conversion response was empty for {source}"))
            })?;

        Ok(ExtractedDocument { markdown })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn markdown_files_are_read_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# Notes\n\nBody text.").unwrap();

        let extracted = MarkdownExtractor
            .extract(path.to_str().unwrap())
            .await
            .unwrap();
        assert!(extracted.markdown.contains("# Notes"));
    }

    #[tokio::test]
    async fn unsupported_extensions_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let result = MarkdownExtractor.extract(path.to_str().unwrap()).await;
        match result {
            Err(IngestError::Extraction(detail)) => {
                assert!(detail.contains("unsupported file type"))
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_documents_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.md");
        std::fs::write(&path, "   \n").unwrap();

        assert!(MarkdownExtractor
            .extract(path.to_str().unwrap())
            .await
            .is_err());
    }

    #[test]
    fn source_classification_recognizes_urls() {
        assert!(is_remote_source("https://example.org/book.pdf"));
        assert!(is_remote_source("http://example.org/book.pdf"));
        assert!(!is_remote_source("data/book.pdf"));
        assert!(!is_remote_source("/abs/path/book.md"));
    }
}
