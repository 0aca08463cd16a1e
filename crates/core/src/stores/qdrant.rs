use crate::error::StoreError;
use crate::models::{
    ChunkAttributes, ChunkRecord, ChunkTag, QueryFilters, RetrievalCandidate,
};
use crate::store::VectorStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Qdrant-backed vector store. Points are keyed by a deterministic UUID per
/// (document, chunk_index), so re-ingestion overwrites in place and the old
/// set stays queryable until the new one is fully written.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    /// Create the collection with a cosine-distance vector column; an
    /// already-existing collection is fine.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .put(format!(
                "{}/collections/{}",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if response.status().is_success() || response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        Err(StoreError::Backend {
            backend: "qdrant".to_string(),
            details: response.status().to_string(),
        })
    }

    fn point_id(document_id: Uuid, chunk_index: usize) -> Uuid {
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(chunk_index.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }

    fn document_condition(document_id: Uuid) -> Value {
        json!({ "key": "document_id", "match": { "value": document_id.to_string() } })
    }

    async fn delete_by_filter(&self, filter: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/delete?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Backend {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn dimensions(&self) -> usize {
        self.vector_size
    }

    async fn replace_document(
        &self,
        document_id: Uuid,
        chunks: Vec<ChunkRecord>,
    ) -> Result<usize, StoreError> {
        let points = chunks
            .iter()
            .map(|chunk| {
                if chunk.embedding.len() != self.vector_size {
                    return Err(StoreError::Dimension {
                        expected: self.vector_size,
                        got: chunk.embedding.len(),
                    });
                }

                let tags: Vec<&str> = chunk
                    .attributes
                    .tags
                    .iter()
                    .map(ChunkTag::as_str)
                    .collect();
                let payload = json!({
                    "document_id": chunk.document_id.to_string(),
                    "chunk_index": chunk.chunk_index,
                    "content": chunk.content,
                    "token_count": chunk.token_count,
                    "exam": chunk.exam,
                    "subject": chunk.subject,
                    "topic": chunk.topic,
                    "doc_type": chunk.doc_type,
                    "year": chunk.year,
                    "source_title": chunk.source_title,
                    "section_path": chunk.section_path,
                    "tags": tags,
                    "quality_score": chunk.attributes.quality_score,
                    "content_hash": chunk.content_hash,
                });

                Ok(json!({
                    "id": Self::point_id(document_id, chunk.chunk_index).to_string(),
                    "vector": chunk.embedding,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let new_len = points.len();
        if new_len > 0 {
            let response = self
                .client
                .put(format!(
                    "{}/collections/{}/points?wait=true",
                    self.endpoint, self.collection
                ))
                .json(&json!({ "points": points }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(StoreError::Backend {
                    backend: "qdrant".to_string(),
                    details: response.status().to_string(),
                });
            }
        }

        // Matching point ids were overwritten above; anything beyond the new
        // set's length is stale from a previous, longer ingestion.
        self.delete_by_filter(json!({
            "must": [
                Self::document_condition(document_id),
                { "key": "chunk_index", "range": { "gte": new_len } },
            ]
        }))
        .await?;

        Ok(new_len)
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<(), StoreError> {
        self.delete_by_filter(json!({ "must": [Self::document_condition(document_id)] }))
            .await
    }

    async fn search(
        &self,
        embedding: &[f32],
        filters: &QueryFilters,
        exclude_tags: &BTreeSet<ChunkTag>,
        top_k: usize,
    ) -> Result<Vec<RetrievalCandidate>, StoreError> {
        if embedding.len() != self.vector_size {
            return Err(StoreError::Dimension {
                expected: self.vector_size,
                got: embedding.len(),
            });
        }

        let mut must = Vec::new();
        if !filters.exam.is_empty() {
            must.push(json!({ "key": "exam", "match": { "value": filters.exam } }));
        }
        if let Some(subject) = &filters.subject {
            must.push(json!({ "key": "subject", "match": { "value": subject } }));
        }
        if let Some(topic) = &filters.topic {
            must.push(json!({ "key": "topic", "match": { "value": topic } }));
        }
        if let Some(doc_type) = &filters.doc_type {
            must.push(json!({ "key": "doc_type", "match": { "value": doc_type } }));
        }
        if let Some(year) = filters.year {
            must.push(json!({ "key": "year", "match": { "value": year } }));
        }

        let mut filter = json!({ "must": must });
        if !exclude_tags.is_empty() {
            let excluded: Vec<&str> = exclude_tags.iter().map(ChunkTag::as_str).collect();
            filter["must_not"] = json!([{ "key": "tags", "match": { "any": excluded } }]);
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": embedding,
                "limit": top_k,
                "with_payload": true,
                "filter": filter,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Backend {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            let chunk = parse_hit_payload(&hit)?;
            // Qdrant reports cosine similarity; retrieval orders by distance.
            let similarity = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let distance = 1.0 - similarity;
            candidates.push(RetrievalCandidate {
                chunk,
                distance,
                score: RetrievalCandidate::score_from_distance(distance),
                rerank_score: None,
            });
        }

        candidates.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then_with(|| left.chunk.chunk_index.cmp(&right.chunk.chunk_index))
                .then_with(|| left.chunk.document_id.cmp(&right.chunk.document_id))
        });
        Ok(candidates)
    }
}

fn parse_hit_payload(hit: &Value) -> Result<ChunkRecord, StoreError> {
    let payload = hit.pointer("/payload").ok_or_else(|| StoreError::Backend {
        backend: "qdrant".to_string(),
        details: "search hit without payload".to_string(),
    })?;

    let document_id = payload
        .pointer("/document_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| StoreError::Backend {
            backend: "qdrant".to_string(),
            details: "payload missing document_id".to_string(),
        })?;

    let text_field = |key: &str| {
        payload
            .pointer(&format!("/{key}"))
            .and_then(Value::as_str)
            .map(|value| value.to_string())
    };

    let tags: BTreeSet<ChunkTag> = payload
        .pointer("/tags")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .filter_map(ChunkTag::parse)
                .collect()
        })
        .unwrap_or_default();

    Ok(ChunkRecord {
        document_id,
        chunk_index: payload
            .pointer("/chunk_index")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize,
        content: text_field("content").unwrap_or_default(),
        token_count: payload
            .pointer("/token_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize,
        // Search hits come back without vectors; candidates never need them.
        embedding: Vec::new(),
        exam: text_field("exam").unwrap_or_default(),
        subject: text_field("subject"),
        topic: text_field("topic"),
        doc_type: text_field("doc_type"),
        year: payload
            .pointer("/year")
            .and_then(Value::as_i64)
            .map(|year| year as i32),
        source_title: text_field("source_title").unwrap_or_default(),
        section_path: text_field("section_path"),
        attributes: ChunkAttributes {
            tags,
            quality_score: payload
                .pointer("/quality_score")
                .and_then(Value::as_f64)
                .unwrap_or(1.0),
        },
        content_hash: text_field("content_hash").unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_per_document_and_index() {
        let document_id = Uuid::new_v4();
        assert_eq!(
            QdrantStore::point_id(document_id, 3),
            QdrantStore::point_id(document_id, 3)
        );
        assert_ne!(
            QdrantStore::point_id(document_id, 3),
            QdrantStore::point_id(document_id, 4)
        );
        assert_ne!(
            QdrantStore::point_id(document_id, 3),
            QdrantStore::point_id(Uuid::new_v4(), 3)
        );
    }

    #[test]
    fn hit_payloads_round_trip_into_chunk_records() {
        let document_id = Uuid::new_v4();
        let hit = json!({
            "id": "point",
            "score": 0.75,
            "payload": {
                "document_id": document_id.to_string(),
                "chunk_index": 4,
                "content": "Newton's second law",
                "token_count": 87,
                "exam": "GATE_DA",
                "subject": "physics",
                "topic": null,
                "doc_type": "textbook",
                "year": 2021,
                "source_title": "Mechanics Vol 1",
                "section_path": "Laws of Motion",
                "tags": ["low_signal", "not_a_real_tag"],
                "quality_score": 0.7,
                "content_hash": "abc123",
            }
        });

        let chunk = parse_hit_payload(&hit).unwrap();
        assert_eq!(chunk.document_id, document_id);
        assert_eq!(chunk.chunk_index, 4);
        assert_eq!(chunk.exam, "GATE_DA");
        assert_eq!(chunk.year, Some(2021));
        // Unknown labels are rejected at the boundary.
        assert_eq!(chunk.attributes.tags, BTreeSet::from([ChunkTag::LowSignal]));
        assert_eq!(chunk.attributes.quality_score, 0.7);
    }

    #[test]
    fn missing_payload_is_a_backend_error() {
        let hit = json!({ "id": "point", "score": 0.5 });
        assert!(matches!(
            parse_hit_payload(&hit),
            Err(StoreError::Backend { .. })
        ));
    }
}
