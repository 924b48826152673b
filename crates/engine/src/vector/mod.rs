//! Vector retrieval client
//!
//! Queries an external vector-similarity service (Qdrant REST) for
//! the top-K passages matching a query embedding, honoring
//! conjunctive metadata filters. The engine never owns or mutates
//! the index; collections are pre-populated by the ingestion
//! pipeline and read-only at query time.

use crate::evidence::{Passage, ScoredPassage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use studyforge_common::config::VectorStoreConfig;
use studyforge_common::errors::{AppError, Result};

/// Retrieval depth bounds
pub const MIN_K: usize = 1;
pub const MAX_K: usize = 10;

/// Conjunctive metadata filters; an absent filter matches any value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassageFilters {
    pub subject: Option<String>,
    pub grade: Option<u8>,
    /// Collection override; falls back to the configured default
    pub collection: Option<String>,
}

/// Trait for vector-similarity search backends
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Return up to `k` passages ordered by descending similarity,
    /// ties broken by passage id for reproducible responses.
    async fn search(
        &self,
        embedding: &[f32],
        filters: &PassageFilters,
        k: usize,
    ) -> Result<Vec<ScoredPassage>>;
}

/// Deterministic ordering: score desc, then passage id asc
pub fn sort_hits(hits: &mut [ScoredPassage]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.passage.id.cmp(&b.passage.id))
    });
}

/// Qdrant REST adapter
pub struct QdrantClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    default_collection: String,
}

#[derive(Deserialize)]
struct SearchResponseBody {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: PassagePayload,
}

#[derive(Deserialize, Default)]
struct PassagePayload {
    #[serde(default)]
    text: String,
    subject: Option<String>,
    grade: Option<u8>,
    chapter: Option<String>,
    #[serde(default)]
    source_title: String,
    embedding_id: Option<String>,
}

impl QdrantClient {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            default_collection: config.default_collection.clone(),
        })
    }

    fn build_filter(filters: &PassageFilters) -> Option<serde_json::Value> {
        let mut must = Vec::new();

        if let Some(subject) = &filters.subject {
            must.push(json!({ "key": "subject", "match": { "value": subject } }));
        }
        if let Some(grade) = filters.grade {
            must.push(json!({ "key": "grade", "match": { "value": grade } }));
        }

        if must.is_empty() {
            None
        } else {
            Some(json!({ "must": must }))
        }
    }
}

#[async_trait]
impl VectorSearch for QdrantClient {
    async fn search(
        &self,
        embedding: &[f32],
        filters: &PassageFilters,
        k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        let k = k.clamp(MIN_K, MAX_K);
        let collection = filters
            .collection
            .as_deref()
            .unwrap_or(&self.default_collection);

        let url = format!(
            "{}/collections/{}/points/search",
            self.endpoint, collection
        );

        let mut body = json!({
            "vector": embedding,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = Self::build_filter(filters) {
            body["filter"] = filter;
        }

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::VectorStoreUnavailable {
                message: format!("Request failed: {}", e),
            })?;

        // Absent collection is KB-insufficiency, not an outage
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::warn!(collection = collection, "Collection not found");
            return Ok(Vec::new());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VectorStoreUnavailable {
                message: format!("API error {}: {}", status, body),
            });
        }

        let body: SearchResponseBody =
            response
                .json()
                .await
                .map_err(|e| AppError::VectorStoreUnavailable {
                    message: format!("Failed to parse response: {}", e),
                })?;

        let mut hits: Vec<ScoredPassage> = body
            .result
            .into_iter()
            .map(|point| ScoredPassage {
                passage: Passage {
                    id: match point.id {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    },
                    text: point.payload.text,
                    subject: point.payload.subject,
                    grade: point.payload.grade,
                    chapter: point.payload.chapter,
                    source_title: point.payload.source_title,
                    embedding_id: point.payload.embedding_id,
                },
                score: point.score,
            })
            .collect();

        sort_hits(&mut hits);

        tracing::debug!(
            collection = collection,
            k = k,
            hits = hits.len(),
            "Vector search completed"
        );

        Ok(hits)
    }
}

/// In-memory test double with scripted hits and a call counter
pub struct StaticVectorStore {
    hits: Vec<ScoredPassage>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticVectorStore {
    /// Always return the given hits (post k-truncation)
    pub fn with_hits(hits: Vec<ScoredPassage>) -> Self {
        Self {
            hits,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail as if the backend were unreachable
    pub fn failing() -> Self {
        Self {
            hits: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorSearch for StaticVectorStore {
    async fn search(
        &self,
        _embedding: &[f32],
        filters: &PassageFilters,
        k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(AppError::VectorStoreUnavailable {
                message: "simulated outage".to_string(),
            });
        }

        let k = k.clamp(MIN_K, MAX_K);
        let mut hits: Vec<ScoredPassage> = self
            .hits
            .iter()
            .filter(|hit| {
                let subject_ok = filters
                    .subject
                    .as_ref()
                    .map_or(true, |s| hit.passage.subject.as_ref() == Some(s));
                let grade_ok = filters
                    .grade
                    .map_or(true, |g| hit.passage.grade == Some(g));
                subject_ok && grade_ok
            })
            .cloned()
            .collect();

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32, subject: &str, grade: u8) -> ScoredPassage {
        ScoredPassage {
            passage: Passage {
                id: id.to_string(),
                text: format!("text of {}", id),
                subject: Some(subject.to_string()),
                grade: Some(grade),
                chapter: None,
                source_title: "Tin học 6".to_string(),
                embedding_id: None,
            },
            score,
        }
    }

    #[test]
    fn test_sort_is_deterministic_on_ties() {
        let mut hits = vec![hit("b", 0.8, "tin_hoc", 6), hit("a", 0.8, "tin_hoc", 6)];
        sort_hits(&mut hits);
        assert_eq!(hits[0].passage.id, "a");
        assert_eq!(hits[1].passage.id, "b");
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let filters = PassageFilters {
            subject: Some("tin_hoc".to_string()),
            grade: Some(6),
            collection: None,
        };
        let filter = QdrantClient::build_filter(&filters).unwrap();
        assert_eq!(filter["must"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_absent_filters_build_no_clause() {
        assert!(QdrantClient::build_filter(&PassageFilters::default()).is_none());
    }

    #[tokio::test]
    async fn test_static_store_applies_filters_and_k() {
        let store = StaticVectorStore::with_hits(vec![
            hit("p1", 0.9, "tin_hoc", 6),
            hit("p2", 0.8, "tin_hoc", 7),
            hit("p3", 0.7, "toan", 6),
        ]);

        let filters = PassageFilters {
            subject: Some("tin_hoc".to_string()),
            grade: Some(6),
            collection: None,
        };
        let hits = store.search(&[0.0], &filters, 5).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.id, "p1");
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn test_k_is_clamped() {
        let store = StaticVectorStore::with_hits(
            (0..20).map(|i| hit(&format!("p{:02}", i), 0.9, "tin_hoc", 6)).collect(),
        );
        let hits = store
            .search(&[0.0], &PassageFilters::default(), 50)
            .await
            .unwrap();
        assert_eq!(hits.len(), MAX_K);
    }
}
