use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use super::RetrievedContext;
use crate::error::RagError;

/// Payload keys probed, in order, for a point's passage text.
const CONTENT_FIELDS: [&str; 4] = ["text", "content", "chunk", "page_content"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionHealth {
    pub status: String,
    pub points_count: u64,
    pub vectors_count: u64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Hits ordered by descending score; empty when nothing clears `score_threshold`.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedContext>, RagError>;

    async fn collection_health(&self) -> Result<CollectionHealth, RagError>;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    score_threshold: f32,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    vectors_count: Option<u64>,
}

/// REST client for a single Qdrant collection.
pub struct QdrantClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    collection: String,
}

impl QdrantClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            api_key,
            collection: collection.into(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }
}

fn point_content(payload: &Map<String, Value>) -> Option<String> {
    CONTENT_FIELDS
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn point_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl VectorIndex for QdrantClient {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedContext>, RagError> {
        let body = SearchRequest {
            vector,
            limit: top_k,
            score_threshold,
            with_payload: true,
        };
        let request = self.client.post(format!(
            "{}/collections/{}/points/search",
            self.url, self.collection
        ));

        let response = self
            .authorized(request)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), collection = %self.collection, "Vector search failed");
            return Err(RagError::Search(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RagError::Search(format!("unreadable response: {e}")))?;

        let mut hits: Vec<RetrievedContext> = parsed
            .result
            .into_iter()
            .filter(|p| p.score >= score_threshold)
            .filter_map(|p| {
                let content = p.payload.as_ref().and_then(point_content)?;
                Some(RetrievedContext {
                    content,
                    score: p.score,
                    source_id: point_id(&p.id),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);

        debug!(collection = %self.collection, hits = hits.len(), "Vector search complete");
        Ok(hits)
    }

    async fn collection_health(&self) -> Result<CollectionHealth, RagError> {
        let request = self
            .client
            .get(format!("{}/collections/{}", self.url, self.collection));
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RagError::Search(format!(
                "collection {} unavailable: HTTP {}",
                self.collection,
                status.as_u16()
            )));
        }

        let parsed: CollectionResponse = response
            .json()
            .await
            .map_err(|e| RagError::Search(format!("unreadable response: {e}")))?;

        Ok(CollectionHealth {
            status: parsed.result.status,
            points_count: parsed.result.points_count.unwrap_or(0),
            vectors_count: parsed.result.vectors_count.unwrap_or(0),
        })
    }
}
