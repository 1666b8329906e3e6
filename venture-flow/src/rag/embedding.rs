use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::RagError;

pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const EMBEDDING_DIMENSIONS: usize = 1536;
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding, RagError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_OPENAI_BASE)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, RagError> {
        let request = EmbeddingRequest {
            model: EMBEDDING_MODEL,
            input: text,
            dimensions: EMBEDDING_DIMENSIONS,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %detail, "Embedding request failed");
            return Err(RagError::Embedding(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("unreadable response: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::Embedding("no embedding returned".into()))?;

        if vector.len() != EMBEDDING_DIMENSIONS {
            return Err(RagError::Embedding(format!(
                "expected {EMBEDDING_DIMENSIONS} dimensions, got {}",
                vector.len()
            )));
        }

        debug!(
            prompt_tokens = parsed.usage.prompt_tokens,
            total_tokens = parsed.usage.total_tokens,
            "Query embedded"
        );
        Ok(Embedding {
            vector,
            usage: parsed.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn embeds_with_fixed_model_and_dimensions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_json(json!({
                "model": "text-embedding-3-small",
                "input": "Acme B2B SaaS",
                "dimensions": 1536
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": vec![0.01_f32; 1536], "index": 0 }],
                "usage": { "prompt_tokens": 4, "total_tokens": 4 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::with_base_url("sk-test", server.uri());
        let embedding = embedder.embed("Acme B2B SaaS").await.unwrap();
        assert_eq!(embedding.vector.len(), 1536);
        assert_eq!(embedding.usage.total_tokens, 4);
    }

    #[tokio::test]
    async fn non_success_status_carries_provider_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::with_base_url("bad", server.uri());
        let err = embedder.embed("q").await.unwrap_err();
        assert!(matches!(&err, RagError::Embedding(msg) if msg.contains("401") && msg.contains("invalid api key")));
    }

    #[tokio::test]
    async fn wrong_dimensionality_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [0.1, 0.2] }]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::with_base_url("k", server.uri());
        assert!(matches!(embedder.embed("q").await, Err(RagError::Embedding(_))));
    }
}
