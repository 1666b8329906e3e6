//! Startup data provider. Records are opaque JSON passed to the prompt builder as-is.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::error::AnalysisError;

pub const DEFAULT_STARTUP_API: &str = "https://deepvest.pro/api";

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("startup API request failed: {0}")]
    Http(String),
    #[error("startup API error: {status} {reason}")]
    Status { status: u16, reason: String },
    #[error("startup API returned an unsuccessful response")]
    Unsuccessful,
    #[error("startup {0} not found")]
    NotFound(String),
    #[error("unreadable startup API response: {0}")]
    Decode(String),
}

impl From<SourceError> for AnalysisError {
    fn from(e: SourceError) -> Self {
        AnalysisError::Source(e.to_string())
    }
}

/// List entry; only `id` and `name` are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupSummary {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid startup id: {other}"))),
    }
}

#[async_trait]
pub trait StartupSource: Send + Sync {
    async fn list_startups(&self) -> Result<Vec<StartupSummary>, SourceError>;

    async fn fetch_full(&self, id: &str) -> Result<Value, SourceError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    #[serde(default)]
    projects: Vec<StartupSummary>,
}

pub struct DeepVestClient {
    client: Client,
    base_url: String,
}

impl DeepVestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, url: &str, id: Option<&str>) -> Result<Value, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(SourceError::NotFound(id.to_string()));
            }
        }
        if !status.is_success() {
            error!(status = status.as_u16(), url, "Startup API request failed");
            return Err(SourceError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StartupSource for DeepVestClient {
    async fn list_startups(&self) -> Result<Vec<StartupSummary>, SourceError> {
        let body = self.get_json(&format!("{}/projects", self.base_url), None).await?;
        let envelope: Envelope =
            serde_json::from_value(body).map_err(|e| SourceError::Decode(e.to_string()))?;
        if !envelope.success {
            return Err(SourceError::Unsuccessful);
        }
        let list: ProjectList =
            serde_json::from_value(envelope.data).map_err(|e| SourceError::Decode(e.to_string()))?;
        debug!(count = list.projects.len(), "Fetched startup list");
        Ok(list.projects)
    }

    async fn fetch_full(&self, id: &str) -> Result<Value, SourceError> {
        let url = format!("{}/projects/{}/full", self.base_url, id);
        let body = self.get_json(&url, Some(id)).await?;

        // The full endpoint may or may not wrap the record in `{success, data}`.
        let wrapped = body
            .as_object()
            .is_some_and(|obj| obj.contains_key("success") && obj.contains_key("data"));
        if !wrapped {
            return Ok(body);
        }
        let envelope: Envelope =
            serde_json::from_value(body).map_err(|e| SourceError::Decode(e.to_string()))?;
        if envelope.success {
            Ok(envelope.data)
        } else {
            Err(SourceError::Unsuccessful)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lists_projects_from_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "projects": [
                    { "id": 12, "name": "Acme", "status": "mvp" },
                    { "id": "b-7", "name": "Beta" }
                ]}
            })))
            .mount(&server)
            .await;

        let client = DeepVestClient::new(server.uri());
        let startups = client.list_startups().await.unwrap();
        assert_eq!(startups.len(), 2);
        assert_eq!(startups[0].id, "12");
        assert_eq!(startups[0].extra["status"], "mvp");
        assert_eq!(startups[1].id, "b-7");
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
            .mount(&server)
            .await;

        let client = DeepVestClient::new(server.uri());
        assert!(matches!(client.list_startups().await, Err(SourceError::Unsuccessful)));
    }

    #[tokio::test]
    async fn full_record_is_unwrapped_or_passed_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/12/full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "project": { "name": "Acme" }, "milestones": [] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/13/full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "project": { "name": "Bare" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/99/full"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = DeepVestClient::new(server.uri());
        assert_eq!(client.fetch_full("12").await.unwrap()["project"]["name"], "Acme");
        assert_eq!(client.fetch_full("13").await.unwrap()["project"]["name"], "Bare");
        assert!(matches!(client.fetch_full("99").await, Err(SourceError::NotFound(id)) if id == "99"));
    }
}
