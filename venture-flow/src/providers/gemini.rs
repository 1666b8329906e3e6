use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{CompletionProvider, Generation, MAX_OUTPUT_TOKENS, PROVIDER_TIMEOUT, TEMPERATURE};
use crate::error::{ProviderError, ProviderErrorKind};
use crate::models::SupportedModel;

const PROVIDER: &str = "Gemini";
pub const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Direct Google Generative Language API client. Always answers with `gemini-2.0-flash`.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_GEMINI_BASE)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: PROVIDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            SupportedModel::GeminiFlash.as_str()
        )
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn generate(
        &self,
        prompt: &str,
        _model: SupportedModel,
    ) -> Result<Generation, ProviderError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let send = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ProviderError::timeout(PROVIDER))?
            .map_err(|e| ProviderError::new(PROVIDER, ProviderErrorKind::Transport, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %text, "Gemini request failed");
            return Err(ProviderError::status(
                PROVIDER,
                status.as_u16(),
                format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or("")),
            ));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            ProviderError::new(PROVIDER, ProviderErrorKind::Api, format!("unreadable response: {e}"))
        })?;

        if let Some(api_error) = parsed.error {
            return Err(ProviderError::new(PROVIDER, ProviderErrorKind::Api, api_error.message));
        }

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::new(PROVIDER, ProviderErrorKind::EmptyResponse, "no content generated")
            })?;

        debug!(chars = text.len(), "Gemini response received");
        Ok(Generation {
            text,
            model: SupportedModel::GeminiFlash.as_str().to_string(),
        })
    }
}
