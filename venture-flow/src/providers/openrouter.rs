use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{CompletionProvider, Generation, MAX_OUTPUT_TOKENS, PROVIDER_TIMEOUT, TEMPERATURE};
use crate::error::{ProviderError, ProviderErrorKind};
use crate::models::SupportedModel;

const PROVIDER: &str = "OpenRouter";
pub const DEFAULT_OPENROUTER_BASE: &str = "https://openrouter.ai/api/v1";
const APP_TITLE: &str = "AI Venture Agent";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

/// OpenAI-compatible multi-model gateway.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    site_url: String,
    timeout: Duration,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>, site_url: impl Into<String>) -> Self {
        Self::with_base_url(api_key, site_url, DEFAULT_OPENROUTER_BASE)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        site_url: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            site_url: site_url.into(),
            timeout: PROVIDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn generate(
        &self,
        prompt: &str,
        model: SupportedModel,
    ) -> Result<Generation, ProviderError> {
        let body = ChatRequest {
            model: model.as_str(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
        };

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.site_url)
            .header("X-Title", APP_TITLE)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ProviderError::timeout(PROVIDER))?
            .map_err(|e| ProviderError::new(PROVIDER, ProviderErrorKind::Transport, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), model = %model, body = %text, "OpenRouter request failed");
            let reason = format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
            let message = if text.trim().is_empty() {
                reason
            } else {
                format!("{reason} - {}", text.trim())
            };
            return Err(ProviderError::status(PROVIDER, status.as_u16(), message));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::new(PROVIDER, ProviderErrorKind::Api, format!("unreadable response: {e}"))
        })?;

        if let Some(api_error) = parsed.error {
            error!(model = %model, message = %api_error.message, "OpenRouter returned an error object");
            return Err(ProviderError::new(PROVIDER, ProviderErrorKind::Api, api_error.message));
        }

        if let Some(usage) = &parsed.usage {
            debug!(
                model = %model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "OpenRouter usage"
            );
        }

        let answered_by = parsed
            .model
            .clone()
            .unwrap_or_else(|| model.as_str().to_string());

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::new(PROVIDER, ProviderErrorKind::EmptyResponse, "no content in response")
            })?;

        Ok(Generation {
            text,
            model: answered_by,
        })
    }
}
