use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::AnalysisError;
use crate::experts::ExpertRegistry;
use crate::generator::AnalysisGenerator;
use crate::orchestrator::{DEFAULT_RAG_CONCURRENCY, Orchestrator};
use crate::prompts::PromptBuilder;
use crate::providers::{GeminiProvider, OpenRouterProvider, ProviderRegistry};
use crate::rag::{OpenAiEmbedder, QdrantClient, RagAnalyzer};
use crate::retry::RetryPolicy;
use crate::runner::AnalysisRunner;
use crate::source::{DEFAULT_STARTUP_API, DeepVestClient};
use crate::storage::InMemoryRunStorage;

pub const DEFAULT_QDRANT_COLLECTION: &str = "ben-horowitz";
pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got \"{value}\"")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl From<ConfigError> for AnalysisError {
    fn from(e: ConfigError) -> Self {
        AnalysisError::Configuration(e.to_string())
    }
}

/// Process settings. Credentials stay optional here; a missing one only fails the
/// requests that need it.
#[derive(Clone)]
pub struct Settings {
    pub gemini_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub qdrant_collection: String,
    pub startup_api_url: String,
    pub site_url: String,
    pub rag_concurrency: usize,
    pub retry: RetryPolicy,
    pub port: u16,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "set" } else { "unset" };
        f.debug_struct("Settings")
            .field("gemini_api_key", &set(&self.gemini_api_key))
            .field("openrouter_api_key", &set(&self.openrouter_api_key))
            .field("openai_api_key", &set(&self.openai_api_key))
            .field("qdrant_url", &self.qdrant_url)
            .field("qdrant_api_key", &set(&self.qdrant_api_key))
            .field("qdrant_collection", &self.qdrant_collection)
            .field("startup_api_url", &self.startup_api_url)
            .field("site_url", &self.site_url)
            .field("rag_concurrency", &self.rag_concurrency)
            .field("retry", &self.retry)
            .field("port", &self.port)
            .finish()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let max_retries = parse_or(get("AI_MAX_RETRIES"), "AI_MAX_RETRIES", 3u32, "a non-negative integer")?;
        let base_delay_ms = parse_or(
            get("AI_RETRY_BASE_DELAY_MS"),
            "AI_RETRY_BASE_DELAY_MS",
            1000u64,
            "a non-negative integer",
        )?;
        let rag_concurrency = parse_or(
            get("RAG_CONCURRENCY"),
            "RAG_CONCURRENCY",
            DEFAULT_RAG_CONCURRENCY,
            "a positive integer",
        )?;
        if rag_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "RAG_CONCURRENCY",
                value: "0".into(),
                expected: "a positive integer",
            });
        }
        let port = parse_or(get("PORT"), "PORT", DEFAULT_PORT, "a port number")?;

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY"),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            qdrant_url: get("QDRANT_URL"),
            qdrant_api_key: get("QDRANT_API_KEY"),
            qdrant_collection: get("QDRANT_COLLECTION")
                .unwrap_or_else(|| DEFAULT_QDRANT_COLLECTION.to_string()),
            startup_api_url: get("STARTUP_API_URL").unwrap_or_else(|| DEFAULT_STARTUP_API.to_string()),
            site_url: get("SITE_URL").unwrap_or_else(|| DEFAULT_SITE_URL.to_string()),
            rag_concurrency,
            retry: RetryPolicy::new(max_retries, Duration::from_millis(base_delay_ms)),
            port,
        })
    }

    pub fn provider_registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        match &self.gemini_api_key {
            Some(key) => registry = registry.with_direct(Arc::new(GeminiProvider::new(key.clone()))),
            None => warn!("GEMINI_API_KEY not set; gemini-2.0-flash requests will fail"),
        }
        match &self.openrouter_api_key {
            Some(key) => {
                registry = registry.with_gateway(Arc::new(OpenRouterProvider::new(
                    key.clone(),
                    self.site_url.clone(),
                )))
            }
            None => warn!("OPENROUTER_API_KEY not set; gateway models will fail"),
        }
        registry
    }

    /// Retrieval backend, when both the embedding key and the index URL are present.
    pub fn rag_analyzer(&self) -> Option<RagAnalyzer> {
        match (&self.openai_api_key, &self.qdrant_url) {
            (Some(key), Some(url)) => Some(RagAnalyzer::new(
                Arc::new(OpenAiEmbedder::new(key.clone())),
                Arc::new(QdrantClient::new(
                    url.clone(),
                    self.qdrant_api_key.clone(),
                    self.qdrant_collection.clone(),
                )),
            )),
            _ => {
                warn!("OPENAI_API_KEY or QDRANT_URL not set; RAG experts will fail");
                None
            }
        }
    }

    /// Assemble the full runner with in-memory run storage.
    pub fn build_runner(&self) -> Result<AnalysisRunner, AnalysisError> {
        let experts = Arc::new(ExpertRegistry::bundled()?);
        let generator = AnalysisGenerator::new(
            self.provider_registry(),
            Arc::new(PromptBuilder::new()),
            self.retry.clone(),
        );
        let mut orchestrator =
            Orchestrator::new(experts, generator).with_rag_concurrency(self.rag_concurrency);
        if let Some(rag) = self.rag_analyzer() {
            orchestrator = orchestrator.with_rag(rag);
        }

        info!(
            startup_api = %self.startup_api_url,
            rag_concurrency = self.rag_concurrency,
            max_retries = self.retry.max_retries,
            "Analysis runner configured"
        );
        Ok(AnalysisRunner::new(
            orchestrator,
            Arc::new(DeepVestClient::new(self.startup_api_url.clone())),
            Arc::new(InMemoryRunStorage::new()),
        ))
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var,
            value,
            expected,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.qdrant_collection, "ben-horowitz");
        assert_eq!(s.startup_api_url, "https://deepvest.pro/api");
        assert_eq!(s.rag_concurrency, 4);
        assert_eq!(s.retry.max_retries, 3);
        assert_eq!(s.retry.base_delay, Duration::from_millis(1000));
        assert_eq!(s.port, 3000);
        assert!(s.gemini_api_key.is_none());
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = settings(&[("AI_MAX_RETRIES", "three")]).err().unwrap();
        assert_eq!(
            err.to_string(),
            "AI_MAX_RETRIES must be a non-negative integer, got \"three\""
        );
        assert!(settings(&[("RAG_CONCURRENCY", "0")]).is_err());
    }

    #[test]
    fn blank_credentials_count_as_missing() {
        let s = settings(&[("GEMINI_API_KEY", "  "), ("OPENROUTER_API_KEY", "or-key")]).unwrap();
        assert!(s.gemini_api_key.is_none());
        let registry = s.provider_registry();
        assert!(registry.resolve(crate::models::SupportedModel::GeminiFlash).is_err());
        assert!(registry.resolve(crate::models::SupportedModel::Grok3).is_ok());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let s = settings(&[("OPENAI_API_KEY", "sk-secret")]).unwrap();
        let rendered = format!("{s:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("openai_api_key: \"set\""));
    }

    #[tokio::test]
    async fn runner_builds_without_any_credentials() {
        let runner = settings(&[]).unwrap().build_runner().unwrap();
        assert!(runner.list_experts().iter().any(|e| e.slug == "ben-horowitz-rag"));
    }
}
