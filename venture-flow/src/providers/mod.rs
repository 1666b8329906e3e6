//! LLM provider adapters and the registry that routes a model to one of them.

mod gemini;
mod openrouter;

pub use gemini::GeminiProvider;
pub use openrouter::OpenRouterProvider;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

use crate::error::{AnalysisError, ProviderError, Result};
use crate::models::SupportedModel;

/// Client-side deadline for one generation call.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(120);
pub const TEMPERATURE: f32 = 0.1;
pub const MAX_OUTPUT_TOKENS: u32 = 4096;

/// Raw text returned by a provider, plus the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub model: String,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        prompt: &str,
        model: SupportedModel,
    ) -> std::result::Result<Generation, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Single fixed model over the vendor API.
    Direct,
    /// Multi-model gateway selecting the backing model by name.
    Gateway,
}

impl ProviderKind {
    pub fn for_model(model: SupportedModel) -> Self {
        match model {
            SupportedModel::GeminiFlash => ProviderKind::Direct,
            _ => ProviderKind::Gateway,
        }
    }
}

/// A resolved route: which adapter answers for a model.
#[derive(Clone)]
pub enum ProviderRoute {
    Direct(Arc<dyn CompletionProvider>),
    Gateway(Arc<dyn CompletionProvider>),
}

impl ProviderRoute {
    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        match self {
            ProviderRoute::Direct(p) | ProviderRoute::Gateway(p) => p,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderRoute::Direct(_) => ProviderKind::Direct,
            ProviderRoute::Gateway(_) => ProviderKind::Gateway,
        }
    }
}

/// Maps models to configured providers. A provider is absent when its credential is missing.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    direct: Option<Arc<dyn CompletionProvider>>,
    gateway: Option<Arc<dyn CompletionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_direct(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.direct = Some(provider);
        self
    }

    pub fn with_gateway(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.gateway = Some(provider);
        self
    }

    pub fn resolve(&self, model: SupportedModel) -> Result<ProviderRoute> {
        match ProviderKind::for_model(model) {
            ProviderKind::Direct => self
                .direct
                .clone()
                .map(ProviderRoute::Direct)
                .ok_or_else(|| AnalysisError::Configuration("Gemini API key not configured".into())),
            ProviderKind::Gateway => self
                .gateway
                .clone()
                .map(ProviderRoute::Gateway)
                .ok_or_else(|| {
                    AnalysisError::Configuration("OpenRouter API key not configured".into())
                }),
        }
    }
}
