//! One model call end to end: route, reinforce, call, extract, validate, retry.

use std::{sync::Arc, time::Instant};
use tracing::{debug, info};

use crate::error::{AnalysisError, MalformedOutput, Result};
use crate::extract::extract;
use crate::models::SupportedModel;
use crate::prompts::PromptBuilder;
use crate::providers::{Generation, ProviderRegistry};
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::schema::{self, AnalysisResult, ExpertAnalysis};

/// A validated payload and how it was obtained.
#[derive(Debug, Clone)]
pub struct Generated<T> {
    pub value: T,
    pub attempts: u32,
    /// Model reported by the provider, which may differ from the requested one.
    pub model: String,
    pub processing_time_ms: u64,
}

#[derive(Clone)]
pub struct AnalysisGenerator {
    providers: ProviderRegistry,
    prompts: Arc<PromptBuilder>,
    retry: RetryPolicy,
}

impl AnalysisGenerator {
    pub fn new(providers: ProviderRegistry, prompts: Arc<PromptBuilder>, retry: RetryPolicy) -> Self {
        Self {
            providers,
            prompts,
            retry,
        }
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Single-expert call returning one validated analysis.
    pub async fn analyze(&self, prompt: &str, model: SupportedModel) -> Result<Generated<AnalysisResult>> {
        self.generate(prompt, model, |raw| {
            let candidate = extract(raw)?;
            schema::validate(&candidate).map_err(MalformedOutput::Validation)
        })
        .await
    }

    /// Multi-expert call returning `expert_analyses`, unmerged.
    pub async fn analyze_batch(
        &self,
        prompt: &str,
        model: SupportedModel,
    ) -> Result<Generated<Vec<ExpertAnalysis>>> {
        self.generate(prompt, model, |raw| {
            let candidate = extract(raw)?;
            schema::validate_batch(&candidate).map_err(MalformedOutput::Validation)
        })
        .await
    }

    async fn generate<T, Parse>(
        &self,
        prompt: &str,
        model: SupportedModel,
        parse: Parse,
    ) -> Result<Generated<T>>
    where
        Parse: Fn(&str) -> std::result::Result<T, MalformedOutput>,
    {
        let route = self.providers.resolve(model)?;
        let provider = Arc::clone(route.provider());
        let prompt = self.prompts.reinforce_for_model(prompt, model);
        let started = Instant::now();

        debug!(
            provider = provider.name(),
            route = ?route.kind(),
            model = %model,
            prompt_chars = prompt.len(),
            "Sending analysis prompt"
        );

        let outcome = execute_with_retry(
            &self.retry,
            || {
                let provider = Arc::clone(&provider);
                let prompt = prompt.clone();
                async move {
                    provider
                        .generate(&prompt, model)
                        .await
                        .map_err(AnalysisError::from)
                }
            },
            |generation: &Generation| {
                parse(&generation.text).map(|value| (value, generation.model.clone()))
            },
        )
        .await?;

        let processing_time_ms = started.elapsed().as_millis() as u64;
        let (value, answered_by) = outcome.value;
        info!(
            provider = provider.name(),
            requested = %model,
            answered_by = %answered_by,
            attempts = outcome.attempts,
            processing_time_ms,
            "Analysis generated"
        );

        Ok(Generated {
            value,
            attempts: outcome.attempts,
            model: answered_by,
            processing_time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::ScriptedProvider;
    use std::time::Duration;

    fn generator(provider: Arc<ScriptedProvider>) -> AnalysisGenerator {
        AnalysisGenerator::new(
            ProviderRegistry::new()
                .with_direct(provider.clone())
                .with_gateway(provider),
            Arc::new(PromptBuilder::new()),
            RetryPolicy::new(3, Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn fenced_output_is_extracted_and_validated() {
        let body = schema::tests::sample_analysis().to_string();
        let provider = Arc::new(ScriptedProvider::always(format!("Sure!\n```json\n{body}\n```")));
        let generated = generator(provider.clone())
            .analyze("Analyze Acme", SupportedModel::ClaudeSonnet4)
            .await
            .unwrap();

        assert_eq!(generated.attempts, 1);
        assert_eq!(generated.model, "anthropic/claude-sonnet-4");
        assert_eq!(provider.prompts().len(), 1);
    }

    #[tokio::test]
    async fn strict_models_get_reinforced_prompts() {
        let provider = Arc::new(ScriptedProvider::always(
            schema::tests::sample_analysis().to_string(),
        ));
        let generator = generator(provider.clone());
        generator.analyze("Analyze", SupportedModel::DeepseekR1).await.unwrap();
        generator.analyze("Analyze", SupportedModel::ClaudeSonnet4).await.unwrap();

        let prompts = provider.prompts();
        assert!(prompts[0].contains("STRICT OUTPUT RULES"));
        assert_eq!(prompts[1], "Analyze");
    }

    #[tokio::test]
    async fn invalid_output_is_retried_then_reported() {
        let provider = Arc::new(ScriptedProvider::always(r#"{"unified_analysis": {}}"#));
        let err = generator(provider.clone())
            .analyze("Analyze", SupportedModel::Grok3)
            .await
            .unwrap_err();

        assert_eq!(provider.prompts().len(), 4);
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
        let message = err.to_string();
        assert!(message.starts_with("AI analysis failed after 4 attempts: Validation failed: "));
        assert!(message.contains("unified_analysis.milestone_execution: required"));
    }

    #[tokio::test]
    async fn missing_gateway_fails_before_any_call() {
        let provider = Arc::new(ScriptedProvider::always("{}"));
        let generator = AnalysisGenerator::new(
            ProviderRegistry::new().with_direct(provider.clone()),
            Arc::new(PromptBuilder::new()),
            RetryPolicy::default(),
        );
        let err = generator
            .analyze("Analyze", SupportedModel::O4MiniHigh)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
        assert!(provider.prompts().is_empty());
    }
}
