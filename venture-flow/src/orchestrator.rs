//! Fan-out/fan-in over the selected experts of one startup.
//!
//! Regular experts share one batched model call. RAG experts each run retrieval and their
//! own call through a bounded pool. Both streams are merged into a single loop that owns
//! the run's [`MultiExpertResult`] and replaces entries whole, so concurrent completions
//! never touch shared state.

use futures::{
    StreamExt,
    future,
    stream::{self, BoxStream},
};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{AnalysisError, Result};
use crate::experts::{Expert, ExpertRegistry, RagConfig};
use crate::generator::AnalysisGenerator;
use crate::models::{AnalysisRequest, EntryMetadata, ExpertAnalysisEntry, MultiExpertResult, SupportedModel};
use crate::prompts::TemplateKey;
use crate::rag::RagAnalyzer;

pub const DEFAULT_RAG_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct Orchestrator {
    experts: Arc<ExpertRegistry>,
    generator: AnalysisGenerator,
    rag: Option<RagAnalyzer>,
    rag_concurrency: usize,
}

impl Orchestrator {
    pub fn new(experts: Arc<ExpertRegistry>, generator: AnalysisGenerator) -> Self {
        Self {
            experts,
            generator,
            rag: None,
            rag_concurrency: DEFAULT_RAG_CONCURRENCY,
        }
    }

    pub fn with_rag(mut self, rag: RagAnalyzer) -> Self {
        self.rag = Some(rag);
        self
    }

    /// Upper bound on RAG experts in flight at once. Zero is treated as one.
    pub fn with_rag_concurrency(mut self, limit: usize) -> Self {
        self.rag_concurrency = limit.max(1);
        self
    }

    pub fn experts(&self) -> &ExpertRegistry {
        &self.experts
    }

    pub fn rag(&self) -> Option<&RagAnalyzer> {
        self.rag.as_ref()
    }

    /// Analyze one startup with every selected expert.
    ///
    /// Fails only when the selection itself is invalid; per-expert failures end up as
    /// `error` entries. Every entry change is forwarded on `updates`; a closed receiver
    /// does not stop the run.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        updates: &mpsc::Sender<ExpertAnalysisEntry>,
    ) -> Result<MultiExpertResult> {
        let selected = self.experts.resolve(&request.expert_slugs)?;
        let model = request.selected_model;
        let startup = &request.startup_data;

        let mut result = MultiExpertResult::new(
            selected
                .iter()
                .map(|e| ExpertAnalysisEntry::pending(&e.slug, &e.name))
                .collect(),
        );

        let regular: Vec<&Expert> = selected.iter().filter(|e| e.rag().is_none()).collect();
        let rag: Vec<(&Expert, &RagConfig)> = selected
            .iter()
            .filter_map(|e| e.rag().map(|config| (e, config)))
            .collect();

        info!(
            model = %model,
            regular = regular.len(),
            rag = rag.len(),
            "Starting analysis run"
        );

        let batch_updates: BoxStream<'_, ExpertAnalysisEntry> = if regular.is_empty() {
            stream::empty().boxed()
        } else {
            let loading: Vec<ExpertAnalysisEntry> = regular
                .iter()
                .map(|e| ExpertAnalysisEntry::loading(&e.slug, &e.name))
                .collect();
            stream::iter(loading)
                .chain(
                    stream::once(self.run_batch(regular.clone(), startup, model))
                        .flat_map(stream::iter),
                )
                .boxed()
        };

        let rag_updates = stream::iter(rag.iter().copied())
            .map(|(expert, config)| self.rag_expert_updates(expert, config, startup, model))
            .flatten_unordered(self.rag_concurrency)
            .boxed();

        let mut merged = stream::select(batch_updates, rag_updates);
        while let Some(entry) = merged.next().await {
            if !result.replace(entry.clone()) {
                warn!(expert = %entry.expert_slug, "Dropping update for expert outside the run");
                continue;
            }
            if updates.send(entry).await.is_err() {
                debug!("Update receiver closed; continuing run");
            }
        }

        info!(finished = result.is_finished(), "Analysis run complete");
        Ok(result)
    }

    /// Re-run one expert alone. Regular experts use the single-expert prompt, RAG experts
    /// repeat retrieval.
    pub async fn retry_expert(
        &self,
        startup: &Value,
        slug: &str,
        model: SupportedModel,
    ) -> Result<ExpertAnalysisEntry> {
        let expert = self
            .experts
            .get(slug)
            .ok_or_else(|| AnalysisError::UnknownExpert(slug.to_string()))?;

        info!(expert = %slug, model = %model, "Retrying expert");
        let entry = match expert.rag() {
            Some(config) => self.run_rag_expert(expert, config, startup, model).await,
            None => self.run_single(expert, startup, model).await,
        };
        Ok(entry)
    }

    async fn run_batch(
        &self,
        experts: Vec<&Expert>,
        startup: &Value,
        model: SupportedModel,
    ) -> Vec<ExpertAnalysisEntry> {
        let mut vars = HashMap::new();
        vars.insert("EXPERTS", experts_block(&experts));
        vars.insert("PROJECT_DATA", project_data(startup));
        let prompt = self.generator.prompts().build(TemplateKey::MultiExpert, &vars);

        match self.generator.analyze_batch(&prompt, model).await {
            Ok(generated) => {
                let metadata = EntryMetadata {
                    processing_time_ms: generated.processing_time_ms,
                    attempts: generated.attempts,
                    model: generated.model,
                    rag_context_chunks: None,
                    rag_tokens: None,
                };
                let mut by_slug: HashMap<String, _> = generated
                    .value
                    .into_iter()
                    .map(|a| (a.expert_slug, a.analysis))
                    .collect();

                let entries: Vec<ExpertAnalysisEntry> = experts
                    .iter()
                    .map(|e| match by_slug.remove(&e.slug) {
                        Some(analysis) => {
                            ExpertAnalysisEntry::completed(&e.slug, &e.name, analysis, metadata.clone())
                        }
                        None => {
                            warn!(expert = %e.slug, "Expert missing from batch response");
                            ExpertAnalysisEntry::failed(
                                &e.slug,
                                &e.name,
                                format!("No analysis returned for expert \"{}\"", e.slug),
                            )
                        }
                    })
                    .collect();

                if !by_slug.is_empty() {
                    let extra: Vec<_> = by_slug.keys().cloned().collect();
                    warn!(?extra, "Ignoring analyses for experts outside the batch");
                }
                info!(experts = experts.len(), "Batch analysis complete");
                entries
            }
            Err(e) => {
                let message = e.to_string();
                error!(experts = experts.len(), error = %message, "Batch analysis failed");
                experts
                    .iter()
                    .map(|ex| ExpertAnalysisEntry::failed(&ex.slug, &ex.name, message.clone()))
                    .collect()
            }
        }
    }

    async fn run_single(&self, expert: &Expert, startup: &Value, model: SupportedModel) -> ExpertAnalysisEntry {
        let vars = expert_vars(expert, startup);
        let prompt = self.generator.prompts().build(TemplateKey::SingleExpert, &vars);
        match self.generator.analyze(&prompt, model).await {
            Ok(generated) => ExpertAnalysisEntry::completed(
                &expert.slug,
                &expert.name,
                generated.value,
                EntryMetadata {
                    processing_time_ms: generated.processing_time_ms,
                    attempts: generated.attempts,
                    model: generated.model,
                    rag_context_chunks: None,
                    rag_tokens: None,
                },
            ),
            Err(e) => {
                error!(expert = %expert.slug, error = %e, "Expert analysis failed");
                ExpertAnalysisEntry::failed(&expert.slug, &expert.name, e.to_string())
            }
        }
    }

    fn rag_expert_updates<'a>(
        &'a self,
        expert: &'a Expert,
        config: &'a RagConfig,
        startup: &'a Value,
        model: SupportedModel,
    ) -> BoxStream<'a, ExpertAnalysisEntry> {
        stream::once(future::ready(ExpertAnalysisEntry::loading(&expert.slug, &expert.name)))
            .chain(stream::once(self.run_rag_expert(expert, config, startup, model)))
            .boxed()
    }

    async fn run_rag_expert(
        &self,
        expert: &Expert,
        config: &RagConfig,
        startup: &Value,
        model: SupportedModel,
    ) -> ExpertAnalysisEntry {
        match self.analyze_with_rag(expert, config, startup, model).await {
            Ok(entry) => entry,
            Err(e) => {
                error!(expert = %expert.slug, kind = ?e.kind(), error = %e, "RAG expert failed");
                ExpertAnalysisEntry::failed(&expert.slug, &expert.name, e.to_string())
            }
        }
    }

    async fn analyze_with_rag(
        &self,
        expert: &Expert,
        config: &RagConfig,
        startup: &Value,
        model: SupportedModel,
    ) -> Result<ExpertAnalysisEntry> {
        let started = Instant::now();
        let rag = self
            .rag
            .as_ref()
            .ok_or_else(|| AnalysisError::Configuration("RAG retrieval is not configured".into()))?;

        let context = rag.retrieve_context(startup, config).await?;

        let mut vars = expert_vars(expert, startup);
        let template = if context.is_context_relevant() {
            vars.insert("RAG_CONTEXT", context.render());
            TemplateKey::RagExpert
        } else {
            info!(expert = %expert.slug, "No relevant context retrieved; using plain prompt");
            TemplateKey::SingleExpert
        };
        let prompt = self.generator.prompts().build(template, &vars);

        let generated = self.generator.analyze(&prompt, model).await?;
        let metadata = EntryMetadata {
            processing_time_ms: started.elapsed().as_millis() as u64,
            attempts: generated.attempts,
            model: generated.model,
            rag_context_chunks: Some(context.context.len()),
            rag_tokens: Some(context.total_tokens),
        };
        info!(
            expert = %expert.slug,
            chunks = context.context.len(),
            processing_time_ms = metadata.processing_time_ms,
            "RAG expert complete"
        );
        Ok(ExpertAnalysisEntry::completed(&expert.slug, &expert.name, generated.value, metadata))
    }
}

fn project_data(startup: &Value) -> String {
    serde_json::to_string_pretty(startup).unwrap_or_else(|_| startup.to_string())
}

fn expertise(expert: &Expert) -> String {
    if expert.focus.trim().is_empty() {
        expert.expertise.clone()
    } else {
        format!("{}\nFocus: {}", expert.expertise, expert.focus)
    }
}

fn expert_vars(expert: &Expert, startup: &Value) -> HashMap<&'static str, String> {
    HashMap::from([
        ("EXPERT_NAME", expert.name.clone()),
        ("EXPERT_FUND", expert.fund.clone()),
        ("EXPERT_METHODOLOGY", expert.methodology.clone()),
        ("EXPERT_EXPERTISE", expertise(expert)),
        ("PROJECT_DATA", project_data(startup)),
    ])
}

fn experts_block(experts: &[&Expert]) -> String {
    experts
        .iter()
        .enumerate()
        .map(|(i, e)| {
            format!(
                "{}. slug: {}\n   name: {}\n   fund: {}\n   methodology: {}\n   expertise: {}",
                i + 1,
                e.slug,
                e.name,
                e.fund,
                e.methodology,
                expertise(e).replace('\n', "\n   ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
