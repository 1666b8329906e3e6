//! Scripted stand-ins for the network seams, shared by unit tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::{collections::HashMap, sync::Mutex};

use crate::error::{ProviderError, RagError};
use crate::models::SupportedModel;
use crate::providers::{CompletionProvider, Generation};
use crate::rag::{CollectionHealth, Embedder, Embedding, RetrievedContext, TokenUsage, VectorIndex};
use crate::schema::tests::sample_analysis;
use crate::source::{SourceError, StartupSource, StartupSummary};

type Respond = Box<dyn Fn(&str) -> Result<String, ProviderError> + Send + Sync>;

/// Provider answering from a closure over the prompt and recording every prompt it saw.
pub(crate) struct ScriptedProvider {
    respond: Respond,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub(crate) fn new(
        respond: impl Fn(&str) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn generate(&self, prompt: &str, model: SupportedModel) -> Result<Generation, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.respond)(prompt).map(|text| Generation {
            text,
            model: model.as_str().to_string(),
        })
    }
}

/// Batched response holding one valid analysis per slug.
pub(crate) fn batch_response(slugs: &[&str]) -> String {
    let analyses: Vec<Value> = slugs
        .iter()
        .map(|slug| {
            json!({
                "expert_slug": slug,
                "expert_name": slug.to_uppercase(),
                "analysis": sample_analysis(),
            })
        })
        .collect();
    json!({ "expert_analyses": analyses }).to_string()
}

#[derive(Default)]
pub(crate) struct StubEmbedder {
    failure: Option<String>,
}

impl StubEmbedder {
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, RagError> {
        if let Some(message) = &self.failure {
            return Err(RagError::Embedding(message.clone()));
        }
        Ok(Embedding {
            vector: vec![0.5; 8],
            usage: TokenUsage {
                prompt_tokens: text.len() as u32,
                total_tokens: text.len() as u32,
            },
        })
    }
}

/// Index returning a fixed hit list, filtered and ordered like the real search.
pub(crate) struct FixedIndex {
    hits: Vec<RetrievedContext>,
}

impl FixedIndex {
    pub(crate) fn new(hits: Vec<RetrievedContext>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl VectorIndex for FixedIndex {
    async fn search(
        &self,
        _vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedContext>, RagError> {
        let mut hits: Vec<_> = self
            .hits
            .iter()
            .filter(|h| h.score >= score_threshold)
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn collection_health(&self) -> Result<CollectionHealth, RagError> {
        Ok(CollectionHealth {
            status: "green".into(),
            points_count: self.hits.len() as u64,
            vectors_count: self.hits.len() as u64,
        })
    }
}

/// Startup source backed by a map of full records.
#[derive(Default)]
pub(crate) struct FakeSource {
    records: HashMap<String, Value>,
}

impl FakeSource {
    pub(crate) fn with(mut self, id: &str, record: Value) -> Self {
        self.records.insert(id.to_string(), record);
        self
    }
}

#[async_trait]
impl StartupSource for FakeSource {
    async fn list_startups(&self) -> Result<Vec<StartupSummary>, SourceError> {
        let mut ids: Vec<_> = self.records.keys().cloned().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| StartupSummary {
                name: self.records[&id]["name"].as_str().unwrap_or_default().to_string(),
                id,
                extra: Default::default(),
            })
            .collect())
    }

    async fn fetch_full(&self, id: &str) -> Result<Value, SourceError> {
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}
