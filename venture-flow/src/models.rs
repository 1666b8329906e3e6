use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

use crate::error::AnalysisError;
use crate::schema::AnalysisResult;

/// Model identifiers a caller may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SupportedModel {
    #[default]
    GeminiFlash,
    Minimax01,
    MistralSmall32,
    Gemini25Flash,
    Grok3,
    DeepseekR1,
    ClaudeSonnet4,
    Phi4ReasoningPlus,
    Qwen3A3b,
    MaiDsR1,
    O4MiniHigh,
}

impl SupportedModel {
    pub const ALL: [SupportedModel; 11] = [
        SupportedModel::GeminiFlash,
        SupportedModel::Minimax01,
        SupportedModel::MistralSmall32,
        SupportedModel::Gemini25Flash,
        SupportedModel::Grok3,
        SupportedModel::DeepseekR1,
        SupportedModel::ClaudeSonnet4,
        SupportedModel::Phi4ReasoningPlus,
        SupportedModel::Qwen3A3b,
        SupportedModel::MaiDsR1,
        SupportedModel::O4MiniHigh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SupportedModel::GeminiFlash => "gemini-2.0-flash",
            SupportedModel::Minimax01 => "minimax/minimax-01",
            SupportedModel::MistralSmall32 => "mistralai/mistral-small-3.2-24b-instruct:free",
            SupportedModel::Gemini25Flash => "google/gemini-2.5-flash",
            SupportedModel::Grok3 => "x-ai/grok-3",
            SupportedModel::DeepseekR1 => "deepseek/deepseek-r1-0528:free",
            SupportedModel::ClaudeSonnet4 => "anthropic/claude-sonnet-4",
            SupportedModel::Phi4ReasoningPlus => "microsoft/phi-4-reasoning-plus:free",
            SupportedModel::Qwen3A3b => "qwen/qwen3-30b-a3b:free",
            SupportedModel::MaiDsR1 => "microsoft/mai-ds-r1:free",
            SupportedModel::O4MiniHigh => "openai/o4-mini-high",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SupportedModel::GeminiFlash => "Gemini 2.0 Flash (Google)",
            SupportedModel::Minimax01 => "MiniMax-01 (OpenRouter)",
            SupportedModel::MistralSmall32 => "Mistral Small 3.2 24B (OpenRouter)",
            SupportedModel::Gemini25Flash => "Gemini 2.5 Flash (OpenRouter)",
            SupportedModel::Grok3 => "Grok 3 (OpenRouter)",
            SupportedModel::DeepseekR1 => "DeepSeek R1 0528 (OpenRouter)",
            SupportedModel::ClaudeSonnet4 => "Claude Sonnet 4 (OpenRouter)",
            SupportedModel::Phi4ReasoningPlus => "Phi 4 Reasoning Plus (OpenRouter)",
            SupportedModel::Qwen3A3b => "Qwen3 30B A3B (OpenRouter)",
            SupportedModel::MaiDsR1 => "MAI DS R1 (OpenRouter)",
            SupportedModel::O4MiniHigh => "o4 Mini High (OpenRouter)",
        }
    }
}

impl fmt::Display for SupportedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportedModel {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SupportedModel::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AnalysisError::UnknownModel(s.to_string()))
    }
}

impl Serialize for SupportedModel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SupportedModel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One analysis request. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub startup_data: Value,
    pub expert_slugs: Vec<String>,
    pub selected_model: SupportedModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub processing_time_ms: u64,
    pub attempts: u32,
    /// Model that actually answered; gateways may substitute the requested one.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_context_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_tokens: Option<usize>,
}

/// Lifecycle of one expert in a run: `pending -> loading -> completed | error`,
/// and `error -> loading` on an explicit retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EntryState {
    Pending,
    Loading,
    Completed {
        analysis: Box<AnalysisResult>,
        metadata: EntryMetadata,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertAnalysisEntry {
    pub expert_slug: String,
    pub expert_name: String,
    #[serde(flatten)]
    pub state: EntryState,
}

impl ExpertAnalysisEntry {
    pub fn pending(slug: &str, name: &str) -> Self {
        Self::with_state(slug, name, EntryState::Pending)
    }

    pub fn loading(slug: &str, name: &str) -> Self {
        Self::with_state(slug, name, EntryState::Loading)
    }

    pub fn completed(slug: &str, name: &str, analysis: AnalysisResult, metadata: EntryMetadata) -> Self {
        Self::with_state(
            slug,
            name,
            EntryState::Completed {
                analysis: Box::new(analysis),
                metadata,
            },
        )
    }

    pub fn failed(slug: &str, name: &str, error: impl Into<String>) -> Self {
        Self::with_state(slug, name, EntryState::Error { error: error.into() })
    }

    fn with_state(slug: &str, name: &str, state: EntryState) -> Self {
        Self {
            expert_slug: slug.to_string(),
            expert_name: name.to_string(),
            state,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            EntryState::Pending => "pending",
            EntryState::Loading => "loading",
            EntryState::Completed { .. } => "completed",
            EntryState::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, EntryState::Completed { .. } | EntryState::Error { .. })
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        match &self.state {
            EntryState::Completed { analysis, .. } => Some(analysis.as_ref()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            EntryState::Error { error } => Some(error.as_str()),
            _ => None,
        }
    }
}

/// Per-run result set in selection order. Entries are only ever replaced whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiExpertResult {
    entries: Vec<ExpertAnalysisEntry>,
}

impl MultiExpertResult {
    pub fn new(entries: Vec<ExpertAnalysisEntry>) -> Self {
        Self { entries }
    }

    /// Replace the entry with the same slug. Returns `false` when the slug is not part of the run.
    pub fn replace(&mut self, entry: ExpertAnalysisEntry) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.expert_slug == entry.expert_slug)
        {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, slug: &str) -> Option<&ExpertAnalysisEntry> {
        self.entries.iter().find(|e| e.expert_slug == slug)
    }

    pub fn entries(&self) -> &[ExpertAnalysisEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.entries.iter().all(ExpertAnalysisEntry::is_terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_ids_round_trip_through_serde() {
        for model in SupportedModel::ALL {
            let encoded = serde_json::to_value(model).unwrap();
            assert_eq!(encoded, json!(model.as_str()));
            let decoded: SupportedModel = serde_json::from_value(encoded).unwrap();
            assert_eq!(decoded, model);
        }
        assert!("gpt-9".parse::<SupportedModel>().is_err());
    }

    #[test]
    fn entry_serializes_status_tag() {
        let entry = ExpertAnalysisEntry::failed("a", "A", "boom");
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({ "expert_slug": "a", "expert_name": "A", "status": "error", "error": "boom" })
        );
        let pending = ExpertAnalysisEntry::pending("b", "B");
        assert_eq!(serde_json::to_value(&pending).unwrap()["status"], "pending");
    }

    #[test]
    fn replace_is_keyed_by_slug_and_keeps_order() {
        let mut result = MultiExpertResult::new(vec![
            ExpertAnalysisEntry::pending("a", "A"),
            ExpertAnalysisEntry::pending("b", "B"),
        ]);
        assert!(result.replace(ExpertAnalysisEntry::failed("b", "B", "x")));
        assert!(!result.replace(ExpertAnalysisEntry::loading("c", "C")));
        let slugs: Vec<_> = result.entries().iter().map(|e| e.expert_slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "b"]);
        assert_eq!(result.get("b").unwrap().error(), Some("x"));
        assert!(!result.is_finished());
    }
}
