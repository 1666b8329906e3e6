use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

const EXPERTS_JSON: &str = include_str!("../data/investment_experts.json");

/// Retrieval parameters for an expert backed by a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagConfig {
    pub top_k: usize,
    pub score_threshold: f32,
    /// Token budget for the assembled context block.
    pub max_context_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expert {
    pub slug: String,
    pub name: String,
    pub fund: String,
    pub methodology: String,
    pub expertise: String,
    #[serde(default)]
    pub focus: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default)]
    pub is_rag_expert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_config: Option<RagConfig>,
}

impl Expert {
    /// Retrieval settings when this expert is routed through RAG.
    pub fn rag(&self) -> Option<&RagConfig> {
        if self.is_rag_expert {
            self.rag_config.as_ref()
        } else {
            None
        }
    }
}

/// Read-only expert catalogue, loaded once.
#[derive(Debug, Clone)]
pub struct ExpertRegistry {
    experts: Vec<Expert>,
}

impl ExpertRegistry {
    /// Catalogue bundled with the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_json(EXPERTS_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let experts: Vec<Expert> = serde_json::from_str(json)
            .map_err(|e| AnalysisError::Configuration(format!("invalid expert catalogue: {e}")))?;
        Self::new(experts)
    }

    pub fn new(experts: Vec<Expert>) -> Result<Self> {
        for (i, expert) in experts.iter().enumerate() {
            if experts[..i].iter().any(|e| e.slug == expert.slug) {
                return Err(AnalysisError::Configuration(format!(
                    "duplicate expert slug \"{}\"",
                    expert.slug
                )));
            }
            if expert.is_rag_expert && expert.rag_config.is_none() {
                return Err(AnalysisError::Configuration(format!(
                    "RAG expert \"{}\" has no ragConfig",
                    expert.slug
                )));
            }
        }
        Ok(Self { experts })
    }

    pub fn list(&self) -> &[Expert] {
        &self.experts
    }

    pub fn get(&self, slug: &str) -> Option<&Expert> {
        self.experts.iter().find(|e| e.slug == slug)
    }

    /// Resolve a selection in order, dropping repeated slugs.
    ///
    /// Fails on an empty selection or on any slug missing from the catalogue.
    pub fn resolve(&self, slugs: &[String]) -> Result<Vec<Expert>> {
        if slugs.is_empty() {
            return Err(AnalysisError::EmptySelection);
        }
        let mut selected: Vec<Expert> = Vec::with_capacity(slugs.len());
        for slug in slugs {
            let expert = self
                .get(slug)
                .ok_or_else(|| AnalysisError::UnknownExpert(slug.clone()))?;
            if !selected.iter().any(|e| e.slug == expert.slug) {
                selected.push(expert.clone());
            }
        }
        Ok(selected)
    }
}
