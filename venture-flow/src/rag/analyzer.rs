use serde_json::Value;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info};

use super::{Embedder, RetrievedContext, VectorIndex};
use crate::error::RagError;
use crate::experts::RagConfig;

/// Passages retrieved for one expert and one startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RagContext {
    /// Kept passages, highest score first, within the token budget.
    pub context: Vec<RetrievedContext>,
    pub total_tokens: usize,
    /// Hits returned by the index before budgeting.
    pub search_results_count: usize,
    pub processing_time_ms: u64,
    pub score_threshold: f32,
}

impl RagContext {
    /// True when at least one kept passage cleared the score threshold.
    pub fn is_context_relevant(&self) -> bool {
        self.context.iter().any(|c| c.score >= self.score_threshold)
    }

    /// Prompt block listing passages in score order.
    pub fn render(&self) -> String {
        self.context
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] (relevance {:.2})\n{}", i + 1, c.score, c.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Rough token estimate: four characters per token, rounded up.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Startup fields folded into the retrieval query, looked up on the record and on a nested `project`.
const QUERY_FIELDS: [(&str, &str); 5] = [
    ("name", "Startup"),
    ("description", "Description"),
    ("industry", "Industry"),
    ("stage", "Stage"),
    ("status", "Status"),
];

fn lookup<'a>(startup: &'a Value, key: &str) -> Option<&'a Value> {
    startup
        .get(key)
        .or_else(|| startup.get("project").and_then(|p| p.get(key)))
        .filter(|v| !v.is_null())
}

pub(crate) fn build_query(startup: &Value) -> String {
    let mut parts: Vec<String> = QUERY_FIELDS
        .iter()
        .filter_map(|(key, label)| {
            let text = lookup(startup, key)?.as_str()?.trim();
            (!text.is_empty()).then(|| format!("{label}: {text}"))
        })
        .collect();

    if let Some(team) = lookup(startup, "team").and_then(team_summary) {
        parts.push(format!("Team: {team}"));
    }

    if parts.is_empty() {
        // Nothing recognisable; fall back to the whole record.
        startup.to_string()
    } else {
        parts.join(". ")
    }
}

fn team_summary(team: &Value) -> Option<String> {
    let members = match team {
        Value::Array(members) => members,
        Value::String(s) if !s.trim().is_empty() => return Some(s.trim().to_string()),
        _ => return None,
    };
    let described: Vec<String> = members
        .iter()
        .filter_map(|m| {
            let name = m.get("name").and_then(Value::as_str);
            let role = m.get("role").and_then(Value::as_str);
            match (name, role) {
                (Some(n), Some(r)) => Some(format!("{n} ({r})")),
                (Some(n), None) => Some(n.to_string()),
                (None, Some(r)) => Some(r.to_string()),
                (None, None) => None,
            }
        })
        .collect();
    (!described.is_empty()).then(|| described.join(", "))
}

#[derive(Clone)]
pub struct RagAnalyzer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl RagAnalyzer {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub async fn retrieve_context(&self, startup: &Value, config: &RagConfig) -> Result<RagContext, RagError> {
        let started = Instant::now();
        let query = build_query(startup);
        debug!(query_chars = query.len(), top_k = config.top_k, "Retrieving RAG context");

        let embedding = self.embedder.embed(&query).await?;
        let mut hits = self
            .index
            .search(&embedding.vector, config.top_k, config.score_threshold)
            .await?;
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        let search_results_count = hits.len();

        let mut context = Vec::with_capacity(hits.len());
        let mut total_tokens = 0;
        for hit in hits {
            let tokens = estimate_tokens(&hit.content);
            if total_tokens + tokens > config.max_context_length {
                break;
            }
            total_tokens += tokens;
            context.push(hit);
        }

        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            search_results = search_results_count,
            kept = context.len(),
            total_tokens,
            processing_time_ms,
            "RAG context retrieved"
        );

        Ok(RagContext {
            context,
            total_tokens,
            search_results_count,
            processing_time_ms,
            score_threshold: config.score_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedIndex, StubEmbedder};
    use serde_json::json;

    fn config(max_context_length: usize) -> RagConfig {
        RagConfig {
            top_k: 5,
            score_threshold: 0.3,
            max_context_length,
        }
    }

    fn hit(content: &str, score: f32) -> RetrievedContext {
        RetrievedContext {
            content: content.to_string(),
            score,
            source_id: content.to_string(),
        }
    }

    fn analyzer(index: FixedIndex) -> RagAnalyzer {
        RagAnalyzer::new(Arc::new(StubEmbedder::default()), Arc::new(index))
    }

    #[tokio::test]
    async fn single_hit_above_threshold_is_relevant() {
        let rag = analyzer(FixedIndex::new(vec![hit("Peacetime versus wartime CEO", 0.5)]));
        let ctx = rag
            .retrieve_context(&json!({"name": "Acme", "description": "B2B SaaS"}), &config(4000))
            .await
            .unwrap();

        assert_eq!(ctx.context.len(), 1);
        assert_eq!(ctx.search_results_count, 1);
        assert!(ctx.is_context_relevant());
        assert!(ctx.render().contains("Peacetime versus wartime CEO"));
    }

    #[tokio::test]
    async fn all_hits_below_threshold_yield_empty_irrelevant_context() {
        let rag = analyzer(FixedIndex::new(vec![hit("weak", 0.1), hit("weaker", 0.05)]));
        let ctx = rag
            .retrieve_context(&json!({"name": "Acme"}), &config(4000))
            .await
            .unwrap();

        assert!(ctx.context.is_empty());
        assert!(!ctx.is_context_relevant());
        assert_eq!(ctx.total_tokens, 0);
    }

    #[tokio::test]
    async fn budget_drops_lowest_scored_passages_first() {
        let long = "x".repeat(40);
        let rag = analyzer(FixedIndex::new(vec![
            hit(&long, 0.4),
            hit(&"y".repeat(40), 0.9),
            hit(&"z".repeat(40), 0.6),
        ]));
        // Each passage is 10 tokens; only two fit.
        let ctx = rag
            .retrieve_context(&json!({"name": "Acme"}), &config(25))
            .await
            .unwrap();

        let scores: Vec<f32> = ctx.context.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.6]);
        assert_eq!(ctx.total_tokens, 20);
        assert_eq!(ctx.search_results_count, 3);
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let rag = RagAnalyzer::new(
            Arc::new(StubEmbedder::failing("quota")),
            Arc::new(FixedIndex::new(vec![])),
        );
        let err = rag
            .retrieve_context(&json!({"name": "Acme"}), &config(4000))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[test]
    fn query_uses_nested_project_and_team() {
        let query = build_query(&json!({
            "project": { "name": "Acme", "description": "B2B SaaS", "stage": "MVP" },
            "team": [{ "name": "Ann", "role": "CEO" }, { "name": "Bo" }]
        }));
        assert_eq!(
            query,
            "Startup: Acme. Description: B2B SaaS. Stage: MVP. Team: Ann (CEO), Bo"
        );
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
