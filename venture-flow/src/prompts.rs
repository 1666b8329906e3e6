//! Prompt templates and `{{VAR}}` substitution.
//!
//! Substitution is literal: values are inserted verbatim, so structured data must be
//! serialized (pretty-printed JSON) by the caller first.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::models::SupportedModel;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Z_]+)\}\}").expect("placeholder pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    /// One expert, no retrieved context.
    SingleExpert,
    /// Several experts answered in one call as `{"expert_analyses": [...]}`.
    MultiExpert,
    /// One expert with a retrieved-context block ahead of the project data.
    RagExpert,
}

const ANALYSIS_GUIDE: &str = r#"UNIFIED ANALYSIS:
1. Milestone execution: completion rate, timeline adherence, delivery quality.
2. Scoring dynamics: current metrics, trends, benchmarks, stability.
3. Team competency: skills against stage, founder track record, role coverage.
4. Market potential: size, growth, competition, timing, scalability.
5. Risk factors: technical, market, execution, regulatory and financial risks.

INVESTMENT STRATEGIES (each decided independently; percentages are shares of the available round allocation, they do not need to sum to 100):
- CONSERVATIVE: minimise risk, prototype stage or later, >75% milestone completion, 20-50% allocation or 0% when criteria are not met.
- GROWTH: maximise return, any stage, accepts misses when team and market are strong, 80-100% allocation or 0% on fundamental flaws.
- BALANCED: optimise risk/return, prototype/MVP stage or later, >60% milestone completion, 40-70% allocation or 0% when risk outweighs potential.

For every strategy give decision ("INVEST" or "PASS"), investment_percentage (integer 0-100), reasoning (1-2 sentences) and confidence_score (integer 0-100).

FINAL RECOMMENDATION:
Pick "conservative", "growth", "balanced" or "none". You are not obliged to recommend investing; "none" is valid even if some strategies say INVEST. Give reasoning and overall_confidence (integer 0-100)."#;

const ANALYSIS_SHAPE: &str = r#"{
  "unified_analysis": {
    "milestone_execution": "...",
    "scoring_dynamics": "...",
    "team_competency": "...",
    "market_potential": "...",
    "risk_factors": "..."
  },
  "strategies": {
    "conservative": { "decision": "INVEST or PASS", "investment_percentage": 0, "reasoning": "...", "confidence_score": 0 },
    "growth": { "decision": "INVEST or PASS", "investment_percentage": 0, "reasoning": "...", "confidence_score": 0 },
    "balanced": { "decision": "INVEST or PASS", "investment_percentage": 0, "reasoning": "...", "confidence_score": 0 }
  },
  "recommendation": {
    "best_strategy": "conservative, growth, balanced or none",
    "reasoning": "...",
    "overall_confidence": 0
  }
}"#;

const STRICT_JSON_RULES: &str = r#"

STRICT OUTPUT RULES:
- Output exactly one JSON object and nothing else: no markdown fences, no commentary, no reasoning traces.
- Use double quotes for every key and string value.
- Every text field must be a non-empty string.
- Numbers must be plain integers between 0 and 100, never strings or ranges.
- "decision" must be exactly "INVEST" or "PASS".
- "best_strategy" must be exactly "conservative", "growth", "balanced" or "none".
- Do not omit any field and do not add fields."#;

/// Models that empirically drift from the requested JSON format.
pub const DEFAULT_STRICT_MODELS: &[SupportedModel] = &[
    SupportedModel::GeminiFlash,
    SupportedModel::Minimax01,
    SupportedModel::MistralSmall32,
    SupportedModel::DeepseekR1,
    SupportedModel::Phi4ReasoningPlus,
    SupportedModel::Qwen3A3b,
    SupportedModel::MaiDsR1,
];

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    templates: HashMap<TemplateKey, String>,
    strict_models: Vec<SupportedModel>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert(TemplateKey::SingleExpert, single_expert_template());
        templates.insert(TemplateKey::MultiExpert, multi_expert_template());
        templates.insert(TemplateKey::RagExpert, rag_expert_template());
        Self {
            templates,
            strict_models: DEFAULT_STRICT_MODELS.to_vec(),
        }
    }

    pub fn with_strict_models(mut self, models: impl IntoIterator<Item = SupportedModel>) -> Self {
        self.strict_models = models.into_iter().collect();
        self
    }

    /// Replace every `{{KEY}}` with its value in one pass over the template, so
    /// placeholders inside inserted values stay as they are. Unknown placeholders are
    /// left as-is.
    pub fn build(&self, key: TemplateKey, variables: &HashMap<&str, String>) -> String {
        PLACEHOLDER
            .replace_all(&self.templates[&key], |caps: &Captures| {
                variables
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Append explicit formatting rules for models prone to malformed output.
    pub fn reinforce_for_model(&self, prompt: &str, model: SupportedModel) -> String {
        if self.strict_models.contains(&model) {
            format!("{prompt}{STRICT_JSON_RULES}")
        } else {
            prompt.to_string()
        }
    }
}

fn single_expert_template() -> String {
    format!(
        r#"You are {{{{EXPERT_NAME}}}} of {{{{EXPERT_FUND}}}}, evaluating a startup for investment.

YOUR METHODOLOGY:
{{{{EXPERT_METHODOLOGY}}}}

YOUR EXPERTISE AND FOCUS:
{{{{EXPERT_EXPERTISE}}}}

PROJECT DATA TO ANALYZE:
{{{{PROJECT_DATA}}}}

Analyze this project through your own methodology.

{ANALYSIS_GUIDE}

RESPONSE FORMAT:
Respond ONLY with valid JSON of exactly this shape:
{ANALYSIS_SHAPE}"#
    )
}

fn multi_expert_template() -> String {
    format!(
        r#"You are simulating a panel of venture investors. Each expert below analyzes the same startup independently, strictly through their own methodology.

EXPERTS:
{{{{EXPERTS}}}}

PROJECT DATA TO ANALYZE:
{{{{PROJECT_DATA}}}}

For EACH expert, in the order listed:

{ANALYSIS_GUIDE}

RESPONSE FORMAT:
Respond ONLY with valid JSON of this shape, one entry per expert, using each expert's exact slug:
{{
  "expert_analyses": [
    {{
      "expert_slug": "slug from the list above",
      "expert_name": "name from the list above",
      "analysis": {ANALYSIS_SHAPE}
    }}
  ]
}}"#
    )
}

fn rag_expert_template() -> String {
    format!(
        r#"You are {{{{EXPERT_NAME}}}} of {{{{EXPERT_FUND}}}}, evaluating a startup for investment.

YOUR METHODOLOGY:
{{{{EXPERT_METHODOLOGY}}}}

YOUR EXPERTISE AND FOCUS:
{{{{EXPERT_EXPERTISE}}}}

RELEVANT PASSAGES FROM YOUR OWN WRITING AND TALKS:
{{{{RAG_CONTEXT}}}}

Ground your judgement in these passages where they apply; quote or paraphrase your own principles in the reasoning fields.

PROJECT DATA TO ANALYZE:
{{{{PROJECT_DATA}}}}

{ANALYSIS_GUIDE}

RESPONSE FORMAT:
Respond ONLY with valid JSON of exactly this shape:
{ANALYSIS_SHAPE}"#
    )
}
