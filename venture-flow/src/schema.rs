//! Canonical analysis shape every model call must produce, and the validator that
//! checks untrusted model output against it.
//!
//! Validation walks the raw [`serde_json::Value`] instead of relying on serde's
//! first-error-wins behaviour, so a caller gets one [`ValidationError`] per bad field.
//! Nothing is coerced: a missing field is an error, never a default.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvestDecision {
    Invest,
    Pass,
}

impl InvestDecision {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "INVEST" => Some(Self::Invest),
            "PASS" => Some(Self::Pass),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BestStrategy {
    Conservative,
    Growth,
    Balanced,
    /// Do not invest under any strategy. Allowed to contradict strategy-level decisions.
    None,
}

impl BestStrategy {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "conservative" => Some(Self::Conservative),
            "growth" => Some(Self::Growth),
            "balanced" => Some(Self::Balanced),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: InvestDecision,
    pub investment_percentage: u8,
    pub reasoning: String,
    pub confidence_score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedAnalysis {
    pub milestone_execution: String,
    pub scoring_dynamics: String,
    pub team_competency: String,
    pub market_potential: String,
    pub risk_factors: String,
}

/// Percentages are allocations of the available round per strategy; they do not sum to 100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySet {
    pub conservative: Decision,
    pub growth: Decision,
    pub balanced: Decision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub best_strategy: BestStrategy,
    pub reasoning: String,
    pub overall_confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub unified_analysis: UnifiedAnalysis,
    pub strategies: StrategySet,
    pub recommendation: Recommendation,
}

/// One entry of a batched multi-expert response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertAnalysis {
    pub expert_slug: String,
    pub expert_name: String,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<Value>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, received: Option<Value>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            received,
        }
    }
}

/// Validate a single-expert analysis.
pub fn validate(candidate: &Value) -> Result<AnalysisResult, Vec<ValidationError>> {
    let mut v = Validator::default();
    let result = v.analysis(candidate, "");
    v.finish(result)
}

/// Validate a batched response of the form `{"expert_analyses": [...]}`.
pub fn validate_batch(candidate: &Value) -> Result<Vec<ExpertAnalysis>, Vec<ValidationError>> {
    let mut v = Validator::default();
    let result: Option<Vec<ExpertAnalysis>> = v.object(candidate, "").and_then(|obj| {
        let list = v.field(obj, "", "expert_analyses")?;
        let Some(items) = list.as_array() else {
            v.push("expert_analyses", "expected array", Some(list));
            return None;
        };
        let entries: Vec<Option<ExpertAnalysis>> = items
            .iter()
            .enumerate()
            .map(|(i, item)| v.expert_analysis(item, &format!("expert_analyses[{i}]")))
            .collect();
        entries.into_iter().collect()
    });
    v.finish(result)
}

#[derive(Default)]
struct Validator {
    errors: Vec<ValidationError>,
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

impl Validator {
    fn finish<T>(self, result: Option<T>) -> Result<T, Vec<ValidationError>> {
        match result {
            Some(value) if self.errors.is_empty() => Ok(value),
            _ => Err(self.errors),
        }
    }

    fn push(&mut self, field: &str, message: &str, received: Option<&Value>) {
        let field = if field.is_empty() { "(root)" } else { field };
        self.errors
            .push(ValidationError::new(field, message, received.cloned()));
    }

    fn object<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Map<String, Value>> {
        let obj = value.as_object();
        if obj.is_none() {
            self.push(path, "expected object", Some(value));
        }
        obj
    }

    fn field<'a>(&mut self, obj: &'a Map<String, Value>, prefix: &str, key: &str) -> Option<&'a Value> {
        let value = obj.get(key).filter(|v| !v.is_null());
        if value.is_none() {
            self.push(&join(prefix, key), "required", None);
        }
        value
    }

    fn text(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str) -> Option<String> {
        let value = self.field(obj, prefix, key)?;
        let path = join(prefix, key);
        match value.as_str() {
            Some(s) if !s.trim().is_empty() => Some(s.to_string()),
            Some(_) => {
                self.push(&path, "must not be empty", Some(value));
                None
            }
            None => {
                self.push(&path, "expected string", Some(value));
                None
            }
        }
    }

    fn percent(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str) -> Option<u8> {
        let value = self.field(obj, prefix, key)?;
        let path = join(prefix, key);
        let Some(number) = value.as_f64() else {
            self.push(&path, "expected number", Some(value));
            return None;
        };
        if number.fract() != 0.0 {
            self.push(&path, "expected integer", Some(value));
            return None;
        }
        if !(0.0..=100.0).contains(&number) {
            self.push(&path, "must be between 0 and 100", Some(value));
            return None;
        }
        Some(number as u8)
    }

    fn enumeration<T>(
        &mut self,
        obj: &Map<String, Value>,
        prefix: &str,
        key: &str,
        allowed: &str,
        parse: fn(&str) -> Option<T>,
    ) -> Option<T> {
        let value = self.field(obj, prefix, key)?;
        let parsed = value.as_str().and_then(parse);
        if parsed.is_none() {
            self.push(&join(prefix, key), &format!("expected one of {allowed}"), Some(value));
        }
        parsed
    }

    fn decision(&mut self, value: &Value, path: &str) -> Option<Decision> {
        let obj = self.object(value, path)?;
        let decision = self.enumeration(obj, path, "decision", "INVEST, PASS", InvestDecision::parse);
        let investment_percentage = self.percent(obj, path, "investment_percentage");
        let reasoning = self.text(obj, path, "reasoning");
        let confidence_score = self.percent(obj, path, "confidence_score");
        Some(Decision {
            decision: decision?,
            investment_percentage: investment_percentage?,
            reasoning: reasoning?,
            confidence_score: confidence_score?,
        })
    }

    fn unified(&mut self, value: &Value, path: &str) -> Option<UnifiedAnalysis> {
        let obj = self.object(value, path)?;
        let milestone_execution = self.text(obj, path, "milestone_execution");
        let scoring_dynamics = self.text(obj, path, "scoring_dynamics");
        let team_competency = self.text(obj, path, "team_competency");
        let market_potential = self.text(obj, path, "market_potential");
        let risk_factors = self.text(obj, path, "risk_factors");
        Some(UnifiedAnalysis {
            milestone_execution: milestone_execution?,
            scoring_dynamics: scoring_dynamics?,
            team_competency: team_competency?,
            market_potential: market_potential?,
            risk_factors: risk_factors?,
        })
    }

    fn strategies(&mut self, value: &Value, path: &str) -> Option<StrategySet> {
        let obj = self.object(value, path)?;
        let strategy = |v: &mut Self, key: &str| {
            v.field(obj, path, key)
                .and_then(|value| v.decision(value, &join(path, key)))
        };
        let conservative = strategy(self, "conservative");
        let growth = strategy(self, "growth");
        let balanced = strategy(self, "balanced");
        Some(StrategySet {
            conservative: conservative?,
            growth: growth?,
            balanced: balanced?,
        })
    }

    fn recommendation(&mut self, value: &Value, path: &str) -> Option<Recommendation> {
        let obj = self.object(value, path)?;
        let best_strategy = self.enumeration(
            obj,
            path,
            "best_strategy",
            "conservative, growth, balanced, none",
            BestStrategy::parse,
        );
        let reasoning = self.text(obj, path, "reasoning");
        let overall_confidence = self.percent(obj, path, "overall_confidence");
        Some(Recommendation {
            best_strategy: best_strategy?,
            reasoning: reasoning?,
            overall_confidence: overall_confidence?,
        })
    }

    fn analysis(&mut self, value: &Value, path: &str) -> Option<AnalysisResult> {
        let obj = self.object(value, path)?;
        let unified = self
            .field(obj, path, "unified_analysis")
            .and_then(|v| self.unified(v, &join(path, "unified_analysis")));
        let strategies = self
            .field(obj, path, "strategies")
            .and_then(|v| self.strategies(v, &join(path, "strategies")));
        let recommendation = self
            .field(obj, path, "recommendation")
            .and_then(|v| self.recommendation(v, &join(path, "recommendation")));
        Some(AnalysisResult {
            unified_analysis: unified?,
            strategies: strategies?,
            recommendation: recommendation?,
        })
    }

    fn expert_analysis(&mut self, value: &Value, path: &str) -> Option<ExpertAnalysis> {
        let obj = self.object(value, path)?;
        let expert_slug = self.text(obj, path, "expert_slug");
        let expert_name = self.text(obj, path, "expert_name");
        let analysis = self
            .field(obj, path, "analysis")
            .and_then(|v| self.analysis(v, &join(path, "analysis")));
        Some(ExpertAnalysis {
            expert_slug: expert_slug?,
            expert_name: expert_name?,
            analysis: analysis?,
        })
    }
}
