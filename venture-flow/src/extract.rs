use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*\})\s*```").expect("fenced JSON pattern is valid")
});

#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("Invalid JSON in response: {0}")]
    InvalidJson(String),
    #[error("No valid JSON found in response: {0}")]
    NotFound(String),
}

/// Pull a JSON value out of raw model text.
///
/// Tried in order, first success wins: the whole text, the interior of a ``` fence
/// (optionally tagged `json`), then the span from the first `{` to the last `}`.
pub fn extract(raw: &str) -> Result<Value, ExtractionError> {
    let text = raw.trim();
    let whole_err = match serde_json::from_str::<Value>(text) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    if let Some(inner) = FENCED_JSON.captures(text).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.as_str()) {
            return Ok(value);
        }
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => serde_json::from_str::<Value>(&text[start..=end])
            .map_err(|_| ExtractionError::InvalidJson(whole_err)),
        _ => Err(ExtractionError::NotFound(whole_err)),
    }
}
