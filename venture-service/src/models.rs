use serde::{Deserialize, Serialize};
use venture_flow::{ExpertAnalysisEntry, ProviderKind, SupportedModel};

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Raw model id; parsed in the handler so an unknown id maps to 400.
    #[serde(default)]
    pub selected_model: Option<String>,
    #[serde(default)]
    pub selected_experts: Vec<String>,
    /// Startups to analyse; every startup the data source lists when absent.
    #[serde(default)]
    pub startup_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    #[serde(default)]
    pub selected_model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
}

impl From<SupportedModel> for ModelInfo {
    fn from(model: SupportedModel) -> Self {
        Self {
            id: model.as_str(),
            name: model.display_name(),
            provider: match ProviderKind::for_model(model) {
                ProviderKind::Direct => "direct",
                ProviderKind::Gateway => "gateway",
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupStatus {
    Completed,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct StartupAnalysis {
    pub startup_id: String,
    pub status: StartupStatus,
    pub entries: Vec<ExpertAnalysisEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub model: SupportedModel,
    pub results: Vec<StartupAnalysis>,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub startup_id: String,
    pub entry: ExpertAnalysisEntry,
}
