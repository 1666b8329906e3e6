use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::{
    error::Result,
    models::{ExpertAnalysisEntry, MultiExpertResult, SupportedModel},
};

/// Finished analysis of one startup, kept so single experts can be retried later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub startup_id: String,
    /// Full record the experts were given; reused verbatim on retry.
    pub startup_data: Value,
    pub model: SupportedModel,
    pub result: MultiExpertResult,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRun {
    pub fn new(startup_id: String, startup_data: Value, model: SupportedModel, result: MultiExpertResult) -> Self {
        Self {
            startup_id,
            startup_data,
            model,
            result,
            updated_at: Utc::now(),
        }
    }
}

/// Trait for storing and retrieving analysis runs, keyed by startup id
#[async_trait]
pub trait RunStorage: Send + Sync {
    async fn save(&self, run: AnalysisRun) -> Result<()>;
    async fn get(&self, startup_id: &str) -> Result<Option<AnalysisRun>>;
    /// Swap one entry of the stored run in place. Returns `false` when the run is gone
    /// or no longer holds that expert.
    async fn replace_entry(&self, startup_id: &str, entry: ExpertAnalysisEntry) -> Result<bool>;
    /// Returns `false` when there was no run to delete.
    async fn delete(&self, startup_id: &str) -> Result<bool>;
}

/// In-memory implementation of RunStorage
#[derive(Default)]
pub struct InMemoryRunStorage {
    runs: Arc<DashMap<String, AnalysisRun>>,
}

impl InMemoryRunStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStorage for InMemoryRunStorage {
    async fn save(&self, run: AnalysisRun) -> Result<()> {
        self.runs.insert(run.startup_id.clone(), run);
        Ok(())
    }

    async fn get(&self, startup_id: &str) -> Result<Option<AnalysisRun>> {
        Ok(self.runs.get(startup_id).map(|entry| entry.clone()))
    }

    async fn replace_entry(&self, startup_id: &str, entry: ExpertAnalysisEntry) -> Result<bool> {
        let Some(mut run) = self.runs.get_mut(startup_id) else {
            return Ok(false);
        };
        let replaced = run.result.replace(entry);
        if replaced {
            run.updated_at = Utc::now();
        }
        Ok(replaced)
    }

    async fn delete(&self, startup_id: &str) -> Result<bool> {
        Ok(self.runs.remove(startup_id).is_some())
    }
}
