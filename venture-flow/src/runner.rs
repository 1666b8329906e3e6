//! Entry points used by the service layer.
//!
//! [`AnalysisRunner`] loads startup data, runs the orchestrator for each startup and
//! persists the finished run so that a single expert can later be retried in place:
//!
//! ```rust,no_run
//! # use venture_flow::{AnalysisRunner, AnalysisUpdate, SupportedModel};
//! # async fn demo(runner: AnalysisRunner) -> venture_flow::Result<()> {
//! let mut handle = runner
//!     .analyze(vec!["12".into()], SupportedModel::GeminiFlash, vec!["junior-manager".into()])
//!     .await?;
//! while let Some(update) = handle.recv().await {
//!     if let AnalysisUpdate::Entry { startup_id, entry } = update {
//!         println!("{startup_id}: {} -> {:?}", entry.expert_slug, entry.state);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::{
    error::{AnalysisError, Result},
    experts::Expert,
    models::{AnalysisRequest, ExpertAnalysisEntry, MultiExpertResult, SupportedModel},
    orchestrator::Orchestrator,
    rag::CollectionHealth,
    source::{StartupSource, StartupSummary},
    storage::{AnalysisRun, RunStorage},
};

const UPDATE_BUFFER: usize = 64;

/// Progress event for a multi-startup analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisUpdate {
    Entry {
        startup_id: String,
        entry: ExpertAnalysisEntry,
    },
    /// The startup could not be analysed at all (e.g. its data could not be fetched).
    StartupFailed { startup_id: String, error: String },
    /// Final entries of this run, in selection order.
    RunFinished {
        startup_id: String,
        result: MultiExpertResult,
    },
}

/// Receiving side of a running analysis. Dropping it abandons the updates, not the work.
pub struct RunHandle {
    updates: mpsc::Receiver<AnalysisUpdate>,
}

impl RunHandle {
    pub async fn recv(&mut self) -> Option<AnalysisUpdate> {
        self.updates.recv().await
    }

    /// Wait for the run to end and return every update in arrival order.
    pub async fn collect(mut self) -> Vec<AnalysisUpdate> {
        let mut all = Vec::new();
        while let Some(update) = self.updates.recv().await {
            all.push(update);
        }
        all
    }
}

#[derive(Clone)]
pub struct AnalysisRunner {
    orchestrator: Orchestrator,
    source: Arc<dyn StartupSource>,
    storage: Arc<dyn RunStorage>,
}

impl AnalysisRunner {
    pub fn new(orchestrator: Orchestrator, source: Arc<dyn StartupSource>, storage: Arc<dyn RunStorage>) -> Self {
        Self {
            orchestrator,
            source,
            storage,
        }
    }

    pub fn list_experts(&self) -> &[Expert] {
        self.orchestrator.experts().list()
    }

    pub async fn list_startups(&self) -> Result<Vec<StartupSummary>> {
        Ok(self.source.list_startups().await?)
    }

    pub async fn run(&self, startup_id: &str) -> Result<Option<AnalysisRun>> {
        self.storage.get(startup_id).await
    }

    /// Forget the stored run of a startup. Returns `false` when there was none.
    pub async fn delete_run(&self, startup_id: &str) -> Result<bool> {
        self.storage.delete(startup_id).await
    }

    /// Vector collection status, or `None` when retrieval is not configured.
    pub async fn rag_health(&self) -> Result<Option<CollectionHealth>> {
        match self.orchestrator.rag() {
            Some(rag) => Ok(Some(rag.index().collection_health().await?)),
            None => Ok(None),
        }
    }

    /// Analyse each startup in order with the selected experts.
    ///
    /// The selection is validated before anything is fetched or generated; after that,
    /// failures are reported per startup or per expert through the returned handle.
    pub async fn analyze(
        &self,
        startup_ids: Vec<String>,
        model: SupportedModel,
        expert_slugs: Vec<String>,
    ) -> Result<RunHandle> {
        self.orchestrator.experts().resolve(&expert_slugs)?;

        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        let runner = self.clone();
        tokio::spawn(async move {
            for startup_id in startup_ids {
                runner
                    .analyze_startup(&startup_id, model, &expert_slugs, &tx)
                    .await;
            }
        });

        Ok(RunHandle { updates: rx })
    }

    #[instrument(skip(self, model, expert_slugs, updates), fields(model = %model))]
    async fn analyze_startup(
        &self,
        startup_id: &str,
        model: SupportedModel,
        expert_slugs: &[String],
        updates: &mpsc::Sender<AnalysisUpdate>,
    ) {
        let outcome = self.analyze_and_save(startup_id, model, expert_slugs, updates).await;
        let update = match outcome {
            Ok(result) => AnalysisUpdate::RunFinished {
                startup_id: startup_id.to_string(),
                result,
            },
            Err(e) => {
                error!(error = %e, "Startup analysis failed");
                AnalysisUpdate::StartupFailed {
                    startup_id: startup_id.to_string(),
                    error: e.to_string(),
                }
            }
        };
        if updates.send(update).await.is_err() {
            warn!("Update receiver closed");
        }
    }

    async fn analyze_and_save(
        &self,
        startup_id: &str,
        model: SupportedModel,
        expert_slugs: &[String],
        updates: &mpsc::Sender<AnalysisUpdate>,
    ) -> Result<MultiExpertResult> {
        // 1. Load startup data
        let startup_data = self.source.fetch_full(startup_id).await?;
        let request = AnalysisRequest {
            startup_data,
            expert_slugs: expert_slugs.to_vec(),
            selected_model: model,
        };

        // 2. Run every expert, forwarding entry changes as they happen
        let (entry_tx, mut entry_rx) = mpsc::channel(UPDATE_BUFFER);
        let run = async {
            let result = self.orchestrator.run(&request, &entry_tx).await;
            drop(entry_tx);
            result
        };
        let forward = async {
            while let Some(entry) = entry_rx.recv().await {
                let update = AnalysisUpdate::Entry {
                    startup_id: startup_id.to_string(),
                    entry,
                };
                // Keep draining so the orchestrator never blocks on a departed caller.
                let _ = updates.send(update).await;
            }
        };
        let (result, ()) = tokio::join!(run, forward);
        let result = result?;

        // 3. Persist so single experts can be retried later
        let completed = result.entries().iter().filter(|e| e.analysis().is_some()).count();
        info!(completed, total = result.len(), "Saving analysis run");
        self.storage
            .save(AnalysisRun::new(
                startup_id.to_string(),
                request.startup_data,
                model,
                result.clone(),
            ))
            .await?;
        Ok(result)
    }

    /// Re-run one expert of a stored run; every other entry stays as it was.
    #[instrument(skip(self, model), fields(model = %model))]
    pub async fn retry_expert(
        &self,
        startup_id: &str,
        expert_slug: &str,
        model: SupportedModel,
    ) -> Result<ExpertAnalysisEntry> {
        // 1. Load run
        let run = self
            .storage
            .get(startup_id)
            .await?
            .ok_or_else(|| AnalysisError::RunNotFound(startup_id.to_string()))?;

        if run.result.get(expert_slug).is_none() {
            if self.orchestrator.experts().get(expert_slug).is_none() {
                return Err(AnalysisError::UnknownExpert(expert_slug.to_string()));
            }
            return Err(AnalysisError::ExpertNotInRun {
                startup_id: startup_id.to_string(),
                expert: expert_slug.to_string(),
            });
        }

        // 2. Re-run that expert alone
        let entry = self
            .orchestrator
            .retry_expert(&run.startup_data, expert_slug, model)
            .await?;

        // 3. Swap that entry in the run as stored now; other retries may have landed meanwhile
        if !self.storage.replace_entry(startup_id, entry.clone()).await? {
            warn!("Run changed during retry; entry not stored");
            return Err(AnalysisError::ExpertNotInRun {
                startup_id: startup_id.to_string(),
                expert: expert_slug.to_string(),
            });
        }

        info!(status = entry.state_name(), "Expert retry finished");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experts::ExpertRegistry;
    use crate::generator::AnalysisGenerator;
    use crate::prompts::PromptBuilder;
    use crate::providers::ProviderRegistry;
    use crate::rag::{RagAnalyzer, RetrievedContext};
    use crate::retry::RetryPolicy;
    use crate::schema::tests::sample_analysis;
    use crate::error::ProviderError;
    use crate::providers::{CompletionProvider, Generation};
    use crate::storage::InMemoryRunStorage;
    use crate::testing::{FakeSource, FixedIndex, ScriptedProvider, StubEmbedder, batch_response};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn runner(provider: Arc<ScriptedProvider>, storage: Arc<InMemoryRunStorage>) -> AnalysisRunner {
        let generator = AnalysisGenerator::new(
            ProviderRegistry::new()
                .with_direct(provider.clone())
                .with_gateway(provider),
            Arc::new(PromptBuilder::new()),
            RetryPolicy::new(0, Duration::ZERO),
        );
        let rag = RagAnalyzer::new(
            Arc::new(StubEmbedder::default()),
            Arc::new(FixedIndex::new(vec![RetrievedContext {
                content: "Wartime CEOs break protocol to win".into(),
                score: 0.7,
                source_id: "p-1".into(),
            }])),
        );
        let orchestrator =
            Orchestrator::new(Arc::new(ExpertRegistry::bundled().unwrap()), generator).with_rag(rag);
        let source = FakeSource::default().with("12", json!({ "name": "Acme", "description": "B2B SaaS" }));
        AnalysisRunner::new(orchestrator, Arc::new(source), storage)
    }

    /// Batch prompts always succeed; the first RAG prompt fails with a fatal status.
    fn flaky_rag_provider() -> Arc<ScriptedProvider> {
        let rag_calls = AtomicUsize::new(0);
        Arc::new(ScriptedProvider::new(move |prompt| {
            if prompt.contains("\"expert_analyses\"") {
                Ok(batch_response(&["junior-manager"]))
            } else if rag_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::status("Gemini", 400, "400 Bad Request"))
            } else {
                Ok(sample_analysis().to_string())
            }
        }))
    }

    fn slugs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn retry_replaces_only_the_failed_entry() {
        let storage = Arc::new(InMemoryRunStorage::new());
        let runner = runner(flaky_rag_provider(), storage.clone());

        let updates = runner
            .analyze(
                vec!["12".into()],
                SupportedModel::GeminiFlash,
                slugs(&["ben-horowitz-rag", "junior-manager"]),
            )
            .await
            .unwrap()
            .collect()
            .await;
        assert!(matches!(
            updates.last(),
            Some(AnalysisUpdate::RunFinished { startup_id, .. }) if startup_id == "12"
        ));

        let before = runner.run("12").await.unwrap().unwrap();
        assert!(before.result.get("ben-horowitz-rag").unwrap().error().is_some());
        let junior_before = before.result.get("junior-manager").unwrap().clone();
        assert!(junior_before.analysis().is_some());

        let entry = runner
            .retry_expert("12", "ben-horowitz-rag", SupportedModel::GeminiFlash)
            .await
            .unwrap();
        assert!(entry.analysis().is_some());

        let after = runner.run("12").await.unwrap().unwrap();
        assert_eq!(after.result.get("ben-horowitz-rag"), Some(&entry));
        assert_eq!(after.result.get("junior-manager"), Some(&junior_before));
        let order: Vec<_> = after.result.entries().iter().map(|e| e.expert_slug.as_str()).collect();
        assert_eq!(order, vec!["ben-horowitz-rag", "junior-manager"]);
    }

    #[tokio::test]
    async fn startups_are_processed_in_order_and_failures_reported() {
        let storage = Arc::new(InMemoryRunStorage::new());
        let runner = runner(flaky_rag_provider(), storage);

        let updates = runner
            .analyze(
                vec!["404".into(), "12".into()],
                SupportedModel::ClaudeSonnet4,
                slugs(&["junior-manager"]),
            )
            .await
            .unwrap()
            .collect()
            .await;

        assert!(matches!(
            &updates[0],
            AnalysisUpdate::StartupFailed { startup_id, error } if startup_id == "404" && error.contains("not found")
        ));
        let entries: Vec<_> = updates
            .iter()
            .filter_map(|u| match u {
                AnalysisUpdate::Entry { startup_id, entry } if startup_id == "12" => Some(entry.state_name()),
                _ => None,
            })
            .collect();
        assert_eq!(entries, vec!["loading", "completed"]);
        assert!(matches!(
            updates.last(),
            Some(AnalysisUpdate::RunFinished { startup_id, .. }) if startup_id == "12"
        ));
    }

    #[tokio::test]
    async fn invalid_selection_fails_before_spawning() {
        let runner = runner(flaky_rag_provider(), Arc::new(InMemoryRunStorage::new()));
        assert!(matches!(
            runner.analyze(vec!["12".into()], SupportedModel::GeminiFlash, vec![]).await,
            Err(AnalysisError::EmptySelection)
        ));
    }

    #[tokio::test]
    async fn retry_errors_distinguish_missing_run_and_expert() {
        let storage = Arc::new(InMemoryRunStorage::new());
        let runner = runner(flaky_rag_provider(), storage);
        assert!(matches!(
            runner.retry_expert("12", "junior-manager", SupportedModel::GeminiFlash).await,
            Err(AnalysisError::RunNotFound(_))
        ));

        runner
            .analyze(vec!["12".into()], SupportedModel::GeminiFlash, slugs(&["junior-manager"]))
            .await
            .unwrap()
            .collect()
            .await;

        assert!(matches!(
            runner.retry_expert("12", "senior-partner", SupportedModel::GeminiFlash).await,
            Err(AnalysisError::ExpertNotInRun { .. })
        ));
        assert!(matches!(
            runner.retry_expert("12", "nobody", SupportedModel::GeminiFlash).await,
            Err(AnalysisError::UnknownExpert(_))
        ));
    }

    /// Answers every prompt with a valid analysis after a short delay.
    struct SlowProvider;

    #[async_trait::async_trait]
    impl CompletionProvider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn generate(&self, _prompt: &str, model: SupportedModel) -> std::result::Result<Generation, ProviderError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Generation {
                text: sample_analysis().to_string(),
                model: model.as_str().to_string(),
            })
        }
    }

    #[tokio::test]
    async fn concurrent_retries_on_one_startup_both_persist() {
        let provider = Arc::new(SlowProvider);
        let generator = AnalysisGenerator::new(
            ProviderRegistry::new()
                .with_direct(provider.clone())
                .with_gateway(provider),
            Arc::new(PromptBuilder::new()),
            RetryPolicy::new(0, Duration::ZERO),
        );
        let orchestrator = Orchestrator::new(Arc::new(ExpertRegistry::bundled().unwrap()), generator);
        let storage = Arc::new(InMemoryRunStorage::new());
        storage
            .save(AnalysisRun::new(
                "12".into(),
                json!({ "name": "Acme" }),
                SupportedModel::GeminiFlash,
                MultiExpertResult::new(vec![
                    ExpertAnalysisEntry::failed("junior-manager", "Junior Manager", "boom"),
                    ExpertAnalysisEntry::failed("senior-partner", "Senior Partner", "boom"),
                ]),
            ))
            .await
            .unwrap();
        let runner = AnalysisRunner::new(orchestrator, Arc::new(FakeSource::default()), storage.clone());

        let (junior, senior) = tokio::join!(
            runner.retry_expert("12", "junior-manager", SupportedModel::GeminiFlash),
            runner.retry_expert("12", "senior-partner", SupportedModel::GeminiFlash),
        );
        assert!(junior.unwrap().analysis().is_some());
        assert!(senior.unwrap().analysis().is_some());

        let stored = storage.get("12").await.unwrap().unwrap();
        assert_eq!(stored.result.get("junior-manager").unwrap().state_name(), "completed");
        assert_eq!(stored.result.get("senior-partner").unwrap().state_name(), "completed");
    }

    #[tokio::test]
    async fn finished_update_carries_this_runs_entries() {
        let runner = runner(flaky_rag_provider(), Arc::new(InMemoryRunStorage::new()));
        let updates = runner
            .analyze(vec!["12".into()], SupportedModel::GeminiFlash, slugs(&["junior-manager"]))
            .await
            .unwrap()
            .collect()
            .await;

        match updates.last() {
            Some(AnalysisUpdate::RunFinished { result, .. }) => {
                let order: Vec<_> = result.entries().iter().map(|e| e.expert_slug.as_str()).collect();
                assert_eq!(order, vec!["junior-manager"]);
                assert!(result.is_finished());
            }
            other => panic!("expected run_finished, got {other:?}"),
        }
        assert!(runner.delete_run("12").await.unwrap());
        assert!(runner.run("12").await.unwrap().is_none());
    }
}
