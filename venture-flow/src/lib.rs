pub mod config;
pub mod error;
pub mod experts;
pub mod extract;
pub mod generator;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod rag;
pub mod retry;
pub mod runner;
pub mod schema;
pub mod source;
pub mod storage;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{ConfigError, Settings};
pub use error::{AnalysisError, ErrorKind, Result};
pub use experts::{Expert, ExpertRegistry, RagConfig};
pub use generator::AnalysisGenerator;
pub use models::{
    AnalysisRequest, EntryMetadata, EntryState, ExpertAnalysisEntry, MultiExpertResult,
    SupportedModel,
};
pub use orchestrator::Orchestrator;
pub use prompts::{PromptBuilder, TemplateKey};
pub use providers::{CompletionProvider, ProviderKind, ProviderRegistry};
pub use rag::{RagAnalyzer, RagContext, RetrievedContext};
pub use retry::RetryPolicy;
pub use runner::{AnalysisRunner, AnalysisUpdate, RunHandle};
pub use schema::AnalysisResult;
pub use source::{DeepVestClient, StartupSource, StartupSummary};
pub use storage::{AnalysisRun, InMemoryRunStorage, RunStorage};
