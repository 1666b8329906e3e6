use thiserror::Error;

use crate::schema::ValidationError;

/// Closed classification used by the retry engine and the service edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing credential, unknown model or unknown expert.
    Configuration,
    /// The caller supplied an unusable request (e.g. empty expert selection).
    InvalidRequest,
    /// HTTP 429/502/503/504 or a request timeout.
    Transient,
    /// The model answered but the payload could not be extracted or validated.
    MalformedOutput,
    /// Embedding or vector search failed for one expert.
    RagRetrieval,
    /// Anything else; never retried.
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::MalformedOutput)
    }
}

/// How a single provider call failed, tagged at the point of failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Status(u16),
    Timeout,
    Transport,
    Api,
    EmptyResponse,
}

#[derive(Debug, Clone, Error)]
#[error("{provider} API error: {message}")]
pub struct ProviderError {
    pub provider: &'static str,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: &'static str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            message: message.into(),
        }
    }

    pub fn status(provider: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Status(status), message)
    }

    pub fn timeout(provider: &'static str) -> Self {
        Self::new(provider, ProviderErrorKind::Timeout, "request timeout")
    }

    pub fn is_transient(&self) -> bool {
        match self.kind {
            ProviderErrorKind::Status(code) => matches!(code, 429 | 502 | 503 | 504),
            ProviderErrorKind::Timeout => true,
            _ => false,
        }
    }
}

/// Model output that could not be turned into a valid analysis.
#[derive(Debug, Clone, Error)]
pub enum MalformedOutput {
    #[error("{0}")]
    Extraction(#[from] crate::extract::ExtractionError),
    #[error("Validation failed: {}", join_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Error)]
pub enum RagError {
    #[error("embedding request failed: {0}")]
    Embedding(String),
    #[error("vector search failed: {0}")]
    Search(String),
}

#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("expert \"{0}\" not found")]
    UnknownExpert(String),

    #[error("unsupported model: {0}")]
    UnknownModel(String),

    #[error("at least one expert must be selected")]
    EmptySelection,

    #[error("no analysis run found for startup {0}")]
    RunNotFound(String),

    #[error("expert \"{expert}\" is not part of the run for startup {startup_id}")]
    ExpertNotInRun { startup_id: String, expert: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    MalformedOutput(#[from] MalformedOutput),

    #[error("RAG retrieval failed: {0}")]
    RagRetrieval(#[from] RagError),

    #[error("startup data unavailable: {0}")]
    Source(String),

    #[error("AI analysis failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AnalysisError>,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Configuration(_)
            | AnalysisError::UnknownExpert(_)
            | AnalysisError::UnknownModel(_) => ErrorKind::Configuration,
            AnalysisError::EmptySelection
            | AnalysisError::RunNotFound(_)
            | AnalysisError::ExpertNotInRun { .. } => ErrorKind::InvalidRequest,
            AnalysisError::Provider(e) if e.is_transient() => ErrorKind::Transient,
            AnalysisError::MalformedOutput(_) => ErrorKind::MalformedOutput,
            AnalysisError::RagRetrieval(_) => ErrorKind::RagRetrieval,
            AnalysisError::RetriesExhausted { source, .. } => source.kind(),
            AnalysisError::Provider(_) | AnalysisError::Source(_) | AnalysisError::Storage(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Deepest error in a `RetriesExhausted` chain.
    pub fn root_cause(&self) -> &AnalysisError {
        match self {
            AnalysisError::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root_cause(),
            AnalysisError::Provider(ProviderError {
                kind: ProviderErrorKind::Timeout,
                ..
            })
        )
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
