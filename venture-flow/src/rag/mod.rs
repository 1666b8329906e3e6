//! Retrieval-augmented generation: embed a query, search the vector index, budget the
//! retrieved passages into a prompt block.

mod analyzer;
mod embedding;
mod vector_search;

pub use analyzer::{RagAnalyzer, RagContext};
pub use embedding::{EMBEDDING_DIMENSIONS, EMBEDDING_MODEL, Embedder, Embedding, OpenAiEmbedder, TokenUsage};
pub use vector_search::{CollectionHealth, QdrantClient, VectorIndex};

use serde::{Deserialize, Serialize};

/// One passage returned by vector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub content: String,
    pub score: f32,
    pub source_id: String,
}
