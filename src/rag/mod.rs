// Retrieval-augmented context for pipeline stages
//
// Components:
// - Chunker: overlapping passages cut at paragraph, sentence and word breaks
// - Semantic index: exact cosine search over embedded chunks
// - Retriever: direct or hypothetical-document (HyDE) query strategies
// - Context builder: budgeted assembly of retrieved chunks

pub mod chunker;
pub mod context;
pub mod index;
pub mod retrieval;

use serde::{Deserialize, Serialize};

pub use chunker::{Chunk, Chunker};
pub use context::{AssembledContext, ContextBuilder, ContextConfig};
pub use index::{IndexQuery, ScoredChunk, SemanticIndex};
pub use retrieval::{Retriever, SearchParams};

/// How a stage's retrieval query is turned into a search vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    /// Embed the query text itself
    Direct,
    /// Embed a model-written passage that resembles the wanted text
    Hyde,
}

impl std::fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalStrategy::Direct => write!(f, "direct"),
            RetrievalStrategy::Hyde => write!(f, "hyde"),
        }
    }
}
