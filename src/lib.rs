//! rfpanalyst - staged report generation for procurement documents
//!
//! Ingests a Request for Proposal, indexes it for semantic retrieval and runs
//! a DAG of model-backed stages (facts, strategy, risk, key success factors,
//! presentation outline) over it. Stage results are cached by a
//! reproducibility key; numbered report items can be locked and the rest
//! regenerated in place.
//!
//! # Architecture
//!
//! - **ingest**: text normalisation and content-addressed document identity
//! - **model**: generation and embedding seams, Ollama client, retry
//! - **rag**: chunking, semantic index, Direct/HyDE retrieval, context assembly
//! - **pipeline**: stage graph, executor, cache, sessions, default catalog
//! - **report**: numbered item model and granular refinement
//! - **export**: sheet-per-report bundle

pub mod errors;
pub mod config;
pub mod logging;
pub mod ingest;
pub mod model;
pub mod rag;
pub mod pipeline;
pub mod report;
pub mod export;
pub mod cli;

// Re-export commonly used types
pub use config::Config;
pub use errors::{PipelineError, Result};
pub use ingest::{DocumentId, SourceDocument};
pub use pipeline::{PipelineSession, RunParams, StageExecutor};
