//! Staged report pipeline
//!
//! Stages form a validated DAG ([`graph`]); each one is executed by the
//! [`executor`] against a per-document [`session`], with results shared
//! across sessions through a reproducibility-keyed [`cache`].

pub mod cache;
pub mod catalog;
pub mod executor;
pub mod facts;
pub mod graph;
pub mod mapreduce;
pub mod prompt;
pub mod session;
pub mod stage;

pub use cache::{reproducibility_key, CacheKey, CacheStats, StageCache};
pub use executor::{ExecutorSettings, Refinement, StageExecutor, StageRun};
pub use facts::{FactSchema, FactSheet, NOT_SPECIFIED};
pub use graph::Pipeline;
pub use mapreduce::{Condenser, MapReduce};
pub use prompt::{PromptSpec, PromptValues};
pub use session::PipelineSession;
pub use stage::{
    QueryBuilder, ResultOrigin, RunParams, StageDefinition, StageEvent, StageKind, StageResult, StageState,
};
