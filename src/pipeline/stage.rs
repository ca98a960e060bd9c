//! Stage definitions, results and lifecycle
//!
//! Lifecycle per (session, stage):
//!
//! ```text
//! NotStarted --Start--> Running --Complete--> Ready
//!                          |                   |
//!                          +--Fail--> Failed   +--Start--> Running (explicit re-run)
//!                                       |
//!                                       +--Start--> Running (retry)
//! Ready | Failed | NotStarted --Invalidate--> NotStarted
//! NotStarted | Ready | Failed --Edit--> Ready
//! ```
//!
//! `Running` only exists inside one execution; an abandoned execution never
//! commits a transition, so it cannot be observed by a later caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::errors::{PipelineError, Result};
use crate::pipeline::facts::FactSchema;
use crate::pipeline::prompt::PromptSpec;
use crate::rag::RetrievalStrategy;

/// Lifecycle state of one stage within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StageState {
    #[default]
    NotStarted,
    Running,
    /// Result present and current
    Ready,
    /// Last attempt failed; terminal until retried
    Failed,
}

/// Events that drive [`StageState::transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    Start,
    Complete,
    Fail,
    /// A dependency changed
    Invalidate,
    /// Content replaced by hand
    Edit,
}

impl StageState {
    pub fn transition(&self, event: StageEvent) -> Result<StageState> {
        use StageEvent::*;
        use StageState::*;

        let next = match (self, event) {
            (NotStarted, Start) | (Ready, Start) | (Failed, Start) => Running,
            (Running, Complete) => Ready,
            (Running, Fail) => Failed,
            (NotStarted, Invalidate) | (Ready, Invalidate) | (Failed, Invalidate) => NotStarted,
            (NotStarted, Edit) | (Ready, Edit) | (Failed, Edit) => Ready,
            (from, event) => {
                return Err(PipelineError::InvalidTransition {
                    from: format!("{:?}", from),
                    event: format!("{:?}", event),
                })
            }
        };

        Ok(next)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, StageState::Ready)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StageState::NotStarted => "not started",
            StageState::Running => "running",
            StageState::Ready => "ready",
            StageState::Failed => "failed",
        }
    }
}

/// What a stage produces
#[derive(Debug, Clone)]
pub enum StageKind {
    /// Structured facts; the reply must hold exactly one JSON object
    Facts(FactSchema),
    /// Free-form report, usually a numbered list
    Report,
}

impl StageKind {
    pub fn is_facts(&self) -> bool {
        matches!(self, StageKind::Facts(_))
    }
}

/// Dependency contents handed to query builders and prompts, keyed by stage name
pub type StageInputs = std::collections::BTreeMap<String, String>;

/// Builds a stage's retrieval query from its dependency contents
#[derive(Clone)]
pub struct QueryBuilder(Arc<dyn Fn(&StageInputs) -> String + Send + Sync>);

impl QueryBuilder {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&StageInputs) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Same query regardless of inputs
    pub fn fixed(query: &str) -> Self {
        let query = query.to_string();
        Self::new(move |_| query.clone())
    }

    pub fn build(&self, inputs: &StageInputs) -> String {
        (self.0)(inputs)
    }
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryBuilder(..)")
    }
}

/// Immutable description of one stage
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub name: String,
    /// Human-readable title, used for export sheet names
    pub title: String,
    pub depends_on: Vec<String>,
    pub kind: StageKind,
    pub prompt: PromptSpec,
    pub query: QueryBuilder,
    pub strategy: RetrievalStrategy,
    pub temperature: f32,
    /// Condense long documents with map-reduce instead of retrieving
    pub condense_long_input: bool,
}

impl StageDefinition {
    pub fn new(name: &str, kind: StageKind, prompt: PromptSpec) -> Self {
        Self {
            name: name.to_string(),
            title: name.to_string(),
            depends_on: Vec::new(),
            kind,
            prompt,
            query: QueryBuilder::fixed(name),
            strategy: RetrievalStrategy::Direct,
            temperature: 0.0,
            condense_long_input: false,
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn query(mut self, query: QueryBuilder) -> Self {
        self.query = query;
        self
    }

    pub fn strategy(mut self, strategy: RetrievalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn condense_long_input(mut self, condense: bool) -> Self {
        self.condense_long_input = condense;
        self
    }

    /// Identifies what the stage would ask the model, for cache keys
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{:.3}|{}",
            self.prompt.template(),
            self.strategy,
            self.condense_long_input,
            self.temperature,
            self.depends_on.join(",")
        )
    }
}

/// How a result came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    Generated,
    Edited,
    Refined,
}

/// Output of one stage for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: String,
    pub content: String,
    pub cache_key: String,
    pub origin: ResultOrigin,
    pub created_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(stage_name: &str, content: String, cache_key: String, origin: ResultOrigin) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            content,
            cache_key,
            origin,
            created_at: Utc::now(),
        }
    }
}

/// Caller-supplied parameters folded into every cache key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunParams {
    /// Bump to force regeneration of otherwise identical inputs
    pub run_id: u64,
}

impl RunParams {
    pub fn new(run_id: u64) -> Self {
        Self { run_id }
    }
}
