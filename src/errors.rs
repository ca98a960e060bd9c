//! Error types for rfpanalyst
//!
//! One taxonomy for the whole ingestion, retrieval and generation core.
//! Stage-scoped variants always name the failing stage so a caller can
//! retry exactly that stage.

use thiserror::Error;

/// Main error type for the report pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Index build attempted over zero chunks
    #[error("Cannot build an index from an empty corpus")]
    EmptyCorpus,

    /// A stage was executed before one of its dependencies was Ready
    #[error("Stage '{stage}' is not ready: dependency '{missing}' has no result")]
    StageNotReady { stage: String, missing: String },

    /// The fact-extraction reply did not contain exactly one JSON object
    #[error("Stage '{stage}' returned malformed facts: {reason}")]
    MalformedFacts { stage: String, reason: String },

    /// The generation model failed while producing a stage
    #[error("Generation failed for stage '{stage}': {message}")]
    Generation { stage: String, message: String },

    /// Query issued against a missing or unusable index
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Stage name not present in the pipeline definition
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Prompt template and its declared fields disagree
    #[error("Prompt '{template}' is invalid: field '{field}'")]
    Prompt { template: String, field: String },

    /// Stage content has no numbered items to lock or refine
    #[error("Stage '{stage}' has no numbered items")]
    NoReportItems { stage: String },

    /// Item ordinal outside 1..=count
    #[error("Stage '{stage}' has {count} items, item {ordinal} does not exist")]
    ItemOutOfRange {
        stage: String,
        ordinal: usize,
        count: usize,
    },

    /// Stage lifecycle event not valid in the current state
    #[error("Invalid stage transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// Stage graph contains a cycle
    #[error("Cyclic pipeline: {0}")]
    CyclicPipeline(String),

    /// Duplicate stage names or dependencies on undefined stages
    #[error("Invalid pipeline definition: {0}")]
    InvalidPipeline(String),

    /// Model call exceeded its deadline
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Model backend returned an error response
    #[error("Model API error: {0}")]
    ModelApi(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors with context
    #[error("Pipeline error: {0}")]
    Generic(String),
}

impl PipelineError {
    /// Stage this error is attributed to, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::StageNotReady { stage, .. }
            | PipelineError::MalformedFacts { stage, .. }
            | PipelineError::Generation { stage, .. }
            | PipelineError::NoReportItems { stage }
            | PipelineError::ItemOutOfRange { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Transient failures that are safe to retry with identical inputs
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Timeout { .. } => true,
            PipelineError::Http(_) => true,
            PipelineError::ModelApi(_) => true,
            PipelineError::Generation { .. } => true,
            PipelineError::MalformedFacts { .. } => true,

            PipelineError::EmptyCorpus => false,
            PipelineError::StageNotReady { .. } => false,
            PipelineError::UnknownStage(_) => false,
            PipelineError::Prompt { .. } => false,
            PipelineError::NoReportItems { .. } => false,
            PipelineError::InvalidTransition { .. } => false,
            PipelineError::ItemOutOfRange { .. } => false,
            PipelineError::CyclicPipeline(_) => false,
            PipelineError::InvalidPipeline(_) => false,
            PipelineError::Config(_) => false,

            _ => false,
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Convert anyhow errors to PipelineError
impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Generic(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::StageNotReady {
            stage: "strategy".to_string(),
            missing: "facts".to_string(),
        };
        assert!(err.to_string().contains("strategy"));
        assert!(err.to_string().contains("facts"));
    }

    #[test]
    fn test_stage_attribution() {
        let err = PipelineError::MalformedFacts {
            stage: "facts".to_string(),
            reason: "no JSON object".to_string(),
        };
        assert_eq!(err.stage(), Some("facts"));
        assert_eq!(PipelineError::EmptyCorpus.stage(), None);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::Timeout { duration_ms: 10 }.is_retryable());
        assert!(PipelineError::MalformedFacts {
            stage: "facts".into(),
            reason: "x".into()
        }
        .is_retryable());
        assert!(!PipelineError::EmptyCorpus.is_retryable());
        assert!(!PipelineError::StageNotReady {
            stage: "a".into(),
            missing: "b".into()
        }
        .is_retryable());
    }
}
