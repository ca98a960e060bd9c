// Context builder: joins retrieved chunks into a prompt block under a character budget
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::rag::index::ScoredChunk;

/// Separator placed between consecutive chunks
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum characters of assembled context, separators included
    pub budget_chars: usize,
    /// Placed between chunks
    pub separator: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_chars: 8000,
            separator: CHUNK_SEPARATOR.to_string(),
        }
    }
}

impl From<&RetrievalConfig> for ContextConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            budget_chars: config.context_budget_chars,
            ..Self::default()
        }
    }
}

/// Assembled context for prompt augmentation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssembledContext {
    /// The formatted context text
    pub text: String,
    /// Chunk ids included, in retrieval order
    pub chunk_ids: Vec<String>,
    /// Chunks left out because they would overflow the budget
    pub dropped: usize,
}

impl AssembledContext {
    pub fn chunk_count(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Context builder for assembling retrieval context
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    /// Create new context builder with default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom configuration
    pub fn with_config(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Concatenate chunks in retrieval order. A chunk that would overflow the
    /// budget ends assembly; chunks are never truncated.
    pub fn build(&self, chunks: &[ScoredChunk]) -> AssembledContext {
        let separator_chars = self.config.separator.chars().count();
        let mut parts: Vec<&str> = Vec::new();
        let mut used = 0usize;
        let mut chunk_ids = Vec::new();

        for (idx, scored) in chunks.iter().enumerate() {
            let text = scored.chunk.text.trim();
            let cost = text.chars().count() + if parts.is_empty() { 0 } else { separator_chars };

            if used + cost > self.config.budget_chars {
                return AssembledContext {
                    text: parts.join(&self.config.separator),
                    chunk_ids,
                    dropped: chunks.len() - idx,
                };
            }

            parts.push(text);
            used += cost;
            chunk_ids.push(scored.chunk.id.clone());
        }

        AssembledContext {
            text: parts.join(&self.config.separator),
            chunk_ids,
            dropped: 0,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::chunker::Chunk;

    fn scored(ordinal: usize, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: format!("c{}", ordinal),
                ordinal,
                text: text.to_string(),
                char_start: 0,
                char_end: text.chars().count(),
            },
            distance: ordinal as f32 * 0.1,
        }
    }

    fn builder(budget: usize) -> ContextBuilder {
        ContextBuilder::with_config(ContextConfig {
            budget_chars: budget,
            ..ContextConfig::default()
        })
    }

    #[test]
    fn test_context_config_default() {
        let config = ContextConfig::default();
        assert_eq!(config.budget_chars, 8000);
        assert_eq!(config.separator, "\n\n---\n\n");
    }

    #[test]
    fn test_joins_in_retrieval_order() {
        let context = builder(1000).build(&[scored(2, "둘째"), scored(0, "첫째")]);
        assert_eq!(context.text, "둘째\n\n---\n\n첫째");
        assert_eq!(context.chunk_ids, vec!["c2", "c0"]);
        assert_eq!(context.dropped, 0);
    }

    #[test]
    fn test_budget_counts_separators_and_drops_whole_chunks() {
        // 10 + 7 + 10 = 27 fits, a third chunk would need 44
        let chunks = [scored(0, &"a".repeat(10)), scored(1, &"b".repeat(10)), scored(2, &"c".repeat(10))];
        let context = builder(30).build(&chunks);
        assert_eq!(context.chunk_count(), 2);
        assert_eq!(context.dropped, 1);
        assert_eq!(context.char_count(), 27);
        assert!(!context.text.contains('c'));
    }

    #[test]
    fn test_never_exceeds_budget() {
        let chunks: Vec<ScoredChunk> = (0..20).map(|i| scored(i, &"가".repeat(13 + i))).collect();
        for budget in [0, 5, 50, 123, 400] {
            assert!(builder(budget).build(&chunks).char_count() <= budget);
        }
    }

    #[test]
    fn test_oversized_first_chunk_yields_empty_context() {
        let context = builder(5).build(&[scored(0, "longer than five")]);
        assert!(context.text.is_empty());
        assert_eq!(context.dropped, 1);
    }
}
