//! Item-level refinement of a report stage
//!
//! Locked items are shown to the model as fixed context and never change.
//! Unlocked items are regenerated as one batch; the reply is matched back to
//! them by position. A short reply is padded with the original items and a
//! long one is truncated, so the item count and the locked positions of a
//! report survive any reply.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

use crate::errors::Result;
use crate::model::GenerationModel;
use crate::pipeline::prompt::{PromptSpec, PromptValues};
use crate::report::items::{parse, MarkerGrammar, ReportItem};

/// Default temperature for regenerated items
pub const REFINE_TEMPERATURE: f32 = 0.5;

const REFINE_TEMPLATE: &str = "You are revising selected items of a proposal-preparation report \
written for a public Request for Proposal (RFP). Answer in Korean.\n\n\
## Reviewer instruction\n{instruction}\n\n\
## Items that must stay exactly as they are (for reference only)\n{locked}\n\n\
## Items to rewrite\n{targets}\n\n\
## Supporting excerpts from the RFP\n{context}\n\n\
Rewrite every item under \"Items to rewrite\" following the reviewer instruction and the excerpts. \
Return exactly {count} items as a numbered list (1., 2., ...), in the same order, and nothing else.";

/// Which items of one stage are locked, by ordinal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    locked: BTreeSet<usize>,
}

impl LockState {
    pub fn set(&mut self, ordinal: usize, locked: bool) {
        if locked {
            self.locked.insert(ordinal);
        } else {
            self.locked.remove(&ordinal);
        }
    }

    pub fn lock(&mut self, ordinal: usize) {
        self.set(ordinal, true);
    }

    pub fn unlock(&mut self, ordinal: usize) {
        self.set(ordinal, false);
    }

    pub fn is_locked(&self, ordinal: usize) -> bool {
        self.locked.contains(&ordinal)
    }

    pub fn locked(&self) -> impl Iterator<Item = usize> + '_ {
        self.locked.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.locked.is_empty()
    }

    pub fn clear(&mut self) {
        self.locked.clear();
    }
}

/// What one refinement call produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineOutcome {
    /// Same length and ordinals as the unlocked input
    pub items: Vec<ReportItem>,
    /// Ordinals kept unchanged because the reply was short
    pub padded: Vec<usize>,
    /// Reply items beyond the requested count
    pub surplus: usize,
}

/// Regenerates unlocked items
pub struct GranularRefiner {
    generator: Arc<dyn GenerationModel>,
    prompt: PromptSpec,
    temperature: f32,
}

impl GranularRefiner {
    pub fn new(generator: Arc<dyn GenerationModel>) -> Result<Self> {
        Ok(Self {
            generator,
            prompt: PromptSpec::new(
                "refine",
                REFINE_TEMPLATE,
                &["instruction", "locked", "targets", "context", "count"],
            )?,
            temperature: REFINE_TEMPERATURE,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// `refine(locked, unlocked, context, instruction)`. Returns exactly
    /// `unlocked.len()` items carrying the unlocked ordinals, each in the
    /// marker grammar of the item it replaces.
    pub async fn refine(
        &self,
        stage: &str,
        locked: &[ReportItem],
        unlocked: &[ReportItem],
        retrieved_context: &str,
        instruction: &str,
    ) -> Result<RefineOutcome> {
        if unlocked.is_empty() {
            return Ok(RefineOutcome {
                items: Vec::new(),
                padded: Vec::new(),
                surplus: 0,
            });
        }

        let prompt = self.prompt.render(&self.values(locked, unlocked, retrieved_context, instruction))?;
        let reply = self.generator.complete(&prompt, self.temperature).await?;
        let mut candidates = parse(&reply).items;

        let surplus = candidates.len().saturating_sub(unlocked.len());
        if surplus > 0 {
            warn!(stage, expected = unlocked.len(), received = candidates.len(), "dropping surplus refined items");
            candidates.truncate(unlocked.len());
        }

        let mut items = Vec::with_capacity(unlocked.len());
        let mut padded = Vec::new();
        for (position, original) in unlocked.iter().enumerate() {
            let grammar = original
                .marker()
                .map(|m| m.grammar)
                .unwrap_or(MarkerGrammar::Plain);
            match candidates.get(position) {
                Some(candidate) => items.push(candidate.conform(grammar, original.ordinal)),
                None => {
                    padded.push(original.ordinal);
                    items.push(original.clone());
                }
            }
        }

        if !padded.is_empty() {
            warn!(
                stage,
                expected = unlocked.len(),
                received = unlocked.len() - padded.len(),
                padded = ?padded,
                "refinement reply was short, keeping original items"
            );
        }

        Ok(RefineOutcome {
            items,
            padded,
            surplus,
        })
    }

    fn values(
        &self,
        locked: &[ReportItem],
        unlocked: &[ReportItem],
        context: &str,
        instruction: &str,
    ) -> PromptValues {
        let list = |items: &[ReportItem]| {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items
                    .iter()
                    .map(|i| i.raw_text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        };
        let targets = unlocked
            .iter()
            .enumerate()
            .map(|(n, item)| item.conform(MarkerGrammar::Plain, n + 1).raw_text)
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut values = PromptValues::new();
        values.insert("instruction".to_string(), instruction.trim().to_string());
        values.insert("locked".to_string(), list(locked));
        values.insert("targets".to_string(), targets);
        values.insert("context".to_string(), context.to_string());
        values.insert("count".to_string(), unlocked.len().to_string());
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerationModel for Scripted {
        async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn items(ordinals: &[usize]) -> Vec<ReportItem> {
        ordinals
            .iter()
            .map(|&n| ReportItem::new(n, format!("**{}. 원본 항목 {}**", n, n)))
            .collect()
    }

    #[test]
    fn test_lock_state() {
        let mut locks = LockState::default();
        locks.lock(3);
        locks.lock(1);
        locks.set(3, false);
        assert!(locks.is_locked(1));
        assert!(!locks.is_locked(3));
        assert_eq!(locks.locked().collect::<Vec<_>>(), vec![1]);
        locks.clear();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_reply_mapped_by_position_in_original_grammar() {
        let model = Scripted::new("1. 새 항목 가\n2. 새 항목 나");
        let refiner = GranularRefiner::new(model.clone()).unwrap();
        let outcome = refiner
            .refine("ksf", &items(&[1, 3]), &items(&[2, 4]), "발췌", "더 구체적으로")
            .await
            .unwrap();

        assert_eq!(outcome.items[0], ReportItem::new(2, "**2. 새 항목 가"));
        assert_eq!(outcome.items[1], ReportItem::new(4, "**4. 새 항목 나"));
        assert!(outcome.padded.is_empty());

        let prompt = &model.prompts.lock().unwrap()[0];
        assert!(prompt.contains("원본 항목 1"));
        assert!(prompt.contains("Return exactly 2 items"));
    }

    #[tokio::test]
    async fn test_short_reply_is_padded_with_originals() {
        let refiner = GranularRefiner::new(Scripted::new("1. 하나만")).unwrap();
        let unlocked = items(&[1, 2, 3]);
        let outcome = refiner.refine("ksf", &[], &unlocked, "", "수정").await.unwrap();

        assert_eq!(outcome.items.len(), 3);
        assert_eq!(outcome.items[0].raw_text, "**1. 하나만");
        assert_eq!(outcome.items[1], unlocked[1]);
        assert_eq!(outcome.items[2], unlocked[2]);
        assert_eq!(outcome.padded, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_long_reply_is_truncated() {
        let refiner = GranularRefiner::new(Scripted::new("1. a\n2. b\n3. c")).unwrap();
        let outcome = refiner.refine("ksf", &[], &items(&[5]), "", "수정").await.unwrap();
        assert_eq!(outcome.items, vec![ReportItem::new(5, "**5. a")]);
        assert_eq!(outcome.surplus, 2);
    }

    #[tokio::test]
    async fn test_nothing_unlocked_makes_no_call() {
        let model = Scripted::new("unused");
        let refiner = GranularRefiner::new(model.clone()).unwrap();
        let outcome = refiner.refine("ksf", &items(&[1]), &[], "", "수정").await.unwrap();
        assert!(outcome.items.is_empty());
        assert!(model.prompts.lock().unwrap().is_empty());
    }
}
