//! Map-reduce over pieces of a long input
//!
//! `MapReduce(splitter, per_piece, reduce)`: the splitter cuts the input,
//! `per_piece` runs on every piece with bounded concurrency, and `reduce`
//! receives the mapped outputs in input order. Used to condense documents
//! too long for a single prompt.

use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::config::MapReduceConfig;
use crate::errors::Result;
use crate::model::GenerationModel;
use crate::pipeline::prompt::{PromptSpec, PromptValues};
use crate::rag::chunker::Chunker;

/// Generic map-reduce combinator
pub struct MapReduce<S, M, R> {
    splitter: S,
    map: M,
    reduce: R,
    concurrency: usize,
}

impl<S, M, MFut, R, RFut> MapReduce<S, M, R>
where
    S: Fn(&str) -> Vec<String>,
    M: Fn(String) -> MFut,
    MFut: Future<Output = Result<String>>,
    R: Fn(Vec<String>) -> RFut,
    RFut: Future<Output = Result<String>>,
{
    pub fn new(splitter: S, map: M, reduce: R) -> Self {
        Self {
            splitter,
            map,
            reduce,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fails on the first failing piece; the reducer then never runs
    pub async fn run(&self, input: &str) -> Result<String> {
        let pieces = (self.splitter)(input);
        let count = pieces.len();

        let mapped: Vec<String> = stream::iter(pieces)
            .map(|piece| (self.map)(piece))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        debug!(pieces = count, concurrency = self.concurrency, "map phase complete");
        (self.reduce)(mapped).await
    }
}

/// Prompts and parameters for condensing a document with a model
#[derive(Debug, Clone)]
pub struct Condenser {
    chunker: Chunker,
    map_prompt: PromptSpec,
    reduce_prompt: PromptSpec,
    concurrency: usize,
    temperature: f32,
}

impl Condenser {
    /// `map_prompt` takes `{focus}` and `{excerpt}`, `reduce_prompt` takes `{focus}` and `{partials}`
    pub fn new(config: &MapReduceConfig, map_prompt: PromptSpec, reduce_prompt: PromptSpec) -> Self {
        Self {
            chunker: Chunker::new(config.chunk_size, config.overlap),
            map_prompt,
            reduce_prompt,
            concurrency: config.concurrency,
            temperature: 0.0,
        }
    }

    /// Extract what matters for `focus` from every piece, then merge and dedupe
    pub async fn condense(
        &self,
        generator: Arc<dyn GenerationModel>,
        text: &str,
        focus: &str,
    ) -> Result<String> {
        let chunker = self.chunker.clone();
        let temperature = self.temperature;

        let map_generator = generator.clone();
        let map = move |excerpt: String| {
            let generator = map_generator.clone();
            let prompt = self
                .map_prompt
                .render(&values(&[("focus", focus), ("excerpt", &excerpt)]));
            async move { generator.complete(&prompt?, temperature).await }
        };

        let reduce = move |partials: Vec<String>| {
            let generator = generator.clone();
            let joined = partials
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n");
            let prompt = self
                .reduce_prompt
                .render(&values(&[("focus", focus), ("partials", &joined)]));
            async move { generator.complete(&prompt?, temperature).await }
        };

        MapReduce::new(
            move |input: &str| chunker.split(input).into_iter().map(|c| c.text).collect(),
            map,
            reduce,
        )
        .with_concurrency(self.concurrency)
        .run(text)
        .await
    }
}

fn values(pairs: &[(&str, &str)]) -> PromptValues {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
