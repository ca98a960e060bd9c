//! In-memory semantic index over one document's chunks
//!
//! Exact nearest-neighbour search by cosine distance. Every chunk is embedded
//! once at build time and the vector kept for the life of the index; chunks
//! with identical text share one embedding call.

use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::model::{Embedding, EmbeddingModel};
use crate::rag::chunker::Chunk;

/// Concurrent embedding requests during build
const EMBED_CONCURRENCY: usize = 4;

/// What to search with
#[derive(Debug, Clone, Copy)]
pub enum IndexQuery<'a> {
    /// Embedded with the index's own embedder
    Text(&'a str),
    /// Pre-computed, must match the index dimension
    Vector(&'a [f32]),
}

/// A chunk with its distance to the query (lower is closer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

struct IndexEntry {
    chunk: Chunk,
    embedding: Embedding,
}

/// Chunks plus their embeddings
pub struct SemanticIndex {
    entries: Vec<IndexEntry>,
    dimension: usize,
    embedder: Arc<dyn EmbeddingModel>,
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("chunks", &self.entries.len())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl SemanticIndex {
    /// Embed every chunk. Fails with `EmptyCorpus` on zero chunks.
    pub async fn build(chunks: Vec<Chunk>, embedder: Arc<dyn EmbeddingModel>) -> Result<Self> {
        if chunks.is_empty() {
            return Err(PipelineError::EmptyCorpus);
        }

        let mut unique: Vec<&str> = Vec::new();
        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        for chunk in &chunks {
            if !slot_of.contains_key(chunk.text.as_str()) {
                slot_of.insert(chunk.text.as_str(), unique.len());
                unique.push(chunk.text.as_str());
            }
        }

        let embeddings: Vec<Embedding> = stream::iter(unique.iter().copied())
            .map(|text| {
                let embedder = embedder.clone();
                async move { embedder.embed(text).await }
            })
            .buffered(EMBED_CONCURRENCY)
            .try_collect()
            .await?;

        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 || embeddings.iter().any(|e| e.len() != dimension) {
            return Err(PipelineError::Retrieval(
                "embedder returned vectors of inconsistent dimension".to_string(),
            ));
        }

        let slots: Vec<usize> = chunks.iter().map(|c| slot_of[c.text.as_str()]).collect();
        let entries = chunks
            .into_iter()
            .zip(slots)
            .map(|(chunk, slot)| IndexEntry {
                chunk,
                embedding: embeddings[slot].clone(),
            })
            .collect::<Vec<_>>();

        debug!(
            chunks = entries.len(),
            embedded = embeddings.len(),
            dimension,
            "semantic index built"
        );

        Ok(Self {
            entries,
            dimension,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Chunks in document order
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// The `k` nearest chunks, ascending distance, ties by ordinal.
    /// Returns every chunk when `k` exceeds the chunk count.
    pub async fn query(&self, query: IndexQuery<'_>, k: usize) -> Result<Vec<ScoredChunk>> {
        match query {
            IndexQuery::Vector(vector) => self.query_vector(vector, k),
            IndexQuery::Text(text) => {
                let vector = self.embedder.embed(text).await?;
                self.query_vector(&vector, k)
            }
        }
    }

    pub fn query_vector(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if vector.len() != self.dimension {
            return Err(PipelineError::Retrieval(format!(
                "query dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                distance: cosine_distance(vector, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.chunk.ordinal.cmp(&b.chunk.ordinal))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// `1 - cos(a, b)`; a zero vector is maximally dissimilar to everything
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let distance = 1.0 - dot / (norm_a * norm_b);
    if distance.is_nan() {
        1.0
    } else {
        distance
    }
}
