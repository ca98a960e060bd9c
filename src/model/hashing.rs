//! Deterministic local embedder
//!
//! Hashes character n-grams into a fixed number of buckets and L2-normalises
//! the result. No model download, no network: used for `--offline` runs and
//! as the embedding double in tests. Identical text always yields an
//! identical vector, so a chunk queried with its own text ranks first.

use async_trait::async_trait;

use crate::errors::Result;
use crate::model::{Embedding, EmbeddingModel};

const DEFAULT_DIMENSION: usize = 256;
const NGRAM: usize = 3;

/// Bag of hashed character trigrams
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(DEFAULT_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Synchronous embedding; the trait impl delegates here
    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vector = vec![0f32; self.dimension];
        let chars: Vec<char> = text
            .chars()
            .flat_map(char::to_lowercase)
            .filter(|c| !c.is_whitespace())
            .collect();

        if chars.is_empty() {
            return vector;
        }

        if chars.len() < NGRAM {
            let gram: String = chars.iter().collect();
            vector[self.bucket(&gram)] += 1.0;
        } else {
            for window in chars.windows(NGRAM) {
                let gram: String = window.iter().collect();
                vector[self.bucket(&gram)] += 1.0;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }

    fn bucket(&self, gram: &str) -> usize {
        let digest = blake3::hash(gram.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % self.dimension as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingModel for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }

    fn identity(&self) -> String {
        format!("hashing-trigram:{}", self.dimension)
    }
}
