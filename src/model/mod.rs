//! Model seams: text generation and embedding
//!
//! The pipeline never talks HTTP directly; it holds `Arc<dyn GenerationModel>`
//! and `Arc<dyn EmbeddingModel>` so tests can substitute scripted doubles.

pub mod hashing;
pub mod ollama;
pub mod retry;

use async_trait::async_trait;

use crate::errors::Result;

pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;
pub use retry::{RetryManager, RetryingModel};

/// Fixed-length embedding vector
pub type Embedding = Vec<f32>;

/// `complete(prompt, temperature) -> string`
#[async_trait]
pub trait GenerationModel: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String>;
}

/// `embed(text) -> vector<float>`
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Names the vector space; indexes built by different embedders never
    /// share cached results
    fn identity(&self) -> String;
}
