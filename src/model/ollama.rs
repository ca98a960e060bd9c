//! Ollama API client
//!
//! Non-streaming generation (`POST /api/generate`) and embeddings
//! (`POST /api/embeddings`). Stage outputs are consumed whole, so streaming
//! buys nothing here.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::errors::{PipelineError, Result};
use crate::model::{Embedding, EmbeddingModel, GenerationModel};

/// Default Ollama API endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default generation model
pub const DEFAULT_MODEL: &str = "qwen2.5:7b-instruct";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Ollama HTTP client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    embedding_model: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Create new Ollama client with default settings
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_OLLAMA_URL, DEFAULT_MODEL, DEFAULT_EMBEDDING_MODEL, REQUEST_TIMEOUT)
    }

    /// Create Ollama client with custom configuration
    pub fn with_config(
        base_url: &str,
        model: &str,
        embedding_model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PipelineError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
            timeout,
        })
    }

    /// Build from the `[ollama]` configuration section
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_config(
            &config.ollama_url(),
            &config.ollama.generation_model,
            &config.ollama.embedding_model,
            Duration::from_secs(config.ollama.request_timeout_secs),
        )
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/version", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Get current generation model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get current embedding model name
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout {
                        duration_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    PipelineError::ModelApi(format!("Failed to send request: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PipelineError::ModelApi(format!("HTTP {}: {}", status, error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::ModelApi(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl GenerationModel for OllamaClient {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature },
        };

        let response: OllamaGenerateResponse = self.post_json("/api/generate", &request).await?;
        debug!(
            model = %self.model,
            prompt_chars = prompt.chars().count(),
            reply_chars = response.response.chars().count(),
            "generation complete"
        );
        Ok(response.response)
    }
}

#[async_trait]
impl EmbeddingModel for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let request = OllamaEmbeddingRequest {
            model: &self.embedding_model,
            prompt: text,
        };

        let response: OllamaEmbeddingResponse = self.post_json("/api/embeddings", &request).await?;
        if response.embedding.is_empty() {
            return Err(PipelineError::ModelApi(
                "Embedding endpoint returned an empty vector".to_string(),
            ));
        }
        Ok(response.embedding)
    }

    fn identity(&self) -> String {
        format!("ollama:{}", self.embedding_model)
    }
}

/// Ollama generate request
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

/// Ollama generate response (non-streaming)
#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Ollama embeddings request
#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Ollama embeddings response
#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OllamaClient::new();
        assert!(client.is_ok());

        let client = client.unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.embedding_model(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(client.base_url(), DEFAULT_OLLAMA_URL);
    }

    #[test]
    fn test_client_from_config() {
        let mut config = Config::default();
        config.ollama.host = "localhost".to_string();
        config.ollama.generation_model = "llama3.1:8b".to_string();

        let client = OllamaClient::from_config(&config).unwrap();
        assert_eq!(client.model(), "llama3.1:8b");
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_generate_request_shape() {
        let request = OllamaGenerateRequest {
            model: "m",
            prompt: "p",
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["temperature"], 0.0);
    }
}
