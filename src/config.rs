//! Configuration management for rfpanalyst
//!
//! Provides TOML-based configuration with defaults and validation.
//! Location: ~/.rfpanalyst/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{PipelineError, Result};
use crate::rag::RetrievalStrategy;

/// Complete configuration for rfpanalyst
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub map_reduce: MapReduceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Ollama connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
    pub generation_model: String,
    pub embedding_model: String,
    pub request_timeout_secs: u64,
}

/// Chunker parameters (characters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub target_size: usize,
    pub overlap: usize,
}

/// Retrieval parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub context_budget_chars: usize,
    /// Overrides every stage's own strategy when set
    pub strategy_override: Option<RetrievalStrategy>,
}

/// Long-document condensation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapReduceConfig {
    pub threshold_chars: usize,
    pub chunk_size: usize,
    pub overlap: usize,
    pub concurrency: usize,
}

/// Model call retry parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

/// Stage cache persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub persist: bool,
    pub dir: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11434,
            generation_model: "qwen2.5:7b-instruct".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: 1000,
            overlap: 150,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 6,
            context_budget_chars: 8000,
            strategy_override: None,
        }
    }
}

impl Default for MapReduceConfig {
    fn default() -> Self {
        Self {
            threshold_chars: 20_000,
            chunk_size: 10_000,
            overlap: 500,
            concurrency: 4,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persist: true,
            dir: "~/.rfpanalyst/cache".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or the default location.
    ///
    /// The default file is created with built-in values on first use.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(config_path) => Self::load_from_file(config_path),
            None => Self::load_default(),
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from ~/.rfpanalyst/config.toml, writing defaults if it is missing
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_path()?;
        if config_path.exists() {
            return Self::load_from_file(&config_path);
        }

        let config = Config::default();
        config.save(&config_path)?;
        Ok(config)
    }

    /// Standard configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| PipelineError::Config("Could not determine home directory".into()))?;
        Ok(home.join(".rfpanalyst").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.chunking.target_size == 0 {
            return Err(PipelineError::Config(
                "chunking.target_size must be greater than 0".to_string(),
            ));
        }

        if self.chunking.overlap > self.chunking.target_size / 2 {
            return Err(PipelineError::Config(
                "chunking.overlap must be at most half of chunking.target_size".to_string(),
            ));
        }

        if self.map_reduce.overlap > self.map_reduce.chunk_size / 2 {
            return Err(PipelineError::Config(
                "map_reduce.overlap must be at most half of map_reduce.chunk_size".to_string(),
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(PipelineError::Config(
                "retrieval.top_k must be greater than 0".to_string(),
            ));
        }

        if self.retrieval.context_budget_chars == 0 {
            return Err(PipelineError::Config(
                "retrieval.context_budget_chars must be greater than 0".to_string(),
            ));
        }

        if self.map_reduce.concurrency == 0 {
            return Err(PipelineError::Config(
                "map_reduce.concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| PipelineError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Get Ollama base URL
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.ollama.host, self.ollama.port)
    }

    /// Expand tilde in paths
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Stage cache directory, when persistence is enabled
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache
            .persist
            .then(|| Self::expand_path(&self.cache.dir))
    }
}
