mod env;
mod types;


pub use types::*;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use simili_embed::OllamaConfig;
use simili_index::{ChunkerConfig, IndexerConfig};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be at least 1");
        }
        if self.embedding.concurrency == 0 {
            anyhow::bail!("embedding.concurrency must be at least 1");
        }
        if self.embedding.dimension == Some(0) {
            anyhow::bail!("embedding.dimension must be positive");
        }
        for (name, value) in [
            ("duplicates.threshold", self.duplicates.threshold),
            ("search.threshold", self.search.threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                anyhow::bail!("{name} must be within [-1, 1], got {value}");
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn ollama(&self) -> OllamaConfig {
        let e = &self.embedding;
        OllamaConfig {
            base_url: e.base_url.clone(),
            model: e.model.clone(),
            dimension: e.dimension,
            request_timeout: Duration::from_secs(e.timeout_secs),
            max_retries: e.max_retries,
            retry_backoff: Duration::from_millis(e.retry_backoff_ms),
            ready_timeout: Duration::from_secs(e.ready_timeout_secs),
            ..OllamaConfig::default()
        }
    }

    #[must_use]
    pub fn indexer(&self) -> IndexerConfig {
        IndexerConfig {
            chunker: ChunkerConfig {
                min_size: self.index.min_chunk_size,
                max_chars: self.index.max_chunk_chars,
            },
            exclude: self.index.exclude.clone(),
            batch_size: self.embedding.batch_size,
            concurrency: self.embedding.concurrency,
        }
    }
}
