use serde::{Deserialize, Serialize};
use simili_index::tracker::DEFAULT_EXCLUDES;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub duplicates: DuplicatesConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "nomic-embed-text".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_ready_timeout_secs() -> u64 {
    20
}

fn default_batch_size() -> usize {
    16
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            dimension: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_exclude() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|s| (*s).to_owned()).collect()
}

fn default_min_chunk_size() -> usize {
    50
}

fn default_max_chunk_chars() -> usize {
    6000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            exclude: default_exclude(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

fn default_duplicate_threshold() -> f32 {
    0.85
}

fn default_min_group_size() -> usize {
    2
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DuplicatesConfig {
    #[serde(default = "default_duplicate_threshold")]
    pub threshold: f32,
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
}

impl Default for DuplicatesConfig {
    fn default() -> Self {
        Self {
            threshold: default_duplicate_threshold(),
            min_group_size: default_min_group_size(),
        }
    }
}

fn default_top() -> usize {
    10
}

fn default_search_threshold() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_top")]
    pub top: usize,
    #[serde(default = "default_search_threshold")]
    pub threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top: default_top(),
            threshold: default_search_threshold(),
        }
    }
}
