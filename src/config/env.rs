use std::str::FromStr;

use super::Config;

/// Parse `key` if set; invalid values are ignored with a warning.
fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    match v.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {v}");
            None
        }
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SIMILI_EMBEDDING_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("SIMILI_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(dimension) = parsed("SIMILI_EMBEDDING_DIMENSION") {
            self.embedding.dimension = Some(dimension);
        }
        if let Some(size) = parsed("SIMILI_EMBEDDING_BATCH_SIZE") {
            self.embedding.batch_size = size;
        }
        if let Some(n) = parsed("SIMILI_EMBEDDING_CONCURRENCY") {
            self.embedding.concurrency = n;
        }
        if let Some(n) = parsed("SIMILI_EMBEDDING_MAX_RETRIES") {
            self.embedding.max_retries = n;
        }
        if let Some(threshold) = parsed("SIMILI_DUPLICATES_THRESHOLD") {
            self.duplicates.threshold = threshold;
        }
        if let Some(size) = parsed("SIMILI_DUPLICATES_MIN_GROUP_SIZE") {
            self.duplicates.min_group_size = size;
        }
        if let Some(top) = parsed("SIMILI_SEARCH_TOP") {
            self.search.top = top;
        }
        if let Some(threshold) = parsed("SIMILI_SEARCH_THRESHOLD") {
            self.search.threshold = threshold;
        }
    }
}
