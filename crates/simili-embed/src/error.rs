use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding service at {url} not ready after {}s", waited.as_secs())]
    Unavailable { url: String, waited: Duration },

    #[error("embedding request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("embedding service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}

impl EmbedError {
    /// Whether the failure is confined to the submitted input(s).
    ///
    /// Input-specific failures are skipped per chunk by the indexer; every
    /// other variant aborts the run.
    #[must_use]
    pub fn is_input_specific(&self) -> bool {
        match self {
            Self::Malformed(_) => true,
            Self::Status { status, .. } => (400..500).contains(status) && *status != 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EmbedError>;
