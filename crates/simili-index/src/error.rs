//! Error types for simili-index.

use std::path::PathBuf;

/// Errors that can occur while indexing or querying a code index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading sources or index documents.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error while writing index documents.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedding backend failure that aborts the run.
    #[error("embedding error: {0}")]
    Embed(#[from] simili_embed::EmbedError),

    /// Directory walk error.
    #[error("walk error: {0}")]
    Walk(#[from] ignore::Error),

    /// Tree-sitter parsing error.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Unsupported or unrecognized language.
    #[error("unsupported language")]
    UnsupportedLanguage,

    /// Nothing has been indexed at this path yet.
    #[error("no index at {}", path.display())]
    NoIndex { path: PathBuf },

    /// A persisted document exists but cannot be trusted.
    #[error("corrupt index document {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    /// The persisted index was built with a different configuration.
    #[error("incompatible index: {0}")]
    IncompatibleIndex(String),

    /// A vector does not match the index dimension.
    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No indexed chunk spans the requested location.
    #[error("no chunk at {file_path}:{line}")]
    NoChunkAtLocation { file_path: String, line: usize },

    /// The run was cancelled before persisting.
    #[error("indexing cancelled")]
    Cancelled,

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Whether this error means no index has been built yet.
    #[must_use]
    pub fn is_no_index(&self) -> bool {
        matches!(self, Self::NoIndex { .. })
    }

    /// Whether the persisted state is unusable with the current configuration
    /// and only a forced rebuild can recover.
    #[must_use]
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Self::CorruptIndex { .. } | Self::IncompatibleIndex(_) | Self::DimensionMismatch { .. }
        )
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
