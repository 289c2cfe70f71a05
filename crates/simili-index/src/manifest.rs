//! Index manifest: format version, embedding configuration and counts.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::persist::{MANIFEST_FILE, read_json, write_json};

/// Bumped whenever the persisted layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub model: String,
    pub dimension: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub file_count: usize,
}

impl IndexManifest {
    #[must_use]
    pub fn new(model: &str, dimension: Option<usize>) -> Self {
        let now = Utc::now();
        Self {
            version: FORMAT_VERSION,
            model: model.to_owned(),
            dimension,
            created_at: now,
            updated_at: now,
            chunk_count: 0,
            file_count: 0,
        }
    }

    /// Load `manifest.json` from an index directory.
    ///
    /// # Errors
    ///
    /// `NoIndex` if missing, `CorruptIndex` if unparsable.
    pub fn load(index_dir: &Path) -> Result<Self> {
        read_json(&index_dir.join(MANIFEST_FILE))
    }

    /// Persist to `manifest.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub fn save(&self, index_dir: &Path) -> Result<()> {
        write_json(&index_dir.join(MANIFEST_FILE), self)
    }

    #[must_use]
    pub fn exists(index_dir: &Path) -> bool {
        index_dir.join(MANIFEST_FILE).is_file()
    }

    /// Check that this index can be extended with `model` producing vectors
    /// of `dimension` (when declared).
    ///
    /// # Errors
    ///
    /// `IncompatibleIndex` on a version or model mismatch,
    /// `DimensionMismatch` when both dimensions are known and differ.
    pub fn check_compatible(&self, model: &str, dimension: Option<usize>) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(IndexError::IncompatibleIndex(format!(
                "index format version {} (expected {FORMAT_VERSION})",
                self.version
            )));
        }
        if self.model != model {
            return Err(IndexError::IncompatibleIndex(format!(
                "index built with model {}, configured model is {model}",
                self.model
            )));
        }
        if let (Some(expected), Some(actual)) = (self.dimension, dimension)
            && expected != actual
        {
            return Err(IndexError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    /// Check the recorded counts against the loaded stores.
    ///
    /// # Errors
    ///
    /// `CorruptIndex` when either count disagrees.
    pub fn check_counts(&self, index_dir: &Path, chunks: usize, files: usize) -> Result<()> {
        if self.chunk_count != chunks || self.file_count != files {
            return Err(IndexError::CorruptIndex {
                path: index_dir.join(MANIFEST_FILE),
                reason: format!(
                    "manifest records {} chunks in {} files, stores hold {chunks} chunks in {files} files",
                    self.chunk_count, self.file_count
                ),
            });
        }
        Ok(())
    }
}
