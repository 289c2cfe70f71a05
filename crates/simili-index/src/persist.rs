//! On-disk layout of an index and JSON document helpers.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{IndexError, Result};

/// Directory under the indexed root that holds all index documents.
pub const INDEX_DIR: &str = ".simili";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const VECTORS_FILE: &str = "vectors.json";
pub const FILES_FILE: &str = "files.json";

/// Index directory for a source root.
#[must_use]
pub fn index_dir(root: &Path) -> PathBuf {
    root.join(INDEX_DIR)
}

/// Read a JSON document.
///
/// A missing file is `NoIndex`; unparsable content is `CorruptIndex`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexError::NoIndex {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes).map_err(|e| IndexError::CorruptIndex {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write a pretty-printed JSON document through a temp file and rename.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
