//! File tracker: content-hash snapshots of a source tree and their diff.

use std::collections::BTreeMap;
use std::path::Path;

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;

use crate::error::Result;
use crate::languages::is_indexable;
use crate::persist::{FILES_FILE, read_json, write_json};

/// Relative path (forward slashes) to blake3 hex of the file bytes.
pub type FileSnapshot = BTreeMap<String, String>;

/// Exclude globs applied when none are configured.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "node_modules",
    "dist",
    "build",
    "coverage",
    "*.min.js",
    "*.d.ts",
];

/// Partition of paths between two snapshots. Every list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl FileDiff {
    /// Whether any file was added, modified or deleted.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }

    /// Added and modified paths, sorted.
    #[must_use]
    pub fn to_process(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .added
            .iter()
            .chain(&self.modified)
            .cloned()
            .collect();
        paths.sort();
        paths
    }
}

/// Classify every path of `current` and `previous`.
#[must_use]
pub fn diff(current: &FileSnapshot, previous: &FileSnapshot) -> FileDiff {
    let mut result = FileDiff::default();
    for (path, hash) in current {
        match previous.get(path) {
            None => result.added.push(path.clone()),
            Some(old) if old != hash => result.modified.push(path.clone()),
            Some(_) => result.unchanged.push(path.clone()),
        }
    }
    result.deleted = previous
        .keys()
        .filter(|p| !current.contains_key(*p))
        .cloned()
        .collect();
    result
}

/// Blake3 hex of raw file content. Independent of mtime and permissions.
#[must_use]
pub fn hash_content(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Walk `root` and hash every indexable source file.
///
/// Hidden entries (including the index directory) are skipped and
/// `.gitignore` is honored. `exclude` holds gitignore-style globs.
///
/// # Errors
///
/// Returns an error if an exclude glob is invalid.
pub fn scan(root: &Path, exclude: &[String]) -> Result<FileSnapshot> {
    let mut overrides = OverrideBuilder::new(root);
    for pattern in exclude {
        overrides.add(&format!("!{pattern}"))?;
    }
    let overrides = overrides.build()?;

    let mut snapshot = FileSnapshot::new();
    for entry in WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .overrides(overrides)
        .build()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) || !is_indexable(entry.path()) {
            continue;
        }
        let Some(rel) = relative_path(root, entry.path()) else {
            continue;
        };
        match std::fs::read(entry.path()) {
            Ok(bytes) => {
                snapshot.insert(rel, hash_content(&bytes));
            }
            Err(e) => tracing::warn!(file = %rel, "skipping unreadable file: {e}"),
        }
    }
    Ok(snapshot)
}

/// `path` relative to `root`, joined with `/` on every platform.
#[must_use]
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Last-seen content hash per tracked file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTracker {
    hashes: FileSnapshot,
}

impl FileTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `files.json` from an index directory.
    ///
    /// # Errors
    ///
    /// `NoIndex` if the document is missing, `CorruptIndex` if unparsable.
    pub fn load(index_dir: &Path) -> Result<Self> {
        let hashes = read_json(&index_dir.join(FILES_FILE))?;
        Ok(Self { hashes })
    }

    /// Persist to `files.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub fn save(&self, index_dir: &Path) -> Result<()> {
        write_json(&index_dir.join(FILES_FILE), &self.hashes)
    }

    #[must_use]
    pub fn diff(&self, current: &FileSnapshot) -> FileDiff {
        diff(current, &self.hashes)
    }

    pub fn record(&mut self, path: &str, hash: &str) {
        self.hashes.insert(path.to_owned(), hash.to_owned());
    }

    pub fn forget(&mut self, path: &str) -> Option<String> {
        self.hashes.remove(path)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.hashes.get(path).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.hashes.keys().map(String::as_str)
    }
}
