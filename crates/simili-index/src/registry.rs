//! Cache of indexers keyed by canonical root path.
//!
//! Callers own the registry; separate registries share nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use simili_embed::EmbeddingProvider;

use crate::duplicates::{DuplicateGroup, DuplicateOptions};
use crate::error::Result;
use crate::indexer::{IncrementalIndexer, IndexOptions, IndexReport, IndexerConfig};
use crate::manifest::IndexManifest;
use crate::persist::index_dir;
use crate::query::{IndexStats, SearchResult};
use crate::tracker::relative_path;

type SharedIndexer<P> = Arc<tokio::sync::Mutex<IncrementalIndexer<P>>>;

struct Entry<P> {
    model: String,
    indexer: SharedIndexer<P>,
}

/// Entry point for indexing and querying source roots.
pub struct IndexRegistry<P> {
    provider: P,
    config: IndexerConfig,
    indexers: Mutex<HashMap<PathBuf, Entry<P>>>,
}

impl<P: EmbeddingProvider + Clone> IndexRegistry<P> {
    #[must_use]
    pub fn new(provider: P, config: IndexerConfig) -> Self {
        Self {
            provider,
            config,
            indexers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Index or re-index `path`. `model` overrides the provider's model for
    /// this root; a model different from the cached indexer's replaces it.
    ///
    /// # Errors
    ///
    /// Propagates indexing errors; see [`IncrementalIndexer::index`].
    pub async fn index_directory(
        &self,
        path: &Path,
        model: Option<&str>,
        options: &IndexOptions,
    ) -> Result<IndexReport> {
        let handle = self.indexer(path, model)?;
        let mut indexer = handle.lock().await;
        let result = indexer.index(options).await;
        if result.as_ref().is_err_and(crate::IndexError::requires_rebuild) {
            indexer.unload();
        }
        result
    }

    /// # Errors
    ///
    /// `NoIndex` if `path` was never indexed, `CorruptIndex` if its documents
    /// cannot be loaded.
    pub async fn find_duplicates(
        &self,
        path: &Path,
        options: &DuplicateOptions,
    ) -> Result<Vec<DuplicateGroup>> {
        let handle = self.loaded(path).await?;
        let indexer = handle.lock().await;
        indexer.find_duplicates(options)
    }

    /// # Errors
    ///
    /// `NoIndex` if `path` was never indexed, `IncompatibleIndex` if it was
    /// built with a different model, or an embedding error.
    pub async fn search_similar(
        &self,
        query: &str,
        path: &Path,
        top: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let handle = self.loaded(path).await?;
        let indexer = handle.lock().await;
        indexer.search_similar(query, top, threshold).await
    }

    /// `file_path` may be absolute or relative to `path`.
    ///
    /// # Errors
    ///
    /// `NoIndex` if `path` was never indexed, `NoChunkAtLocation` if no chunk
    /// spans the line.
    pub async fn find_similar_at_location(
        &self,
        path: &Path,
        file_path: &str,
        line: usize,
        top: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let handle = self.loaded(path).await?;
        let indexer = handle.lock().await;
        let file_path = normalize_file_path(indexer.root(), file_path);
        indexer.find_similar_at_location(&file_path, line, top, threshold)
    }

    /// Whether `path` has a persisted index.
    #[must_use]
    pub fn has_index(&self, path: &Path) -> bool {
        IndexManifest::exists(&index_dir(path))
    }

    /// # Errors
    ///
    /// `NoIndex` if `path` was never indexed.
    pub async fn get_index_stats(&self, path: &Path) -> Result<IndexStats> {
        let handle = self.loaded(path).await?;
        let indexer = handle.lock().await;
        indexer.stats()
    }

    /// Forget every cached indexer.
    pub fn clear(&self) {
        let mut map = self.lock();
        tracing::debug!(evicted = map.len(), "indexer cache cleared");
        map.clear();
    }

    /// Delete the persisted index of `path` and evict it from the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the index directory cannot be removed.
    pub fn delete_index(&self, path: &Path) -> Result<bool> {
        if let Ok(key) = std::fs::canonicalize(path) {
            self.lock().remove(&key);
        }
        let dir = index_dir(path);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)?;
        tracing::info!(dir = %dir.display(), "index deleted");
        Ok(true)
    }

    /// Number of cached indexers.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Entry<P>>> {
        self.indexers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn indexer(&self, path: &Path, model: Option<&str>) -> Result<SharedIndexer<P>> {
        let key = std::fs::canonicalize(path)?;
        let model = model.unwrap_or_else(|| self.provider.model());
        let mut map = self.lock();
        if let Some(entry) = map.get(&key)
            && entry.model == model
        {
            return Ok(Arc::clone(&entry.indexer));
        }

        let provider = if model == self.provider.model() {
            self.provider.clone()
        } else {
            self.provider.with_model(model)
        };
        let indexer: SharedIndexer<P> = Arc::new(tokio::sync::Mutex::new(IncrementalIndexer::new(
            key.clone(),
            provider,
            self.config.clone(),
        )));
        tracing::debug!(root = %key.display(), model, "indexer cached");
        map.insert(
            key,
            Entry {
                model: model.to_owned(),
                indexer: Arc::clone(&indexer),
            },
        );
        Ok(indexer)
    }

    /// Cached indexer with its persisted state loaded. Unloadable entries are
    /// evicted so the next call reads from disk again.
    async fn loaded(&self, path: &Path) -> Result<SharedIndexer<P>> {
        if !self.has_index(path) {
            return Err(crate::IndexError::NoIndex {
                path: index_dir(path),
            });
        }
        let handle = self.indexer(path, None)?;
        let result = handle.lock().await.ensure_loaded();
        if let Err(e) = result {
            if let Ok(key) = std::fs::canonicalize(path) {
                self.lock().remove(&key);
            }
            return Err(e);
        }
        Ok(handle)
    }
}

/// Make `file_path` relative to `root` with forward slashes.
fn normalize_file_path(root: &Path, file_path: &str) -> String {
    let candidate = Path::new(file_path);
    if candidate.is_absolute() {
        let resolved = std::fs::canonicalize(candidate).unwrap_or_else(|_| candidate.to_path_buf());
        if let Some(rel) = relative_path(root, &resolved) {
            return rel;
        }
    }
    file_path
        .trim_start_matches("./")
        .replace('\\', "/")
}
