//! Incremental indexing orchestrator: scan → diff → chunk → embed → persist.
//!
//! A run works on a copy of the loaded state and swaps it in only after every
//! document has been written, so a failed, cancelled or dropped run leaves both
//! the in-memory and the on-disk index as they were.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use simili_embed::{EmbedError, EmbeddingProvider};
use tokio_util::sync::CancellationToken;

use crate::chunker::{ChunkerConfig, CodeChunk, chunk_file};
use crate::error::{IndexError, Result};
use crate::languages::detect_language;
use crate::manifest::IndexManifest;
use crate::metadata_store::{MetadataStore, StoredChunk};
use crate::persist::index_dir;
use crate::tracker::{DEFAULT_EXCLUDES, FileTracker, hash_content, scan};
use crate::vector_store::{FlatVectorStore, VectorIndex};

/// Recorded for files whose chunks did not all embed; never equals a real
/// content hash, so the next run re-examines the file.
const PENDING_HASH: &str = "";

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Gitignore-style globs excluded from every run.
    pub exclude: Vec<String>,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Embedding requests in flight at once.
    pub concurrency: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            exclude: DEFAULT_EXCLUDES.iter().map(|s| (*s).to_owned()).collect(),
            batch_size: 16,
            concurrency: 4,
        }
    }
}

/// Pipeline phase, reported through progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Scanning,
    Diffing,
    Chunking,
    Embedding,
    Persisting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexProgress {
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
    pub file: Option<String>,
}

pub type ProgressFn = Arc<dyn Fn(&IndexProgress) + Send + Sync>;

/// Per-run options.
#[derive(Clone, Default)]
pub struct IndexOptions {
    /// Discard any persisted state and rebuild from scratch.
    pub force: bool,
    /// Extra exclude globs on top of the configured ones.
    pub exclude: Vec<String>,
    pub cancel: Option<CancellationToken>,
    pub on_progress: Option<ProgressFn>,
}

impl fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexOptions")
            .field("force", &self.force)
            .field("exclude", &self.exclude)
            .field("cancel", &self.cancel.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedChunk {
    pub id: String,
    pub file_path: String,
    pub reason: String,
}

/// Summary of an indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub files_unchanged: usize,
    pub total_chunks: usize,
    pub total_files: usize,
    pub chunks_embedded: usize,
    pub chunks_reused: usize,
    pub chunks_removed: usize,
    pub skipped_files: Vec<SkippedFile>,
    pub failed_chunks: Vec<FailedChunk>,
    /// The persisted index was discarded and rebuilt.
    pub rebuilt: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct IndexState {
    pub(crate) manifest: Option<IndexManifest>,
    pub(crate) metadata: MetadataStore,
    pub(crate) vectors: FlatVectorStore,
    pub(crate) files: FileTracker,
}

impl IndexState {
    fn empty(dimension: Option<usize>) -> Self {
        Self {
            manifest: None,
            metadata: MetadataStore::new(),
            vectors: dimension.map_or_else(FlatVectorStore::new, FlatVectorStore::with_dimension),
            files: FileTracker::new(),
        }
    }

    /// Read every document and check that they agree with each other.
    fn read(index_dir: &Path) -> Result<Self> {
        let manifest = IndexManifest::load(index_dir)?;
        Self::read_stores(index_dir, manifest)
    }

    /// Read the stores behind an already loaded `manifest`.
    fn read_stores(index_dir: &Path, manifest: IndexManifest) -> Result<Self> {
        let metadata = required(index_dir, MetadataStore::load(index_dir))?;
        let vectors = required(index_dir, FlatVectorStore::load(index_dir))?;
        let files = required(index_dir, FileTracker::load(index_dir))?;

        let corrupt = |reason: String| IndexError::CorruptIndex {
            path: index_dir.to_path_buf(),
            reason,
        };

        if let Some(id) = metadata.ids().find(|id| !vectors.contains(id)) {
            return Err(corrupt(format!("chunk {id} has metadata but no vector")));
        }
        if metadata.len() != vectors.len() {
            return Err(corrupt(format!(
                "{} metadata entries but {} vectors",
                metadata.len(),
                vectors.len()
            )));
        }
        if let (Some(expected), Some(actual)) = (manifest.dimension, vectors.dimension())
            && expected != actual
        {
            return Err(corrupt(format!(
                "manifest dimension {expected}, vector store dimension {actual}"
            )));
        }
        manifest.check_counts(index_dir, metadata.len(), files.len())?;

        Ok(Self {
            manifest: Some(manifest),
            metadata,
            vectors,
            files,
        })
    }

    fn write(&self, index_dir: &Path, manifest: &IndexManifest) -> Result<()> {
        std::fs::create_dir_all(index_dir)?;
        self.metadata.save(index_dir)?;
        self.vectors.save(index_dir)?;
        self.files.save(index_dir)?;
        manifest.save(index_dir)
    }
}

/// Once the manifest exists, a missing companion document is corruption.
fn required<T>(index_dir: &Path, loaded: Result<T>) -> Result<T> {
    loaded.map_err(|e| match e {
        IndexError::NoIndex { path } => IndexError::CorruptIndex {
            path,
            reason: format!("missing from {}", index_dir.display()),
        },
        other => other,
    })
}

enum Decision {
    /// Same id, same content: vector stays.
    Keep,
    /// Content seen elsewhere in the index: copy its vector.
    Reuse(Vec<f32>),
    Embed,
}

impl Decision {
    fn label(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Reuse(_) => "reuse",
            Self::Embed => "embed",
        }
    }
}

struct FilePlan {
    path: String,
    hash: String,
    chunks: Vec<(CodeChunk, Decision)>,
}

#[derive(Default)]
struct EmbedOutcome {
    vectors: HashMap<String, Vec<f32>>,
    failures: HashMap<String, String>,
}

/// Orchestrates incremental indexing of one source root.
pub struct IncrementalIndexer<P> {
    root: PathBuf,
    index_dir: PathBuf,
    provider: P,
    config: IndexerConfig,
    pub(crate) state: IndexState,
    loaded: bool,
    phase: Phase,
}

impl<P: EmbeddingProvider> IncrementalIndexer<P> {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, provider: P, config: IndexerConfig) -> Self {
        let root = root.into();
        let dimension = provider.dimension();
        Self {
            index_dir: index_dir(&root),
            root,
            provider,
            config,
            state: IndexState::empty(dimension),
            loaded: false,
            phase: Phase::Idle,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn manifest(&self) -> Option<&IndexManifest> {
        self.state.manifest.as_ref()
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.state.metadata
    }

    #[must_use]
    pub fn vectors(&self) -> &FlatVectorStore {
        &self.state.vectors
    }

    #[must_use]
    pub fn files(&self) -> &FileTracker {
        &self.state.files
    }

    /// Whether an index exists in memory or on disk.
    #[must_use]
    pub fn has_index(&self) -> bool {
        self.state.manifest.is_some() || IndexManifest::exists(&self.index_dir)
    }

    /// Load the persisted index once, for queries.
    ///
    /// # Errors
    ///
    /// `NoIndex` if nothing was persisted yet, `CorruptIndex` if the
    /// documents are unreadable or disagree with each other.
    pub fn ensure_loaded(&mut self) -> Result<()> {
        if !self.loaded {
            self.state = IndexState::read(&self.index_dir)?;
            self.loaded = true;
        }
        Ok(())
    }

    /// Drop the in-memory state; the next query or run reloads from disk.
    pub fn unload(&mut self) {
        self.state = IndexState::empty(self.provider.dimension());
        self.loaded = false;
    }

    /// Bring the index up to date with the source tree.
    ///
    /// # Errors
    ///
    /// Returns an error on corrupt persisted state (unless `force`), dimension
    /// mismatch, embedding service failure after retries, cancellation, or
    /// filesystem failure. On error nothing is persisted or swapped in.
    pub async fn index(&mut self, options: &IndexOptions) -> Result<IndexReport> {
        let result = self.run(options).await;
        self.phase = match &result {
            Ok(_) | Err(IndexError::Cancelled) => Phase::Idle,
            Err(_) => Phase::Failed,
        };
        if let Err(e) = &result {
            tracing::warn!(root = %self.root.display(), "indexing failed: {e}");
        }
        result
    }

    async fn run(&mut self, options: &IndexOptions) -> Result<IndexReport> {
        let start = Instant::now();
        let mut report = IndexReport::default();

        let (base, rebuilt) = self.prepare(options.force)?;
        report.rebuilt = rebuilt;
        let mut state = base.clone();

        check_cancelled(options)?;
        self.set_phase(options, Phase::Scanning, 0, 0, None);
        let mut exclude = self.config.exclude.clone();
        exclude.extend(options.exclude.iter().cloned());
        let scan_root = self.root.clone();
        let snapshot = tokio::task::spawn_blocking(move || scan(&scan_root, &exclude))
            .await
            .map_err(|e| IndexError::Other(format!("scan task failed: {e}")))??;

        self.set_phase(options, Phase::Diffing, 0, snapshot.len(), None);
        let diff = state.files.diff(&snapshot);
        report.files_added = diff.added.len();
        report.files_modified = diff.modified.len();
        report.files_deleted = diff.deleted.len();
        report.files_unchanged = diff.unchanged.len();
        tracing::info!(
            root = %self.root.display(),
            added = report.files_added,
            modified = report.files_modified,
            deleted = report.files_deleted,
            unchanged = report.files_unchanged,
            "indexing started"
        );

        if !diff.has_changes() && !rebuilt && state.manifest.is_some() {
            report.total_chunks = state.metadata.len();
            report.total_files = state.files.len();
            report.duration_ms = elapsed_ms(start);
            self.state = state;
            self.loaded = true;
            tracing::info!("index up to date");
            return Ok(report);
        }

        for path in &diff.deleted {
            let mut removed = state.metadata.remove_file(path);
            removed.extend(state.vectors.remove_by_file_prefix(path));
            removed.sort();
            removed.dedup();
            state.files.forget(path);
            tracing::debug!(file = %path, removed = removed.len(), "file deleted");
            report.chunks_removed += removed.len();
        }

        let to_process = diff.to_process();
        let total = to_process.len();
        let mut plans = Vec::with_capacity(total);
        let mut queue: Vec<(String, String)> = Vec::new();
        let mut queued: HashSet<String> = HashSet::new();

        for (i, path) in to_process.into_iter().enumerate() {
            check_cancelled(options)?;
            self.set_phase(options, Phase::Chunking, i + 1, total, Some(&path));

            let (hash, chunks) = self.chunk_path(&path, &mut report).await;

            let mut planned = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let decision = decide(&state, &base, &chunk);
                if matches!(decision, Decision::Embed) && queued.insert(chunk.content_hash.clone())
                {
                    queue.push((chunk.content_hash.clone(), chunk.text.clone()));
                }
                tracing::debug!(id = %chunk.id, decision = decision.label(), "chunk planned");
                planned.push((chunk, decision));
            }

            // Old entries not kept as-is go now, so a chunk that fails to
            // re-embed is missing rather than stale.
            let keep: HashSet<&str> = planned
                .iter()
                .filter(|(_, d)| matches!(d, Decision::Keep))
                .map(|(c, _)| c.id.as_str())
                .collect();
            let new_ids: HashSet<&str> = planned.iter().map(|(c, _)| c.id.as_str()).collect();
            let stale: Vec<String> = state
                .metadata
                .by_file_path(&path)
                .into_iter()
                .map(|c| c.id.clone())
                .filter(|id| !keep.contains(id.as_str()))
                .collect();
            for id in &stale {
                state.metadata.remove(id);
                state.vectors.remove(id);
                if !new_ids.contains(id.as_str()) {
                    report.chunks_removed += 1;
                }
            }

            tracing::info!(
                file = %path,
                progress = format_args!("{}/{total}", i + 1),
                chunks = planned.len(),
                "file chunked"
            );
            plans.push(FilePlan {
                path,
                hash,
                chunks: planned,
            });
        }

        check_cancelled(options)?;
        self.phase = Phase::Embedding;
        let outcome = self.embed_queue(&queue, options).await?;

        for plan in plans {
            let mut complete = true;
            for (chunk, decision) in plan.chunks {
                match decision {
                    Decision::Keep => {}
                    Decision::Reuse(vector) => {
                        state.vectors.upsert(&chunk.id, vector)?;
                        report.chunks_reused += 1;
                    }
                    Decision::Embed => {
                        if let Some(vector) = outcome.vectors.get(&chunk.content_hash) {
                            state.vectors.upsert(&chunk.id, vector.clone())?;
                            report.chunks_embedded += 1;
                        } else {
                            complete = false;
                            let reason = outcome
                                .failures
                                .get(&chunk.content_hash)
                                .cloned()
                                .unwrap_or_else(|| "not embedded".to_owned());
                            tracing::warn!(id = %chunk.id, "chunk not embedded: {reason}");
                            report.failed_chunks.push(FailedChunk {
                                id: chunk.id,
                                file_path: chunk.file_path,
                                reason,
                            });
                            continue;
                        }
                    }
                }
                state.metadata.set(StoredChunk::from(&chunk));
            }
            let recorded = if complete { plan.hash.as_str() } else { PENDING_HASH };
            state.files.record(&plan.path, recorded);
        }

        check_cancelled(options)?;
        self.set_phase(options, Phase::Persisting, 0, 0, None);
        let manifest = self.next_manifest(&state, rebuilt);
        debug_assert_eq!(state.metadata.len(), state.vectors.len());
        let index_dir = self.index_dir.clone();
        let (mut state, manifest) = tokio::task::spawn_blocking(move || {
            state.write(&index_dir, &manifest).map(|()| (state, manifest))
        })
        .await
        .map_err(|e| IndexError::Other(format!("persist task failed: {e}")))??;
        state.manifest = Some(manifest);

        report.total_chunks = state.metadata.len();
        report.total_files = state.files.len();
        report.duration_ms = elapsed_ms(start);
        self.state = state;
        self.loaded = true;

        tracing::info!(
            total_chunks = report.total_chunks,
            embedded = report.chunks_embedded,
            reused = report.chunks_reused,
            removed = report.chunks_removed,
            failed = report.failed_chunks.len(),
            skipped = report.skipped_files.len(),
            duration_ms = report.duration_ms,
            "indexing complete"
        );
        Ok(report)
    }

    /// Starting state for a run and whether it is a rebuild.
    fn prepare(&self, force: bool) -> Result<(IndexState, bool)> {
        let empty = || IndexState::empty(self.provider.dimension());
        if force {
            tracing::info!(root = %self.root.display(), "forced rebuild");
            return Ok((empty(), IndexManifest::exists(&self.index_dir)));
        }

        // The manifest is checked before the stores are read: an
        // incompatible index may use a layout this version cannot parse.
        let manifest = if self.loaded {
            self.state.manifest.clone()
        } else {
            match IndexManifest::load(&self.index_dir) {
                Ok(manifest) => Some(manifest),
                Err(e) if e.is_no_index() => None,
                Err(e) => return Err(e),
            }
        };
        let Some(manifest) = manifest else {
            return Ok((empty(), false));
        };
        match manifest.check_compatible(self.provider.model(), self.provider.dimension()) {
            Ok(()) => {}
            Err(IndexError::IncompatibleIndex(reason)) => {
                tracing::warn!(root = %self.root.display(), "rebuilding index: {reason}");
                return Ok((empty(), true));
            }
            Err(e) => return Err(e),
        }

        let base = if self.loaded {
            self.state.clone()
        } else {
            IndexState::read_stores(&self.index_dir, manifest)?
        };
        Ok((base, false))
    }

    /// Read and chunk one file. Unreadable or unparsable files yield no
    /// chunks and are reported as skipped.
    async fn chunk_path(&self, path: &str, report: &mut IndexReport) -> (String, Vec<CodeChunk>) {
        let abs = self.root.join(path);
        let bytes = match tokio::fs::read(&abs).await {
            Ok(bytes) => bytes,
            Err(e) => {
                skip(report, path, format!("read failed: {e}"));
                return (PENDING_HASH.to_owned(), Vec::new());
            }
        };
        let hash = hash_content(&bytes);

        let Some(lang) = detect_language(&abs) else {
            skip(report, path, IndexError::UnsupportedLanguage.to_string());
            return (hash, Vec::new());
        };
        let source = match String::from_utf8(bytes) {
            Ok(source) => source,
            Err(e) => {
                skip(report, path, format!("not valid UTF-8: {e}"));
                return (hash, Vec::new());
            }
        };
        match chunk_file(&source, path, lang, &self.config.chunker) {
            Ok(chunks) => (hash, chunks),
            Err(e) => {
                skip(report, path, e.to_string());
                (hash, Vec::new())
            }
        }
    }

    /// Embed `(content_hash, text)` pairs in batches with bounded fan-out.
    ///
    /// A batch rejected for input-specific reasons is retried item by item;
    /// items that still fail are recorded as failures. Any other error aborts.
    async fn embed_queue(
        &self,
        queue: &[(String, String)],
        options: &IndexOptions,
    ) -> Result<EmbedOutcome> {
        let mut outcome = EmbedOutcome::default();
        if queue.is_empty() {
            return Ok(outcome);
        }

        let batches: Vec<&[(String, String)]> =
            queue.chunks(self.config.batch_size.max(1)).collect();
        let total = batches.len();
        tracing::info!(
            provider = self.provider.name(),
            model = self.provider.model(),
            texts = queue.len(),
            batches = total,
            "embedding"
        );
        emit_progress(options, Phase::Embedding, 0, total, None);

        let provider = &self.provider;
        let mut responses = futures::stream::iter(batches)
            .map(|batch| async move {
                let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
                (batch, provider.embed_batch(&texts).await)
            })
            .buffer_unordered(self.config.concurrency.max(1));

        let mut done = 0;
        while let Some((batch, result)) = responses.next().await {
            check_cancelled(options)?;
            let rejected = match result {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for ((hash, _), vector) in batch.iter().zip(vectors) {
                        outcome.vectors.insert(hash.clone(), vector);
                    }
                    None
                }
                Ok(vectors) => Some(EmbedError::Malformed(format!(
                    "{} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                ))),
                Err(e) if e.is_input_specific() => Some(e),
                Err(e) => return Err(embed_error(e)),
            };
            if let Some(e) = rejected {
                tracing::warn!(size = batch.len(), "batch rejected, embedding items one by one: {e}");
                for (hash, text) in batch {
                    match provider.embed(text).await {
                        Ok(vector) => {
                            outcome.vectors.insert(hash.clone(), vector);
                        }
                        Err(e) if e.is_input_specific() => {
                            outcome.failures.insert(hash.clone(), e.to_string());
                        }
                        Err(e) => return Err(embed_error(e)),
                    }
                }
            }
            done += 1;
            emit_progress(options, Phase::Embedding, done, total, None);
        }
        Ok(outcome)
    }

    fn next_manifest(&self, state: &IndexState, rebuilt: bool) -> IndexManifest {
        let dimension = state.vectors.dimension().or(self.provider.dimension());
        let mut manifest = match &state.manifest {
            Some(previous) if !rebuilt => previous.clone(),
            _ => IndexManifest::new(self.provider.model(), dimension),
        };
        manifest.model = self.provider.model().to_owned();
        manifest.dimension = dimension;
        manifest.updated_at = Utc::now();
        manifest.chunk_count = state.metadata.len();
        manifest.file_count = state.files.len();
        manifest
    }

    fn set_phase(
        &mut self,
        options: &IndexOptions,
        phase: Phase,
        current: usize,
        total: usize,
        file: Option<&str>,
    ) {
        self.phase = phase;
        emit_progress(options, phase, current, total, file);
    }
}

/// `base` is the state the run started from; it is empty on a rebuild.
fn decide(state: &IndexState, base: &IndexState, chunk: &CodeChunk) -> Decision {
    if state
        .metadata
        .get(&chunk.id)
        .is_some_and(|old| old.content_hash == chunk.content_hash)
        && state.vectors.contains(&chunk.id)
    {
        return Decision::Keep;
    }
    if let Some(vector) = base
            .metadata
            .by_content_hash(&chunk.content_hash)
            .and_then(|same| base.vectors.get(&same.id))
    {
        return Decision::Reuse(vector.to_vec());
    }
    Decision::Embed
}

fn embed_error(e: EmbedError) -> IndexError {
    match e {
        EmbedError::DimensionMismatch { expected, actual } => {
            IndexError::DimensionMismatch { expected, actual }
        }
        other => IndexError::Embed(other),
    }
}

fn skip(report: &mut IndexReport, path: &str, reason: String) {
    tracing::warn!(file = %path, "skipping file: {reason}");
    report.skipped_files.push(SkippedFile {
        path: path.to_owned(),
        reason,
    });
}

fn check_cancelled(options: &IndexOptions) -> Result<()> {
    if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
        return Err(IndexError::Cancelled);
    }
    Ok(())
}

fn emit_progress(
    options: &IndexOptions,
    phase: Phase,
    current: usize,
    total: usize,
    file: Option<&str>,
) {
    if let Some(callback) = &options.on_progress {
        callback(&IndexProgress {
            phase,
            current,
            total,
            file: file.map(str::to_owned),
        });
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
