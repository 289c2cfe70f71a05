//! Read-only queries over a loaded index.

use std::collections::BTreeMap;

use serde::Serialize;
use simili_embed::{EmbedError, EmbeddingProvider};

use crate::chunker::ChunkKind;
use crate::duplicates::{DuplicateGroup, DuplicateOptions, find_duplicate_groups};
use crate::error::{IndexError, Result};
use crate::indexer::IncrementalIndexer;
use crate::manifest::IndexManifest;
use crate::metadata_store::{MetadataStore, StoredChunk};
use crate::vector_store::VectorIndex;

/// Lines of chunk text carried in a search result.
pub const PREVIEW_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub kind: ChunkKind,
    pub name: Option<String>,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub preview: String,
}

impl SearchResult {
    fn new(chunk: &StoredChunk, score: f32) -> Self {
        Self {
            id: chunk.id.clone(),
            score,
            kind: chunk.kind,
            name: chunk.name.clone(),
            file_path: chunk.file_path.clone(),
            start_line: chunk.span.start_line,
            end_line: chunk.span.end_line,
            preview: chunk.preview(PREVIEW_LINES),
        }
    }
}

/// Manifest summary for `stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub manifest: IndexManifest,
    pub chunks_by_kind: BTreeMap<ChunkKind, usize>,
    pub files: usize,
}

/// Nearest chunks to `vector`, best first, skipping `exclude`.
#[must_use]
pub fn similar_to_vector(
    metadata: &MetadataStore,
    vectors: &dyn VectorIndex,
    vector: &[f32],
    top: usize,
    threshold: f32,
    exclude: Option<&str>,
) -> Vec<SearchResult> {
    let k = top.saturating_add(usize::from(exclude.is_some()));
    vectors
        .query(vector, k, threshold)
        .into_iter()
        .filter(|hit| exclude != Some(hit.id.as_str()))
        .filter_map(|hit| metadata.get(&hit.id).map(|c| SearchResult::new(c, hit.score)))
        .take(top)
        .collect()
}

/// Embed `text` and return the nearest chunks.
///
/// # Errors
///
/// Returns an error if embedding fails or the query vector does not match the
/// index dimension.
pub async fn find_similar_to_query<P: EmbeddingProvider>(
    provider: &P,
    metadata: &MetadataStore,
    vectors: &dyn VectorIndex,
    text: &str,
    top: usize,
    threshold: f32,
) -> Result<Vec<SearchResult>> {
    let vector = provider.embed(text).await.map_err(|e| match e {
        EmbedError::DimensionMismatch { expected, actual } => {
            IndexError::DimensionMismatch { expected, actual }
        }
        other => IndexError::Embed(other),
    })?;
    if let Some(expected) = vectors.dimension()
        && expected != vector.len()
    {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(similar_to_vector(metadata, vectors, &vector, top, threshold, None))
}

/// Nearest chunks to the chunk covering `file_path:line`, excluding itself.
///
/// # Errors
///
/// `NoChunkAtLocation` if no indexed chunk spans that line.
pub fn find_similar_to_location(
    metadata: &MetadataStore,
    vectors: &dyn VectorIndex,
    file_path: &str,
    line: usize,
    top: usize,
    threshold: f32,
) -> Result<Vec<SearchResult>> {
    let not_found = || IndexError::NoChunkAtLocation {
        file_path: file_path.to_owned(),
        line,
    };
    let chunk = metadata.at_location(file_path, line).ok_or_else(not_found)?;
    let vector = vectors.get(&chunk.id).ok_or_else(not_found)?;
    Ok(similar_to_vector(
        metadata,
        vectors,
        vector,
        top,
        threshold,
        Some(&chunk.id),
    ))
}

impl<P: EmbeddingProvider> IncrementalIndexer<P> {
    fn require_manifest(&self) -> Result<&IndexManifest> {
        self.manifest().ok_or_else(|| IndexError::NoIndex {
            path: self.index_dir().to_path_buf(),
        })
    }

    /// # Errors
    ///
    /// `NoIndex` if nothing has been indexed or loaded.
    pub fn find_duplicates(&self, options: &DuplicateOptions) -> Result<Vec<DuplicateGroup>> {
        self.require_manifest()?;
        Ok(find_duplicate_groups(self.metadata(), self.vectors(), options))
    }

    /// # Errors
    ///
    /// `NoIndex` if nothing has been indexed or loaded, `IncompatibleIndex`
    /// if the index was built with another model, or an embedding error.
    pub async fn search_similar(
        &self,
        query: &str,
        top: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let manifest = self.require_manifest()?;
        if manifest.model != self.provider().model() {
            return Err(IndexError::IncompatibleIndex(format!(
                "index built with model {}, query model is {}",
                manifest.model,
                self.provider().model()
            )));
        }
        find_similar_to_query(
            self.provider(),
            self.metadata(),
            self.vectors(),
            query,
            top,
            threshold,
        )
        .await
    }

    /// # Errors
    ///
    /// `NoIndex` if nothing has been indexed or loaded, `NoChunkAtLocation`
    /// if no chunk spans the line.
    pub fn find_similar_at_location(
        &self,
        file_path: &str,
        line: usize,
        top: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        self.require_manifest()?;
        find_similar_to_location(
            self.metadata(),
            self.vectors(),
            file_path,
            line,
            top,
            threshold,
        )
    }

    /// # Errors
    ///
    /// `NoIndex` if nothing has been indexed or loaded.
    pub fn stats(&self) -> Result<IndexStats> {
        let manifest = self.require_manifest()?.clone();
        let mut chunks_by_kind = BTreeMap::new();
        for chunk in self.metadata().iter() {
            *chunks_by_kind.entry(chunk.kind).or_insert(0) += 1;
        }
        Ok(IndexStats {
            manifest,
            chunks_by_kind,
            files: self.files().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use simili_embed::MockEmbedder;

    use super::*;
    use crate::chunker::{ChunkFacts, Span};
    use crate::indexer::IndexerConfig;
    use crate::languages::Lang;
    use crate::vector_store::FlatVectorStore;

    fn stored(id: &str, file: &str, lines: (usize, usize)) -> StoredChunk {
        StoredChunk {
            id: id.to_owned(),
            kind: ChunkKind::Function,
            name: Some(id.to_owned()),
            file_path: file.to_owned(),
            language: Lang::JavaScript,
            scope: String::new(),
            span: Span {
                start_line: lines.0,
                start_column: 1,
                end_line: lines.1,
                end_column: 1,
            },
            content_hash: id.to_owned(),
            text: (1..=8).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n"),
            facts: ChunkFacts::default(),
        }
    }

    fn fixture() -> (MetadataStore, FlatVectorStore) {
        let mut metadata = MetadataStore::new();
        let mut vectors = FlatVectorStore::new();
        for (id, file, lines, v) in [
            ("a.js#1", "a.js", (1, 10), vec![1.0, 0.0]),
            ("a.js#2", "a.js", (12, 20), vec![0.0, 1.0]),
            ("b.js#1", "b.js", (1, 8), vec![0.95, 0.05]),
        ] {
            metadata.set(stored(id, file, lines));
            vectors.upsert(id, v).unwrap();
        }
        (metadata, vectors)
    }

    #[test]
    fn location_query_excludes_itself() {
        let (m, v) = fixture();
        let hits = find_similar_to_location(&m, &v, "a.js", 5, 10, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b.js#1");
        assert_eq!(hits[0].preview.lines().count(), PREVIEW_LINES);
    }

    #[test]
    fn location_without_chunk_is_an_error() {
        let (m, v) = fixture();
        let err = find_similar_to_location(&m, &v, "a.js", 11, 10, 0.5).unwrap_err();
        assert!(matches!(err, IndexError::NoChunkAtLocation { line: 11, .. }));
    }

    #[test]
    fn top_limits_results() {
        let (m, v) = fixture();
        let hits = similar_to_vector(&m, &v, &[1.0, 0.0], 1, 0.0, None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a.js#1");
    }

    #[tokio::test]
    async fn text_query_rejects_wrong_dimension() {
        let (m, v) = fixture();
        let provider = MockEmbedder::new().with_dimension(8);
        let err = find_similar_to_query(&provider, &m, &v, "anything", 5, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 8
            }
        ));
    }

    #[tokio::test]
    async fn queries_without_index_signal_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let idx = IncrementalIndexer::new(dir.path(), MockEmbedder::new(), IndexerConfig::default());
        assert!(
            idx.find_duplicates(&DuplicateOptions::default())
                .unwrap_err()
                .is_no_index()
        );
        assert!(idx.search_similar("x", 5, 0.0).await.unwrap_err().is_no_index());
        assert!(idx.find_similar_at_location("a.js", 1, 5, 0.0).unwrap_err().is_no_index());
        assert!(idx.stats().unwrap_err().is_no_index());
    }
}
