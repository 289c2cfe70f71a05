//! Vector store: chunk id to embedding, with exact cosine queries.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunker::id_prefix;
use crate::error::{IndexError, Result};
use crate::persist::{VECTORS_FILE, read_json, write_json};

/// A query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

/// Similarity backend used by the indexer and the duplicate finder.
///
/// Queries return hits ordered by descending score with ties broken by
/// ascending id, so an approximate backend can replace the flat one without
/// changing callers.
pub trait VectorIndex: Send + Sync {
    /// Fixed vector length, once known.
    fn dimension(&self) -> Option<usize>;

    /// Insert or replace the vector for `id`.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the vector length differs from the index dimension.
    fn upsert(&mut self, id: &str, vector: Vec<f32>) -> Result<()>;

    /// Remove `id`; returns whether it was present.
    fn remove(&mut self, id: &str) -> bool;

    /// Remove every id belonging to `file_path`; returns the removed ids.
    fn remove_by_file_prefix(&mut self, file_path: &str) -> Vec<String>;

    fn get(&self, id: &str) -> Option<&[f32]>;

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ids in ascending order.
    fn ids(&self) -> Vec<String>;

    /// Up to `k` nearest ids with similarity `>= min_similarity`.
    fn query(&self, vector: &[f32], k: usize, min_similarity: f32) -> Vec<ScoredId>;
}

/// Brute-force store over a sorted map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatVectorStore {
    dimension: Option<usize>,
    vectors: BTreeMap<String, Vec<f32>>,
}

impl FlatVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            vectors: BTreeMap::new(),
        }
    }

    /// Load `vectors.json` from an index directory.
    ///
    /// # Errors
    ///
    /// `NoIndex` if missing, `CorruptIndex` if unparsable or if any vector
    /// length disagrees with the stored dimension.
    pub fn load(index_dir: &Path) -> Result<Self> {
        let path = index_dir.join(VECTORS_FILE);
        let store: Self = read_json(&path)?;
        if let Some(dim) = store.dimension
            && let Some((id, v)) = store.vectors.iter().find(|(_, v)| v.len() != dim)
        {
            return Err(IndexError::CorruptIndex {
                path,
                reason: format!("vector {id} has length {}, index dimension is {dim}", v.len()),
            });
        }
        Ok(store)
    }

    /// Persist to `vectors.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub fn save(&self, index_dir: &Path) -> Result<()> {
        write_json(&index_dir.join(VECTORS_FILE), self)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.vectors.iter().map(|(id, v)| (id.as_str(), v.as_slice()))
    }
}

impl VectorIndex for FlatVectorStore {
    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn upsert(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }
        self.vectors.insert(id.to_owned(), vector);
        Ok(())
    }

    fn remove(&mut self, id: &str) -> bool {
        self.vectors.remove(id).is_some()
    }

    fn remove_by_file_prefix(&mut self, file_path: &str) -> Vec<String> {
        let prefix = id_prefix(file_path);
        let ids: Vec<String> = self
            .vectors
            .range(prefix.clone()..)
            .take_while(|(id, _)| id.starts_with(&prefix))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.vectors.remove(id);
        }
        ids
    }

    fn get(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn ids(&self) -> Vec<String> {
        self.vectors.keys().cloned().collect()
    }

    fn query(&self, vector: &[f32], k: usize, min_similarity: f32) -> Vec<ScoredId> {
        let mut hits: Vec<ScoredId> = self
            .vectors
            .iter()
            .map(|(id, v)| ScoredId {
                id: id.clone(),
                score: cosine_similarity(vector, v),
            })
            .filter(|hit| hit.score >= min_similarity)
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        hits
    }
}

/// Descending score, ascending id.
pub(crate) fn sort_hits(hits: &mut [ScoredId]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

/// Cosine similarity; zero when either vector has zero norm or lengths differ.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
