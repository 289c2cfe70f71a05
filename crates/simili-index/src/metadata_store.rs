//! Metadata store: chunk id to persisted chunk metadata, in insertion order.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::chunker::{ChunkFacts, ChunkKind, CodeChunk, Span};
use crate::error::{IndexError, Result};
use crate::languages::Lang;
use crate::persist::{METADATA_FILE, read_json, write_json};

/// Persisted projection of a [`CodeChunk`]: everything but the vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub kind: ChunkKind,
    pub name: Option<String>,
    pub file_path: String,
    pub language: Lang,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(flatten)]
    pub span: Span,
    pub content_hash: String,
    pub text: String,
    #[serde(default)]
    pub facts: ChunkFacts,
}

impl StoredChunk {
    /// Text length in characters.
    #[must_use]
    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }

    /// First `lines` lines of the chunk text.
    #[must_use]
    pub fn preview(&self, lines: usize) -> String {
        self.text.lines().take(lines).collect::<Vec<_>>().join("\n")
    }

    /// `name` or `<anonymous>`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

impl From<&CodeChunk> for StoredChunk {
    fn from(chunk: &CodeChunk) -> Self {
        Self {
            id: chunk.id.clone(),
            kind: chunk.kind,
            name: chunk.name.clone(),
            file_path: chunk.file_path.clone(),
            language: chunk.language,
            scope: chunk.scope.clone(),
            span: chunk.span,
            content_hash: chunk.content_hash.clone(),
            text: chunk.text.clone(),
            facts: chunk.facts.clone(),
        }
    }
}

/// Id-keyed chunk metadata. Iteration follows insertion order; replacing an
/// existing id keeps its position.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    entries: HashMap<String, StoredChunk>,
    order: Vec<String>,
}

impl MetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `metadata.json` from an index directory.
    ///
    /// # Errors
    ///
    /// `NoIndex` if the document is missing, `CorruptIndex` if it is not
    /// valid JSON or an entry's id disagrees with its key.
    pub fn load(index_dir: &Path) -> Result<Self> {
        let path = index_dir.join(METADATA_FILE);
        let store: Self = read_json(&path)?;
        if let Some(id) = store.order.iter().find(|id| store.entries[*id].id != **id) {
            return Err(IndexError::CorruptIndex {
                path,
                reason: format!("entry keyed {id} carries a different id"),
            });
        }
        Ok(store)
    }

    /// Persist to `metadata.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub fn save(&self, index_dir: &Path) -> Result<()> {
        write_json(&index_dir.join(METADATA_FILE), self)
    }

    pub fn set(&mut self, chunk: StoredChunk) {
        if !self.entries.contains_key(&chunk.id) {
            self.order.push(chunk.id.clone());
        }
        self.entries.insert(chunk.id.clone(), chunk);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StoredChunk> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<StoredChunk> {
        let removed = self.entries.remove(id)?;
        self.order.retain(|o| o != id);
        Some(removed)
    }

    /// Chunks of one file, in insertion order.
    #[must_use]
    pub fn by_file_path(&self, file_path: &str) -> Vec<&StoredChunk> {
        self.iter().filter(|c| c.file_path == file_path).collect()
    }

    /// First chunk (in insertion order) with this content hash.
    #[must_use]
    pub fn by_content_hash(&self, content_hash: &str) -> Option<&StoredChunk> {
        self.iter().find(|c| c.content_hash == content_hash)
    }

    /// The innermost chunk of `file_path` whose span contains `line`.
    #[must_use]
    pub fn at_location(&self, file_path: &str, line: usize) -> Option<&StoredChunk> {
        self.iter()
            .filter(|c| c.file_path == file_path && c.span.contains_line(line))
            .min_by_key(|c| c.span.line_count())
    }

    /// Remove every chunk of `file_path`; returns the removed ids.
    pub fn remove_file(&mut self, file_path: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .by_file_path(file_path)
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        for id in &ids {
            self.entries.remove(id);
        }
        self.order.retain(|id| self.entries.contains_key(id));
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredChunk> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl PartialEq for MetadataStore {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order && self.entries == other.entries
    }
}

impl Serialize for MetadataStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter().map(|c| (&c.id, c)))
    }
}

impl<'de> Deserialize<'de> for MetadataStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = MetadataStore;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of chunk id to chunk metadata")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut store = MetadataStore::new();
                while let Some((key, chunk)) = map.next_entry::<String, StoredChunk>()? {
                    if store.entries.contains_key(&key) {
                        return Err(serde::de::Error::custom(format!("duplicate chunk id {key}")));
                    }
                    store.order.push(key.clone());
                    store.entries.insert(key, chunk);
                }
                Ok(store)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, file: &str, lines: (usize, usize), hash: &str) -> StoredChunk {
        StoredChunk {
            id: id.to_owned(),
            kind: ChunkKind::Function,
            name: Some(format!("fn_{hash}")),
            file_path: file.to_owned(),
            language: Lang::TypeScript,
            scope: String::new(),
            span: Span {
                start_line: lines.0,
                start_column: 1,
                end_line: lines.1,
                end_column: 2,
            },
            content_hash: hash.to_owned(),
            text: format!("function fn_{hash}() {{\n  return 1;\n}}"),
            facts: ChunkFacts::default(),
        }
    }

    fn sample() -> MetadataStore {
        let mut store = MetadataStore::new();
        store.set(chunk("b.ts#2", "b.ts", (1, 20), "h1"));
        store.set(chunk("a.ts#1", "a.ts", (3, 9), "h2"));
        store.set(chunk("b.ts#1", "b.ts", (5, 8), "h3"));
        store
    }

    #[test]
    fn iteration_is_insertion_order() {
        let store = sample();
        let ids: Vec<&str> = store.ids().collect();
        assert_eq!(ids, vec!["b.ts#2", "a.ts#1", "b.ts#1"]);
    }

    #[test]
    fn replacing_keeps_position() {
        let mut store = sample();
        store.set(chunk("b.ts#2", "b.ts", (1, 21), "h9"));
        let ids: Vec<&str> = store.ids().collect();
        assert_eq!(ids, vec!["b.ts#2", "a.ts#1", "b.ts#1"]);
        assert_eq!(store.get("b.ts#2").unwrap().content_hash, "h9");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn lookups() {
        let store = sample();
        assert!(store.has("a.ts#1"));
        assert!(!store.has("zzz"));
        assert_eq!(store.by_file_path("b.ts").len(), 2);
        assert_eq!(store.by_content_hash("h2").unwrap().id, "a.ts#1");
        assert!(store.by_content_hash("nope").is_none());
    }

    #[test]
    fn at_location_prefers_innermost_span() {
        let store = sample();
        assert_eq!(store.at_location("b.ts", 6).unwrap().id, "b.ts#1");
        assert_eq!(store.at_location("b.ts", 15).unwrap().id, "b.ts#2");
        assert!(store.at_location("b.ts", 30).is_none());
        assert!(store.at_location("c.ts", 1).is_none());
    }

    #[test]
    fn remove_file_drops_all_its_chunks() {
        let mut store = sample();
        let mut removed = store.remove_file("b.ts");
        removed.sort();
        assert_eq!(removed, vec!["b.ts#1", "b.ts#2"]);
        assert_eq!(store.ids().collect::<Vec<_>>(), vec!["a.ts#1"]);
    }

    #[test]
    fn remove_single() {
        let mut store = sample();
        assert!(store.remove("a.ts#1").is_some());
        assert!(store.remove("a.ts#1").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample();
        store.save(dir.path()).unwrap();
        let loaded = MetadataStore::load(dir.path()).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(
            loaded.ids().collect::<Vec<_>>(),
            vec!["b.ts#2", "a.ts#1", "b.ts#1"]
        );
    }

    #[test]
    fn save_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample();
        store.save(dir.path()).unwrap();
        let first = std::fs::read(dir.path().join(METADATA_FILE)).unwrap();
        MetadataStore::load(dir.path()).unwrap().save(dir.path()).unwrap();
        let second = std::fs::read(dir.path().join(METADATA_FILE)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_document_is_distinct_from_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MetadataStore::load(dir.path()).unwrap_err().is_no_index());

        std::fs::write(dir.path().join(METADATA_FILE), "[1, 2").unwrap();
        let err = MetadataStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, IndexError::CorruptIndex { .. }));
    }

    #[test]
    fn mismatched_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = serde_json::Map::new();
        doc.insert(
            "other#1".to_owned(),
            serde_json::to_value(chunk("a.ts#1", "a.ts", (1, 2), "h")).unwrap(),
        );
        std::fs::write(
            dir.path().join(METADATA_FILE),
            serde_json::to_vec(&doc).unwrap(),
        )
        .unwrap();
        let err = MetadataStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, IndexError::CorruptIndex { .. }));
    }

    #[test]
    fn preview_and_len() {
        let c = chunk("a#1", "a.ts", (1, 3), "x");
        assert_eq!(c.preview(1), "function fn_x() {");
        assert_eq!(c.text_len(), c.text.chars().count());
        assert_eq!(c.display_name(), "fn_x");
    }
}
