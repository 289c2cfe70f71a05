mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use simili_embed::MockEmbedder;
use simili_embed::mock::MOCK_FAIL_MARKER;
use simili_index::metadata_store::MetadataStore;
use simili_index::persist::{METADATA_FILE, VECTORS_FILE, index_dir};
use simili_index::vector_store::{FlatVectorStore, VectorIndex};
use simili_index::{IndexError, IndexManifest, IndexOptions, IndexRegistry, IndexerConfig};

use common::{index, indexer, project};

fn vectors_by_id(root: &std::path::Path) -> BTreeMap<String, Vec<f32>> {
    let store = FlatVectorStore::load(&index_dir(root)).unwrap();
    store
        .iter()
        .map(|(id, v)| (id.to_owned(), v.to_vec()))
        .collect()
}

#[tokio::test]
async fn reindexing_unchanged_tree_is_byte_identical() {
    let dir = project("cards");
    let first = index(dir.path(), MockEmbedder::new()).await;
    assert_eq!(first.total_chunks, 4);
    assert_eq!(first.total_files, 4);

    let docs = index_dir(dir.path());
    let metadata = std::fs::read(docs.join(METADATA_FILE)).unwrap();
    let vectors = std::fs::read(docs.join(VECTORS_FILE)).unwrap();

    let provider = MockEmbedder::new();
    let second = index(dir.path(), provider.clone()).await;
    assert_eq!(second.files_unchanged, 4);
    assert_eq!(second.chunks_embedded, 0);
    assert_eq!(provider.batch_calls(), 0);

    assert_eq!(std::fs::read(docs.join(METADATA_FILE)).unwrap(), metadata);
    assert_eq!(std::fs::read(docs.join(VECTORS_FILE)).unwrap(), vectors);
    let manifest = IndexManifest::load(&docs).unwrap();
    assert_eq!(manifest.chunk_count, first.total_chunks);
    assert_eq!(manifest.file_count, first.total_files);
}

#[tokio::test]
async fn modifying_one_file_touches_only_its_chunks() {
    let dir = project("cards");
    index(dir.path(), MockEmbedder::new()).await;
    let before = vectors_by_id(dir.path());

    let widget = dir.path().join("WeatherWidget.tsx");
    let mut source = std::fs::read_to_string(&widget).unwrap();
    source.push_str(
        r#"
export function formatTemperature(celsius: number, unit: "C" | "F"): string {
  const value = unit === "F" ? celsius * 1.8 + 32 : celsius;
  return `${Math.round(value)}°${unit}`;
}
"#,
    );
    std::fs::write(&widget, source).unwrap();

    let provider = MockEmbedder::new();
    let report = index(dir.path(), provider.clone()).await;
    assert_eq!(report.files_modified, 1);
    assert_eq!(report.files_unchanged, 3);
    assert_eq!(report.chunks_embedded, 1);
    assert_eq!(provider.texts_embedded(), 1);

    let after = vectors_by_id(dir.path());
    assert_eq!(after.len(), before.len() + 1);
    for (id, vector) in &before {
        assert_eq!(after.get(id), Some(vector), "vector of {id} changed");
    }
    let added: Vec<&String> = after.keys().filter(|id| !before.contains_key(*id)).collect();
    assert_eq!(added.len(), 1);
    assert!(added[0].starts_with("WeatherWidget.tsx#"));
}

#[tokio::test]
async fn deleting_a_file_removes_all_its_chunks() {
    let dir = project("email");
    index(dir.path(), MockEmbedder::new()).await;

    std::fs::remove_file(dir.path().join("formUtils.ts")).unwrap();
    let report = index(dir.path(), MockEmbedder::new()).await;
    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.chunks_removed, 2);
    assert_eq!(report.total_chunks, 1);

    let docs = index_dir(dir.path());
    let metadata = MetadataStore::load(&docs).unwrap();
    let vectors = FlatVectorStore::load(&docs).unwrap();
    assert!(metadata.iter().all(|c| c.file_path != "formUtils.ts"));
    assert!(vectors.ids().iter().all(|id| !id.starts_with("formUtils.ts#")));
    assert_eq!(metadata.len(), vectors.len());
    assert_eq!(IndexManifest::load(&docs).unwrap().file_count, 1);
}

#[tokio::test]
async fn failed_chunks_are_skipped_and_retried() {
    let dir = project("email");
    let poisoned = format!(
        "export function describeFailure(reason: string): string {{\n  const marker = \"{MOCK_FAIL_MARKER}\";\n  return `${{marker}}: ${{reason.trim()}}`;\n}}\n"
    );
    std::fs::write(dir.path().join("failure.ts"), &poisoned).unwrap();

    let report = index(dir.path(), MockEmbedder::new()).await;
    assert_eq!(report.failed_chunks.len(), 1);
    assert_eq!(report.failed_chunks[0].file_path, "failure.ts");
    assert_eq!(report.total_chunks, 3);

    let docs = index_dir(dir.path());
    let metadata = MetadataStore::load(&docs).unwrap();
    assert!(metadata.by_file_path("failure.ts").is_empty());

    // The file is re-examined on the next run even though it did not change.
    let provider = MockEmbedder::new();
    let again = index(dir.path(), provider.clone()).await;
    assert_eq!(again.files_modified, 1);
    assert_eq!(again.failed_chunks.len(), 1);

    std::fs::write(
        dir.path().join("failure.ts"),
        poisoned.replace(MOCK_FAIL_MARKER, "failure"),
    )
    .unwrap();
    let fixed = index(dir.path(), MockEmbedder::new()).await;
    assert!(fixed.failed_chunks.is_empty());
    assert_eq!(fixed.total_chunks, 4);
}

#[tokio::test]
async fn changed_chunk_that_fails_is_removed_not_stale() {
    let dir = project("email");
    index(dir.path(), MockEmbedder::new()).await;
    let docs = index_dir(dir.path());
    let id = MetadataStore::load(&docs)
        .unwrap()
        .by_file_path("isValidEmail.ts")[0]
        .id
        .clone();

    let path = dir.path().join("isValidEmail.ts");
    let source = std::fs::read_to_string(&path)
        .unwrap()
        .replace("return false;", &format!("throw new Error(\"{MOCK_FAIL_MARKER}\");"));
    std::fs::write(&path, source).unwrap();

    let report = index(dir.path(), MockEmbedder::new()).await;
    assert_eq!(report.failed_chunks.len(), 1);
    assert_eq!(report.failed_chunks[0].id, id);

    let metadata = MetadataStore::load(&docs).unwrap();
    let vectors = FlatVectorStore::load(&docs).unwrap();
    assert!(!metadata.has(&id));
    assert!(!vectors.contains(&id));
}

#[tokio::test]
async fn older_format_version_forces_a_fresh_index() {
    let dir = project("cards");
    let first = index(dir.path(), MockEmbedder::new()).await;

    let docs = index_dir(dir.path());
    let mut manifest = IndexManifest::load(&docs).unwrap();
    let created_at = manifest.created_at;
    manifest.version += 1;
    manifest.save(&docs).unwrap();

    let provider = MockEmbedder::new();
    let report = index(dir.path(), provider.clone()).await;
    assert!(report.rebuilt);
    assert_eq!(report.files_added, 4);
    assert_eq!(report.files_unchanged, 0);
    assert_eq!(report.chunks_embedded, first.total_chunks);
    assert_eq!(provider.texts_embedded(), first.total_chunks);

    let rebuilt = IndexManifest::load(&docs).unwrap();
    assert_eq!(rebuilt.version, simili_index::manifest::FORMAT_VERSION);
    assert!(rebuilt.created_at >= created_at);
    assert_eq!(rebuilt.chunk_count, first.total_chunks);
}

#[tokio::test]
async fn unreachable_service_fails_without_persisting() {
    let dir = project("cards");
    let mut idx = indexer(dir.path(), MockEmbedder::new().offline());
    let err = idx.index(&IndexOptions::default()).await.unwrap_err();
    assert!(matches!(err, IndexError::Embed(_)));
    assert!(!index_dir(dir.path()).exists());
    assert!(!idx.has_index());
}

#[tokio::test]
async fn deadline_leaves_no_partial_state() {
    let dir = project("cards");
    let mut idx = indexer(
        dir.path(),
        MockEmbedder::new().with_delay(Duration::from_millis(500)),
    );
    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        idx.index(&IndexOptions::default()),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(!index_dir(dir.path()).exists());
    assert!(idx.manifest().is_none());

    let report = index(dir.path(), MockEmbedder::new()).await;
    assert_eq!(report.total_chunks, 4);
}

#[tokio::test]
async fn small_batches_and_fan_out_give_the_same_index() {
    let wide = project("cards");
    index(wide.path(), MockEmbedder::new()).await;

    let narrow = project("cards");
    let config = IndexerConfig {
        batch_size: 1,
        concurrency: 3,
        ..IndexerConfig::default()
    };
    let provider = MockEmbedder::new();
    simili_index::IncrementalIndexer::new(narrow.path(), provider.clone(), config)
        .index(&IndexOptions::default())
        .await
        .unwrap();
    assert_eq!(provider.batch_calls(), 4);

    assert_eq!(vectors_by_id(wide.path()), vectors_by_id(narrow.path()));
}

#[tokio::test]
async fn metadata_round_trips_through_disk() {
    let dir = project("cards");
    index(dir.path(), MockEmbedder::new()).await;
    let loaded = MetadataStore::load(&index_dir(dir.path())).unwrap();

    let copy = tempfile::tempdir().unwrap();
    loaded.save(copy.path()).unwrap();
    let reloaded = MetadataStore::load(copy.path()).unwrap();
    assert_eq!(reloaded, loaded);
    assert_eq!(
        reloaded.ids().collect::<Vec<_>>(),
        loaded.ids().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn registry_signals_missing_index() {
    let dir = project("cards");
    let registry = IndexRegistry::new(MockEmbedder::new(), IndexerConfig::default());
    let err = registry
        .search_similar("card", dir.path(), 5, 0.0)
        .await
        .unwrap_err();
    assert!(err.is_no_index());
    assert!(!registry.has_index(dir.path()));
}
