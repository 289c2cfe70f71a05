#![allow(dead_code)]

use std::path::{Path, PathBuf};

use simili_embed::MockEmbedder;
use simili_index::{IncrementalIndexer, IndexOptions, IndexReport, IndexerConfig};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Copy a fixture tree into a fresh temp directory.
pub fn project(name: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    copy_tree(&fixture(name), dir.path());
    dir
}

fn copy_tree(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), target).unwrap();
        }
    }
}

pub fn indexer(root: &Path, provider: MockEmbedder) -> IncrementalIndexer<MockEmbedder> {
    IncrementalIndexer::new(root, provider, IndexerConfig::default())
}

pub async fn index(root: &Path, provider: MockEmbedder) -> IndexReport {
    indexer(root, provider)
        .index(&IndexOptions::default())
        .await
        .unwrap()
}
