//! Semantic near-duplicate detection over source trees.
//!
//! Tree-sitter splits source files into function-shaped chunks, chunks are
//! embedded through a [`simili_embed::EmbeddingProvider`] and kept in a
//! persisted vector index that is updated incrementally by content hash.
//! Connected components over the similarity graph become ranked duplicate
//! groups.

pub mod chunker;
pub mod duplicates;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod manifest;
pub mod metadata_store;
pub mod persist;
pub mod query;
pub mod registry;
pub mod tracker;
pub mod vector_store;

pub use chunker::{ChunkKind, ChunkerConfig, CodeChunk};
pub use duplicates::{DuplicateGroup, DuplicateOptions, GroupMember};
pub use error::{IndexError, Result};
pub use indexer::{IncrementalIndexer, IndexOptions, IndexProgress, IndexReport, IndexerConfig, Phase};
pub use manifest::IndexManifest;
pub use query::{IndexStats, SearchResult};
pub use registry::IndexRegistry;
