//! Embedding providers for semantic duplicate detection.
//!
//! [`EmbeddingProvider`] turns chunk text into fixed-length vectors. The
//! production backend talks to a local Ollama-compatible service; the `mock`
//! feature adds a deterministic in-process embedder for tests.

pub mod error;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod ollama;
pub mod provider;
pub(crate) mod retry;

pub use error::{EmbedError, Result};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockEmbedder;
pub use ollama::{OllamaConfig, OllamaEmbedder};
pub use provider::EmbeddingProvider;
