//! Deterministic in-process embedder for tests.
//!
//! Vectors are signed feature-hashing counts over identifier tokens, so texts
//! that share vocabulary land close together regardless of formatting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;

pub const DEFAULT_MOCK_DIMENSION: usize = 256;

/// Texts containing this marker fail with `EmbedError::Malformed`.
pub const MOCK_FAIL_MARKER: &str = "__embed_fail__";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct MockEmbedder {
    model: String,
    dimension: usize,
    declared: bool,
    fail_marker: Option<String>,
    offline: bool,
    delay: Duration,
    batches: Arc<AtomicUsize>,
    texts: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            model: "mock-embed".into(),
            dimension: DEFAULT_MOCK_DIMENSION,
            declared: true,
            fail_marker: Some(MOCK_FAIL_MARKER.into()),
            offline: false,
            delay: Duration::ZERO,
            batches: Arc::new(AtomicUsize::new(0)),
            texts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Report no declared dimension; the index learns it from the first vector.
    #[must_use]
    pub fn undeclared(mut self) -> Self {
        self.declared = false;
        self
    }

    #[must_use]
    pub fn with_fail_marker(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    /// Simulate an embedding service that never comes up.
    #[must_use]
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `embed_batch` calls, shared across clones.
    #[must_use]
    pub fn batch_calls(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of texts successfully embedded, shared across clones.
    #[must_use]
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    /// Compute the vector for `text` without counting a call.
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            #[expect(clippy::cast_possible_truncation)]
            let slot = (hash % self.dimension as u64) as usize;
            if (hash >> 63) & 1 == 1 {
                vector[slot] -= 1.0;
            } else {
                vector[slot] += 1.0;
            }
        }
        vector
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        self.declared.then_some(self.dimension)
    }

    fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_owned(),
            ..self.clone()
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.offline {
            return Err(EmbedError::Unavailable {
                url: "mock://offline".into(),
                waited: Duration::ZERO,
            });
        }
        if let Some(marker) = &self.fail_marker
            && texts.iter().any(|t| t.contains(marker.as_str()))
        {
            return Err(EmbedError::Malformed(format!(
                "mock refused text containing {marker}"
            )));
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Split identifiers into lowercase camelCase / `snake_case` parts, keeping
/// parts of two or more characters.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if word.is_empty() && c.is_ascii_digit() {
                continue;
            }
            word.push(c);
        } else if !word.is_empty() {
            split_identifier(&word, &mut tokens);
            word.clear();
        }
    }
    if !word.is_empty() {
        split_identifier(&word, &mut tokens);
    }
    tokens
}

fn split_identifier(word: &str, out: &mut Vec<String>) {
    let chars: Vec<char> = word.chars().collect();
    let n = chars.len();
    let lower_or_digit = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let mut i = 0;
    while i < n {
        let c = chars[i];
        if c == '_' {
            i += 1;
            continue;
        }
        let end = if c.is_ascii_uppercase() {
            let mut run = i;
            while run < n && chars[run].is_ascii_uppercase() {
                run += 1;
            }
            if run < n && chars[run].is_ascii_lowercase() {
                if run - i >= 2 {
                    // "HTMLParser": the last capital starts the next part
                    run - 1
                } else {
                    let mut k = run;
                    while k < n && lower_or_digit(chars[k]) {
                        k += 1;
                    }
                    k
                }
            } else {
                run
            }
        } else {
            let mut k = i;
            while k < n && lower_or_digit(chars[k]) {
                k += 1;
            }
            k
        };
        if end - i >= 2 {
            out.push(chars[i..end].iter().collect::<String>().to_ascii_lowercase());
        }
        i = end;
    }
}
