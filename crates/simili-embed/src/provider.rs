use std::future::Future;

use crate::error::{EmbedError, Result};

/// A source of fixed-length embedding vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Short backend identifier used in logs.
    fn name(&self) -> &'static str;

    /// Embedding model name. Recorded in the index manifest.
    fn model(&self) -> &str;

    /// Declared output dimension, if the configuration pins one.
    fn dimension(&self) -> Option<usize>;

    /// Clone this provider with a different embedding model.
    #[must_use]
    fn with_model(&self, model: &str) -> Self
    where
        Self: Sized;

    /// Embed several texts, returning one vector per text in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or returns an unusable response.
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or returns an unusable response.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send {
        async move {
            let mut vectors = self.embed_batch(&[text.to_owned()]).await?;
            vectors
                .pop()
                .ok_or_else(|| EmbedError::Malformed("empty embedding batch".into()))
        }
    }
}

/// Check that every vector has the same length and, when `expected` is set,
/// that the length matches it.
///
/// # Errors
///
/// Returns `Malformed` for ragged or empty vectors and `DimensionMismatch`
/// when the shared length differs from `expected`.
pub fn check_dimension(expected: Option<usize>, vectors: &[Vec<f32>]) -> Result<()> {
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let actual = first.len();
    if actual == 0 {
        return Err(EmbedError::Malformed("empty embedding vector".into()));
    }
    if let Some(other) = vectors.iter().find(|v| v.len() != actual) {
        return Err(EmbedError::Malformed(format!(
            "inconsistent vector lengths in batch: {actual} and {}",
            other.len()
        )));
    }
    match expected {
        Some(expected) if expected != actual => {
            Err(EmbedError::DimensionMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_dimension_accepts_matching_vectors() {
        let vectors = vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]];
        assert!(check_dimension(Some(3), &vectors).is_ok());
        assert!(check_dimension(None, &vectors).is_ok());
    }

    #[test]
    fn check_dimension_empty_batch_ok() {
        assert!(check_dimension(Some(768), &[]).is_ok());
    }

    #[test]
    fn check_dimension_rejects_declared_mismatch() {
        let err = check_dimension(Some(4), &[vec![0.0; 3]]).unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn check_dimension_rejects_ragged_batch() {
        let err = check_dimension(None, &[vec![0.0; 3], vec![0.0; 2]]).unwrap_err();
        assert!(matches!(err, EmbedError::Malformed(_)));
    }

    #[test]
    fn check_dimension_rejects_empty_vector() {
        let err = check_dimension(None, &[Vec::new()]).unwrap_err();
        assert!(matches!(err, EmbedError::Malformed(_)));
    }
}
