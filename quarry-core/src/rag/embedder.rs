//! Embedding generation using model providers.
//!
//! This module converts text into vector embeddings. Every provider call
//! goes through the configured [`RetryPolicy`], and every returned vector is
//! checked against the dimension the caller expects.

use crate::provider::{Provider, ProviderError};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during embedding generation.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// The provider failed, after retries where the failure was transient.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The provider returned a different number of vectors than texts sent.
    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// A vector did not have the expected length.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Provider returned an empty embedding")]
    Empty,
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedderError>;

/// Generates vector embeddings for text with one embedding model.
///
/// # Supported Models
///
/// Any model the provider serves. Common ones:
/// - `nomic-embed-text` - 768-dimensional embeddings, good general purpose
/// - `mxbai-embed-large` - 1024-dimensional embeddings, higher quality
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
    retry: RetryPolicy,
}

impl Embedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generates a vector embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The provider fails permanently or keeps failing after retries
    /// - The provider returns an empty vector
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self
            .retry
            .run("embed", || self.provider.embed(text, &self.model))
            .await?;
        if vector.is_empty() {
            return Err(EmbedderError::Empty);
        }
        Ok(vector)
    }

    /// Embeds a batch of texts with one provider call, retried as a unit.
    ///
    /// The result has one vector per input text, in order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .retry
            .run("embed_batch", || self.provider.embed_batch(texts, &self.model))
            .await?;
        if vectors.len() != texts.len() {
            return Err(EmbedderError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        if vectors.iter().any(|v| v.is_empty()) {
            return Err(EmbedderError::Empty);
        }
        Ok(vectors)
    }
}

/// Checks every vector against `expected`.
pub fn ensure_dimension<'a>(
    expected: usize,
    vectors: impl IntoIterator<Item = &'a Vec<f32>>,
) -> Result<()> {
    for vector in vectors {
        if vector.len() != expected {
            return Err(EmbedderError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}
