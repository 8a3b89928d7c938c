//! Crate-wide error taxonomy.
//!
//! Module errors roll up into [`Error`]. Each variant has a stable code that
//! the operation layer puts on the wire.

use crate::config::ConfigError;
use crate::rag::{BuildError, EmbedderError, IndexError, QueryError, QueryFailure};
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InputValidation(String),

    #[error("Embedding provider failed: {0}")]
    EmbeddingProvider(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Model mismatch: {0}")]
    ModelMismatch(String),

    #[error("Document fetch failed: {0}")]
    DocumentFetch(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InputValidation(_) => "INPUT_VALIDATION",
            Error::EmbeddingProvider(_) => "EMBEDDING_PROVIDER",
            Error::Generation(_) => "GENERATION",
            Error::IndexNotFound(_) => "INDEX_NOT_FOUND",
            Error::IndexCorrupt(_) => "INDEX_CORRUPT",
            Error::ModelMismatch(_) => "MODEL_MISMATCH",
            Error::DocumentFetch(_) => "DOCUMENT_FETCH",
            Error::Storage(_) => "STORAGE",
            Error::Config(_) => "INTERNAL",
        }
    }
}

impl From<IndexError> for Error {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::NotFound(key) => Error::IndexNotFound(key),
            IndexError::Corrupt(reason) => Error::IndexCorrupt(reason),
            e @ IndexError::DimensionMismatch { .. } => Error::ModelMismatch(e.to_string()),
            IndexError::InvalidTopK => Error::InputValidation(IndexError::InvalidTopK.to_string()),
            IndexError::Store(e) => Error::Storage(e),
            IndexError::Encode(e) => Error::IndexCorrupt(e.to_string()),
        }
    }
}

impl From<EmbedderError> for Error {
    fn from(e: EmbedderError) -> Self {
        Error::EmbeddingProvider(e.to_string())
    }
}

impl From<BuildError> for Error {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::InvalidRequest(reason) => Error::InputValidation(reason),
            BuildError::Embedding(e) => e.into(),
            e @ BuildError::DocumentFetch { .. } => Error::DocumentFetch(e.to_string()),
            BuildError::Store(e) => Error::Storage(e),
            BuildError::Index(e) => e.into(),
        }
    }
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidInput(reason) => Error::InputValidation(reason),
            e @ QueryError::ModelMismatch { .. } => Error::ModelMismatch(e.to_string()),
            QueryError::Embedding(e) => e.into(),
            QueryError::Index(e) => e.into(),
            QueryError::Generation(e) => Error::Generation(e.to_string()),
        }
    }
}

impl From<QueryFailure> for Error {
    fn from(failure: QueryFailure) -> Self {
        failure.source.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;

    #[test]
    fn test_index_error_codes() {
        assert_eq!(Error::from(IndexError::NotFound("k".into())).code(), "INDEX_NOT_FOUND");
        assert_eq!(Error::from(IndexError::Corrupt("bad".into())).code(), "INDEX_CORRUPT");
        assert_eq!(
            Error::from(IndexError::DimensionMismatch { expected: 3, actual: 4 }).code(),
            "MODEL_MISMATCH"
        );
        assert_eq!(Error::from(IndexError::InvalidTopK).code(), "INPUT_VALIDATION");
    }

    #[test]
    fn test_build_error_codes() {
        let err = BuildError::Embedding(EmbedderError::Provider(ProviderError::api(503, "x")));
        assert_eq!(Error::from(err).code(), "EMBEDDING_PROVIDER");
        let err = BuildError::DocumentFetch {
            key: "docs/a".into(),
            source: StoreError::Unavailable("down".into()),
        };
        assert_eq!(Error::from(err).code(), "DOCUMENT_FETCH");
    }

    #[test]
    fn test_generation_message_hides_body() {
        let err: Error = QueryError::Generation(ProviderError::api(500, "secret body")).into();
        assert_eq!(err.code(), "GENERATION");
        assert!(!err.to_string().contains("secret body"));
    }
}
