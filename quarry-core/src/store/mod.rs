//! Object store abstraction holding source documents and index artifacts.
//!
//! A bucket is anything implementing [`ObjectStore`]: keys are `/`-separated
//! strings, values are opaque bytes with an optional content type. Two
//! backends ship with the crate:
//!
//! - [`MemoryStore`]: process-local, used by tests and dry runs
//! - [`FsStore`]: a directory tree; puts are write-then-rename so readers
//!   never observe a partially written object

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::config::BucketMode;
use crate::retry::Retryable;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            StoreError::Unavailable(_) => true,
            StoreError::NotFound(_) | StoreError::InvalidKey(_) => false,
        }
    }
}

/// A stored object: a document or an index artifact.
#[derive(Debug, Clone)]
pub struct Object {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl Object {
    pub fn new(key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Listing entry returned by [`ObjectStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
}

/// Unified interface for a bucket of objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches an object. Missing keys yield [`StoreError::NotFound`].
    async fn get(&self, key: &str) -> Result<Object>;

    /// Creates or replaces an object. Replacement is atomic for readers.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<()>;

    /// Lists objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Removes an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Creates a store for one configured bucket.
pub fn create_object_store(mode: &BucketMode) -> Arc<dyn ObjectStore> {
    match mode {
        BucketMode::Memory => Arc::new(MemoryStore::new()),
        BucketMode::Filesystem { root } => Arc::new(FsStore::new(root)),
    }
}

/// Rejects keys that cannot name an object in every backend.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(StoreError::InvalidKey(format!("{key}: leading or trailing '/'")));
    }
    if key.contains('\0') || key.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return Err(StoreError::InvalidKey(format!("{key}: bad path segment")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("docs/a.txt").is_ok());
        assert!(validate_key("a").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("docs/").is_err());
        assert!(validate_key("docs//a").is_err());
        assert!(validate_key("docs/../etc/passwd").is_err());
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = StoreError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert!(timeout.is_retryable());
        assert!(StoreError::Unavailable("down".into()).is_retryable());
        assert!(!StoreError::NotFound("k".into()).is_retryable());
    }
}
