//! quarry-core - Retrieval-augmented query engine
//!
//! Provides the components for answering questions over documents kept in
//! an object store:
//! - Object store abstraction (in-memory and filesystem buckets)
//! - Model provider abstraction (Ollama; a deterministic fake behind `testing`)
//! - Chunking, embedding and similarity index construction
//! - Query answering over a published index
//! - Configuration, retry policy and error taxonomy
//!
//! ## Primary API
//!
//! [`IndexBuilder`] builds and publishes an index; [`RagEngine`] answers
//! queries against it. Both take their collaborators and a [`Config`]
//! explicitly.

pub mod config;
pub mod error;
pub mod models;
pub mod patterns;
pub mod provider;
pub mod rag;
pub mod retry;
pub mod store;

pub use config::{BucketMode, Config, ConfigError, FailurePolicy};
pub use error::{Error, Result};
pub use models::ModelRegistry;
pub use rag::{
    BuildReport, BuildRequest, BuildStatus, ChunkingPolicy, IndexBuilder, QueryRequest,
    QueryResult, RagEngine, SimilarityIndex,
};
pub use retry::{RetryPolicy, Retryable};
pub use store::{create_object_store, FsStore, MemoryStore, Object, ObjectStore, StoreError};

// Provider exports
pub use provider::{
    ChatRequest, ChatResponse, Message, OllamaProvider, Provider, ProviderError,
};

#[cfg(any(test, feature = "testing"))]
pub use provider::FakeProvider;
