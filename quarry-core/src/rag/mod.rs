//! Retrieval Augmented Generation (RAG) system.
//!
//! This module implements the RAG pipeline over documents held in an
//! [`ObjectStore`](crate::store::ObjectStore).
//!
//! # Architecture
//!
//! - [`chunker`]: deterministic splitting of documents into hashed chunks
//! - [`embedder`]: batched, retried embedding calls with dimension checks
//! - [`artifact`]: on-store layout of a published index generation
//! - [`index`]: exact cosine search over one loaded generation
//! - [`builder`]: full and incremental index builds, atomic publish
//! - [`engine`]: query answering (embed, retrieve, assemble, generate)
//!
//! # How It Works
//!
//! 1. **Indexing Phase**:
//!    - Documents are split into chunks (default: 512 bytes with 50 byte overlap)
//!    - Each new chunk is converted to a vector embedding
//!    - Vectors and the metadata table are written as a new generation,
//!      then the manifest is swapped to point at it
//!
//! 2. **Retrieval Phase**:
//!    - The query is converted to a vector embedding
//!    - The index returns the top-k most similar chunks
//!    - Chunks map back to their documents through the metadata table
//!
//! 3. **Generation Phase**:
//!    - The documents are rendered into the prompt template
//!    - The chat model answers from that prompt

pub mod artifact;
pub mod builder;
pub mod chunker;
pub mod embedder;
pub mod engine;
pub mod index;

pub use builder::{BuildError, BuildReport, BuildRequest, BuildStatus, IndexBuilder, SkippedItem};
pub use chunker::{chunk_document, Chunk, ChunkError, ChunkingPolicy};
pub use embedder::{Embedder, EmbedderError};
pub use engine::{
    QueryError, QueryFailure, QueryRequest, QueryResult, QueryStage, RagEngine,
    DEFAULT_PROMPT_TEMPLATE,
};
pub use index::{IndexError, IndexHandle, ScoredVector, SimilarityIndex};
