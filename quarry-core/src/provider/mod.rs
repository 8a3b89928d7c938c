//! Model provider abstraction layer.
//!
//! This module defines a common interface for model backends to provide
//! chat completions and embeddings. [`OllamaProvider`] talks to an Ollama
//! server over HTTP. With the `testing` feature, `FakeProvider` is a
//! deterministic in-process backend with failure injection for tests.

#[cfg(any(test, feature = "testing"))]
mod fake;
pub mod ollama;
mod types;

pub use types::{
    ChatRequest, ChatResponse, EmbedInput, EmbedRequest, EmbedResponse, Message, Provider,
    ProviderError, Result,
};

#[cfg(any(test, feature = "testing"))]
pub use fake::FakeProvider;
pub use ollama::OllamaProvider;
