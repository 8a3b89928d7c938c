//! Catalogue of embedding and chat models.

mod registry;

pub use registry::{default_models, ChatModel, EmbeddingModel, Model, ModelRegistry};
