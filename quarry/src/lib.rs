//! quarry - Retrieval-augmented question answering over an object store
//!
//! This is the convenience wrapper crate that re-exports quarry components
//! with optional feature flags for easy usage.
//!
//! # Quick Start
//!
//! ```toml
//! [dependencies]
//! quarry = "0.1"  # Includes core + the embedding/ragChat operations by default
//! ```
//!
//! # Features
//!
//! - `ops` (default): Include the `embedding` and `ragChat` operations

// Re-export core
pub use quarry_core::*;
pub use quarry_rpc;

#[cfg(feature = "ops")]
pub use quarry_ops;

/// Prelude module for convenient imports
pub mod prelude {
    pub use quarry_core::*;
    pub use quarry_rpc::{Access, Envelope, Operation, OperationRegistry};

    #[cfg(feature = "ops")]
    pub use quarry_ops::{default_registry, ServiceContext};
}

#[cfg(all(test, feature = "ops"))]
mod tests {
    use crate::prelude::*;
    use quarry_core::FakeProvider;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_prelude_end_to_end() {
        let mut config = Config::default();
        config.embedding.model = "fake-embed".to_string();

        let store = MemoryStore::new();
        store
            .put("notes/tea.md", b"Green tea is steeped at 80 degrees.".to_vec(), None)
            .await
            .unwrap();

        let provider = Arc::new(FakeProvider::new(128).with_answer("80 degrees."));
        let context = ServiceContext::new(config)
            .with_bucket("kb", Arc::new(store))
            .with_provider("ap-northeast-1", provider);
        let registry = default_registry(Arc::new(context), Access::PUBLIC_API_KEY);

        let built = registry
            .invoke(
                "embedding",
                json!({
                    "s3_bucket": "kb",
                    "s3_folder_prefix": "notes/",
                    "s3_index_key": "idx/main",
                    "metadata_key": "idx/meta.json"
                }),
            )
            .await;
        assert!(built.ok, "{:?}", built.error);

        let answered = registry
            .invoke(
                "ragChat",
                json!({"arguments": {
                    "s3_bucket": "kb",
                    "s3_index_key": "idx/main",
                    "metadata_key": "idx/meta.json",
                    "query": "How hot should green tea be?"
                }}),
            )
            .await
            .into_result()
            .unwrap();
        assert_eq!(answered["answer"], json!("80 degrees."));
        assert_eq!(answered["retrieved_doc_keys"], json!(["notes/tea.md"]));
    }
}
