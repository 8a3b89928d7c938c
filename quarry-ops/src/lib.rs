//! Operations exposed by a quarry deployment.
//!
//! - `embedding`: builds or refreshes the index over a folder of a bucket
//! - `ragChat`: answers a question from a published index
//!
//! Both resolve buckets and model regions through a shared
//! [`ServiceContext`].

mod context;
mod embedding;
mod error;
mod rag_chat;

pub use context::ServiceContext;
pub use embedding::EmbeddingOperation;
pub use error::to_operation_error;
pub use rag_chat::RagChatOperation;

use quarry_rpc::{Access, OperationRegistry};
use std::sync::Arc;

/// Registry with every operation in this crate registered.
pub fn default_registry(context: Arc<ServiceContext>, granted: Access) -> OperationRegistry {
    let mut registry = OperationRegistry::new(granted);
    registry.register(Arc::new(EmbeddingOperation::new(context.clone())));
    registry.register(Arc::new(RagChatOperation::new(context)));
    registry
}
