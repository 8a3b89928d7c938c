use quarry_core::Error;
use quarry_rpc::OperationError;

/// Maps an engine error onto the wire taxonomy.
pub fn to_operation_error(error: Error) -> OperationError {
    let message = error.to_string();
    match error {
        Error::InputValidation(m) => OperationError::InputValidation(m),
        Error::EmbeddingProvider(m) => OperationError::EmbeddingProvider(m),
        Error::Generation(m) => OperationError::Generation(m),
        Error::IndexNotFound(m) => OperationError::IndexNotFound(m),
        Error::IndexCorrupt(m) => OperationError::IndexCorrupt(m),
        Error::ModelMismatch(m) => OperationError::ModelMismatch(m),
        Error::DocumentFetch(_) | Error::Storage(_) => OperationError::Storage(message),
        Error::Config(_) => OperationError::Internal(message),
    }
}
