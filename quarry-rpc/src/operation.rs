use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure of an operation, as reported to the caller.
///
/// Messages are meant for the caller; they never carry upstream response
/// bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
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

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OperationError>;

impl OperationError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            OperationError::InputValidation(_) => "INPUT_VALIDATION",
            OperationError::EmbeddingProvider(_) => "EMBEDDING_PROVIDER",
            OperationError::Generation(_) => "GENERATION",
            OperationError::IndexNotFound(_) => "INDEX_NOT_FOUND",
            OperationError::IndexCorrupt(_) => "INDEX_CORRUPT",
            OperationError::ModelMismatch(_) => "MODEL_MISMATCH",
            OperationError::Storage(_) => "STORAGE",
            OperationError::Unauthorized(_) => "UNAUTHORIZED",
            OperationError::UnknownOperation(_) => "UNKNOWN_OPERATION",
            OperationError::Internal(_) => "INTERNAL",
        }
    }

    fn from_code(code: &str, message: String) -> Self {
        match code {
            "INPUT_VALIDATION" => OperationError::InputValidation(message),
            "EMBEDDING_PROVIDER" => OperationError::EmbeddingProvider(message),
            "GENERATION" => OperationError::Generation(message),
            "INDEX_NOT_FOUND" => OperationError::IndexNotFound(message),
            "INDEX_CORRUPT" => OperationError::IndexCorrupt(message),
            "MODEL_MISMATCH" => OperationError::ModelMismatch(message),
            "STORAGE" => OperationError::Storage(message),
            "UNAUTHORIZED" => OperationError::Unauthorized(message),
            "UNKNOWN_OPERATION" => OperationError::UnknownOperation(message),
            _ => OperationError::Internal(message),
        }
    }
}

/// Caller scopes an operation may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// Callers holding the public API key
    pub public_api_key: bool,
    /// The owner of the deployment
    pub owner: bool,
}

impl Access {
    pub const PUBLIC_API_KEY: Self = Self {
        public_api_key: true,
        owner: false,
    };

    pub const OWNER: Self = Self {
        public_api_key: false,
        owner: true,
    };

    pub const ALL: Self = Self {
        public_api_key: true,
        owner: true,
    };

    pub const NONE: Self = Self {
        public_api_key: false,
        owner: false,
    };

    /// Check if a caller with this access satisfies `required`.
    pub fn allows(&self, required: &Access) -> bool {
        (!required.public_api_key || self.public_api_key) && (!required.owner || self.owner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Wire shape of every operation outcome.
///
/// Serializes to `{"ok":true,"data":...}` or
/// `{"ok":false,"error":{"code":...,"message":...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: &OperationError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
        }
    }

    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::failure(&e),
        }
    }

    /// Converts back into a result, e.g. on the client side of the wire.
    pub fn into_result(self) -> Result<Value> {
        match (self.ok, self.error) {
            (true, _) => Ok(self.data.unwrap_or(Value::Null)),
            (false, Some(body)) => Err(OperationError::from_code(&body.code, body.message)),
            (false, None) => Err(OperationError::Internal("failure without error body".into())),
        }
    }
}

/// Returns the argument object of an invocation.
///
/// Arguments arrive either flat or wrapped as `{"arguments": {...}}`.
pub fn unwrap_arguments(input: Value) -> Value {
    match input {
        Value::Object(mut map) if map.get("arguments").is_some_and(Value::is_object) => {
            map.remove("arguments").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Parses operation arguments into a typed request.
pub fn parse_arguments<T: DeserializeOwned>(input: Value) -> Result<T> {
    serde_json::from_value(unwrap_arguments(input))
        .map_err(|e| OperationError::InputValidation(format!("Invalid parameters: {}", e)))
}

/// Core trait that every exposed operation implements.
///
/// An operation is addressed by [`name`](Operation::name) and receives the
/// caller's JSON arguments.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Unique identifier callers use to invoke this operation.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn parameter_schema(&self) -> Value;

    /// Scope a caller needs to invoke this operation.
    fn required_access(&self) -> Access;

    async fn execute(&self, input: Value) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_access_allows() {
        assert!(Access::ALL.allows(&Access::OWNER));
        assert!(Access::PUBLIC_API_KEY.allows(&Access::PUBLIC_API_KEY));
        assert!(!Access::PUBLIC_API_KEY.allows(&Access::OWNER));
        assert!(Access::NONE.allows(&Access::NONE));
        assert!(!Access::NONE.allows(&Access::PUBLIC_API_KEY));
    }

    #[test]
    fn test_envelope_wire_shape() {
        let ok = serde_json::to_value(Envelope::success(json!({"answer": "hi"}))).unwrap();
        assert_eq!(ok, json!({"ok": true, "data": {"answer": "hi"}}));

        let err = OperationError::IndexNotFound("indexes/main".into());
        let failed = serde_json::to_value(Envelope::failure(&err)).unwrap();
        assert_eq!(failed["ok"], json!(false));
        assert_eq!(failed["error"]["code"], json!("INDEX_NOT_FOUND"));
        assert!(failed.get("data").is_none());
    }

    #[test]
    fn test_envelope_into_result_keeps_code() {
        let err = OperationError::ModelMismatch("a vs b".into());
        let back = Envelope::failure(&err).into_result().unwrap_err();
        assert_eq!(back.code(), "MODEL_MISMATCH");
    }

    #[test]
    fn test_unwrap_arguments() {
        let wrapped = json!({"arguments": {"query": "q"}, "identity": null});
        assert_eq!(unwrap_arguments(wrapped), json!({"query": "q"}));

        let flat = json!({"query": "q"});
        assert_eq!(unwrap_arguments(flat.clone()), flat);

        // A string field named "arguments" is an ordinary argument
        let odd = json!({"arguments": "x"});
        assert_eq!(unwrap_arguments(odd.clone()), odd);
    }

    #[test]
    fn test_parse_arguments_reports_input_validation() {
        #[derive(Debug, Deserialize)]
        struct Params {
            #[allow(dead_code)]
            query: String,
        }

        let err = parse_arguments::<Params>(json!({"query": 3})).unwrap_err();
        assert_eq!(err.code(), "INPUT_VALIDATION");
    }
}
