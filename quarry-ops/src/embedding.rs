use crate::error::to_operation_error;
use crate::ServiceContext;
use async_trait::async_trait;
use quarry_core::{BuildRequest, IndexBuilder};
use quarry_rpc::{parse_arguments, Access, Operation, OperationError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Builds or refreshes the index over one folder of a bucket.
pub struct EmbeddingOperation {
    context: Arc<ServiceContext>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingParams {
    s3_bucket: String,
    s3_folder_prefix: String,
    s3_index_key: String,
    #[serde(default)]
    bedrock_region: Option<String>,
    metadata_key: String,
}

impl EmbeddingOperation {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }
}

/// Rejects required string fields that are empty or blank.
pub(crate) fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OperationError::InputValidation(format!(
            "{} must be a non-empty string",
            name
        )));
    }
    Ok(())
}

/// Treats an empty optional string as absent.
pub(crate) fn optional(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

#[async_trait]
impl Operation for EmbeddingOperation {
    fn name(&self) -> &str {
        "embedding"
    }

    fn description(&self) -> &str {
        "Build or refresh the similarity index over the documents under a folder prefix"
    }

    fn parameter_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["s3_bucket", "s3_folder_prefix", "s3_index_key", "metadata_key"],
            "properties": {
                "s3_bucket": {
                    "type": "string",
                    "description": "Bucket holding the documents and the index"
                },
                "s3_folder_prefix": {
                    "type": "string",
                    "description": "Key prefix of the documents to index"
                },
                "s3_index_key": {
                    "type": "string",
                    "description": "Key the index manifest is published under"
                },
                "bedrock_region": {
                    "type": "string",
                    "description": "Model region; the configured default when omitted"
                },
                "metadata_key": {
                    "type": "string",
                    "description": "Key the metadata table is published under"
                }
            }
        })
    }

    fn required_access(&self) -> Access {
        Access::PUBLIC_API_KEY
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let params: EmbeddingParams = parse_arguments(input)?;
        require("s3_bucket", &params.s3_bucket)?;
        require("s3_folder_prefix", &params.s3_folder_prefix)?;
        require("s3_index_key", &params.s3_index_key)?;
        require("metadata_key", &params.metadata_key)?;

        let store = self.context.store(&params.s3_bucket)?;
        let provider = self.context.provider(optional(&params.bedrock_region))?;
        let request = BuildRequest::new(
            params.s3_folder_prefix,
            params.s3_index_key,
            params.metadata_key,
        );

        let _slot = self
            .context
            .lock_index(&params.s3_bucket, &request.index_key)
            .await;

        info!(
            bucket = %params.s3_bucket,
            prefix = %request.folder_prefix,
            index_key = %request.index_key,
            "Running embedding"
        );

        let builder = IndexBuilder::new(store, provider, self.context.config());
        let report = builder
            .build(&request)
            .await
            .map_err(|e| to_operation_error(e.into()))?;

        serde_json::to_value(report).map_err(|e| OperationError::Internal(e.to_string()))
    }
}
