use crate::embedding::{optional, require};
use crate::error::to_operation_error;
use crate::ServiceContext;
use async_trait::async_trait;
use quarry_core::{QueryRequest, RagEngine};
use quarry_rpc::{parse_arguments, Access, Operation, OperationError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Answers a question from a published index.
pub struct RagChatOperation {
    context: Arc<ServiceContext>,
}

#[derive(Debug, Deserialize)]
struct RagChatParams {
    s3_bucket: String,
    s3_index_key: String,
    metadata_key: String,
    query: String,
    #[serde(default)]
    top_k: Option<i64>,
    #[serde(default)]
    prompt_template: Option<String>,
    #[serde(default)]
    bedrock_region: Option<String>,
}

impl RagChatOperation {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    fn top_k(&self, requested: Option<i64>) -> Result<usize> {
        match requested {
            None => Ok(self.context.config().query.default_top_k),
            Some(k) if k > 0 => usize::try_from(k)
                .map_err(|_| OperationError::InputValidation("top_k is too large".into())),
            Some(k) => Err(OperationError::InputValidation(format!(
                "top_k must be a positive integer, got {}",
                k
            ))),
        }
    }
}

#[async_trait]
impl Operation for RagChatOperation {
    fn name(&self) -> &str {
        "ragChat"
    }

    fn description(&self) -> &str {
        "Answer a question using the documents most similar to it"
    }

    fn parameter_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["s3_bucket", "s3_index_key", "metadata_key", "query"],
            "properties": {
                "s3_bucket": {
                    "type": "string",
                    "description": "Bucket holding the index and the documents"
                },
                "s3_index_key": {
                    "type": "string",
                    "description": "Key of the published index manifest"
                },
                "metadata_key": {
                    "type": "string",
                    "description": "Key of the metadata table the index was built with"
                },
                "query": {
                    "type": "string",
                    "description": "The user question"
                },
                "top_k": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Number of chunks to retrieve"
                },
                "prompt_template": {
                    "type": "string",
                    "description": "Template with {retrieved_docs} and {user_query} placeholders"
                },
                "bedrock_region": {
                    "type": "string",
                    "description": "Model region; the configured default when omitted"
                }
            }
        })
    }

    fn required_access(&self) -> Access {
        Access::PUBLIC_API_KEY
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let params: RagChatParams = parse_arguments(input)?;
        require("s3_bucket", &params.s3_bucket)?;
        require("s3_index_key", &params.s3_index_key)?;
        require("metadata_key", &params.metadata_key)?;
        require("query", &params.query)?;
        let top_k = self.top_k(params.top_k)?;

        let store = self.context.store(&params.s3_bucket)?;
        let provider = self.context.provider(optional(&params.bedrock_region))?;

        let mut request =
            QueryRequest::new(params.s3_index_key, params.metadata_key, params.query, top_k);
        if let Some(template) = params.prompt_template {
            request = request.with_prompt_template(template);
        }

        info!(
            bucket = %params.s3_bucket,
            index_key = %request.index_key,
            top_k,
            "Running ragChat"
        );

        let engine = RagEngine::new(store, provider, self.context.config());
        let result = engine
            .answer(&request)
            .await
            .map_err(|e| to_operation_error(e.into()))?;

        serde_json::to_value(result).map_err(|e| OperationError::Internal(e.to_string()))
    }
}
