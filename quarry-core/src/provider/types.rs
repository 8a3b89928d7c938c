//! Common types for model providers.

use crate::retry::Retryable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when interacting with a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure. Only the failure kind is displayed; the endpoint
    /// URL stays in `Debug` output.
    #[error("HTTP request failed: {}", request_failure_kind(.0))]
    Request(#[from] reqwest::Error),

    #[error("JSON parsing failed at line {}, column {}", .0.line(), .0.column())]
    Json(#[from] serde_json::Error),

    /// Non-success response. `message` holds the response body and is only
    /// meant for logs.
    #[error("API error: status {status}")]
    Api { status: u16, message: String },

    /// Error reported inside a successful streaming response (overload, out
    /// of memory). `message` is only meant for logs.
    #[error("model server reported an error mid-stream")]
    Stream { message: String },

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        ProviderError::Api {
            status,
            message: message.into(),
        }
    }
}

impl Retryable for ProviderError {
    /// Timeouts, connection failures, throttling and server errors are
    /// transient. Everything else is permanent.
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Request(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map_or(false, |s| s.as_u16() == 429 || s.is_server_error())
            }
            ProviderError::Api { status, .. } => *status == 429 || (500..600).contains(status),
            ProviderError::Stream { .. } => true,
            ProviderError::Json(_) | ProviderError::Other(_) => false,
        }
    }
}

fn request_failure_kind(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else if let Some(status) = e.status() {
        format!("status {}", status.as_u16())
    } else if e.is_decode() {
        "could not decode response".to_string()
    } else if e.is_body() {
        "response body interrupted".to_string()
    } else {
        "request error".to_string()
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Provider trait for model backends.
///
/// Implementations provide chat completions and embeddings through
/// different backends (an Ollama server, a fake for tests).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stream a chat completion.
    ///
    /// The callback is invoked for each chunk of the response.
    async fn chat<'a>(
        &'a self,
        request: ChatRequest,
        callback: Box<dyn FnMut(ChatResponse) + Send + 'a>,
    ) -> Result<()>;

    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for several texts, in input order.
    ///
    /// The default implementation embeds one text at a time.
    async fn embed_batch(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text, model).await?);
        }
        Ok(embeddings)
    }

    /// Run a chat completion to the end and return the concatenated content.
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        let mut answer = String::new();
        self.chat(
            request,
            Box::new(|chunk: ChatResponse| answer.push_str(&chunk.content)),
        )
        .await?;
        Ok(answer)
    }
}

/// Request for chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.7,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from chat completion (streaming chunk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub content: String,
    pub done: bool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Input of an embedding request: one text or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedInput {
    Single(String),
    Batch(Vec<String>),
}

/// Request for generating embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    pub input: EmbedInput,
}

/// Response containing embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub model: String,

    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classification() {
        assert!(ProviderError::api(429, "slow down").is_retryable());
        assert!(ProviderError::api(503, "unavailable").is_retryable());
        assert!(!ProviderError::api(400, "bad request").is_retryable());
        assert!(!ProviderError::api(404, "model not found").is_retryable());
        assert!(!ProviderError::Other("nope".into()).is_retryable());
    }

    #[test]
    fn test_api_error_display_hides_body() {
        let err = ProviderError::api(500, "stack trace with secrets");
        assert_eq!(err.to_string(), "API error: status 500");
    }

    #[test]
    fn test_stream_error_is_retryable_and_hidden() {
        let err = ProviderError::Stream {
            message: "gpu-node-7 out of memory".into(),
        };
        assert!(err.is_retryable());
        assert!(!err.to_string().contains("gpu-node-7"));
    }

    #[test]
    fn test_json_error_display_hides_input() {
        let err: ProviderError = serde_json::from_str::<u32>("\"internal-host:9000\"")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("JSON parsing failed at line 1"));
        assert!(!err.to_string().contains("internal-host"));
    }

    #[test]
    fn test_embed_request_shapes() {
        let single = EmbedRequest {
            model: "m".into(),
            input: EmbedInput::Single("hi".into()),
        };
        assert_eq!(
            serde_json::to_value(&single).unwrap(),
            serde_json::json!({"model": "m", "input": "hi"})
        );
        let batch = EmbedRequest {
            model: "m".into(),
            input: EmbedInput::Batch(vec!["a".into(), "b".into()]),
        };
        assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            serde_json::json!({"model": "m", "input": ["a", "b"]})
        );
    }
}
