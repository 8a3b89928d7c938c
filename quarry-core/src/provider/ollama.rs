//! Ollama provider implementation.
//!
//! This module provides an Ollama HTTP API client that implements the Provider trait.

use super::types::*;
use crate::config::ProviderConfig;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Ollama HTTP API provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    http_client: reqwest::Client,
}

impl OllamaProvider {
    /// Creates a provider talking to `base_url`. Every request is bounded by
    /// `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Creates a provider for a configured region, or `None` if the region
    /// has no endpoint.
    pub fn for_region(config: &ProviderConfig, region: &str) -> Option<Result<Self>> {
        config
            .endpoint(region)
            .map(|url| Self::new(url, Duration::from_secs(config.timeout_secs)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_embed(&self, model: &str, input: EmbedInput) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let embed_request = EmbedRequest {
            model: model.to_string(),
            input,
        };

        let response = self.http_client.post(&url).json(&embed_request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::api(status.as_u16(), error_text));
        }

        let embed_response = response.json::<EmbedResponse>().await?;
        Ok(embed_response.embeddings)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn chat<'a>(
        &'a self,
        request: ChatRequest,
        mut callback: Box<dyn FnMut(ChatResponse) + Send + 'a>,
    ) -> Result<()> {
        let url = format!("{}/api/chat", self.base_url);

        let ollama_request = OllamaChatRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            options: {
                let mut opts = HashMap::new();
                opts.insert("temperature".to_string(), serde_json::json!(request.temperature));
                Some(opts)
            },
            stream: true,
        };

        let response = self.http_client.post(&url).json(&ollama_request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::api(status.as_u16(), error_text));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line = buffer.drain(..=newline_pos).collect::<Vec<_>>();
                if line.len() <= 1 {
                    continue;
                }
                let line_str = String::from_utf8_lossy(&line[..line.len() - 1]);
                handle_stream_line(&line_str, &mut callback)?;
            }
        }

        // A final line without a trailing newline
        if !buffer.is_empty() {
            let line_str = String::from_utf8_lossy(&buffer);
            handle_stream_line(line_str.trim(), &mut callback)?;
        }

        Ok(())
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        self.post_embed(model, EmbedInput::Single(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Other("No embeddings returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.post_embed(model, EmbedInput::Batch(texts.to_vec())).await?;
        if embeddings.len() != texts.len() {
            return Err(ProviderError::Other(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        debug!(model, count = embeddings.len(), "Embedded batch");
        Ok(embeddings)
    }
}

fn handle_stream_line(
    line: &str,
    callback: &mut Box<dyn FnMut(ChatResponse) + Send + '_>,
) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }
    if let Ok(error_line) = serde_json::from_str::<OllamaStreamError>(line) {
        warn!(error = %error_line.error, "Model server reported a stream error");
        return Err(ProviderError::Stream {
            message: error_line.error,
        });
    }
    if let Ok(ollama_response) = serde_json::from_str::<OllamaChatResponse>(line) {
        callback(ChatResponse {
            model: ollama_response.model,
            content: ollama_response.message.content,
            done: ollama_response.done,
        });
    }
    Ok(())
}

// Ollama-specific request/response types (internal)

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<HashMap<String, serde_json::Value>>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: OllamaMessage,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaStreamError {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Retryable;

    #[test]
    fn test_for_region() {
        let config = ProviderConfig::default();
        let provider = OllamaProvider::for_region(&config, "ap-northeast-1")
            .unwrap()
            .unwrap();
        assert_eq!(provider.base_url(), "http://localhost:11434");
        assert!(OllamaProvider::for_region(&config, "nowhere").is_none());
    }

    #[test]
    fn test_stream_lines() {
        let mut content = String::new();
        {
            let mut callback: Box<dyn FnMut(ChatResponse) + Send + '_> =
                Box::new(|r: ChatResponse| content.push_str(&r.content));
            handle_stream_line(
                r#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#,
                &mut callback,
            )
            .unwrap();
            handle_stream_line(
                r#"{"model":"m","message":{"role":"assistant","content":"lo"},"done":true}"#,
                &mut callback,
            )
            .unwrap();
            assert!(handle_stream_line(r#"{"error":"model not loaded"}"#, &mut callback).is_err());
        }
        assert_eq!(content, "Hello");
    }

    #[test]
    fn test_stream_error_line_is_retryable_and_hidden() {
        let mut callback: Box<dyn FnMut(ChatResponse) + Send + '_> = Box::new(|_| {});
        let err = handle_stream_line(r#"{"error":"gpu-node-7 out of memory"}"#, &mut callback)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Stream { ref message } if message.contains("gpu-node-7")));
        assert!(err.is_retryable());
        assert!(!err.to_string().contains("gpu-node-7"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_hides_url() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", Duration::from_secs(5)).unwrap();
        let err = provider.embed("hello", "m").await.unwrap_err();
        assert!(matches!(err, ProviderError::Request(_)));
        assert!(err.is_retryable());
        assert!(!err.to_string().contains("127.0.0.1"), "{}", err);
    }
}
