//! Retrieval-augmented answering.
//!
//! [`RagEngine::answer`] runs one query through four stages:
//!
//! 1. **EmbedQuery**: load the index, check its embedding model, embed the query
//! 2. **Retrieve**: top-k search, vector ids mapped to document keys
//! 3. **AssemblePrompt**: fetch the documents and fill the prompt template
//! 4. **Generate**: one chat completion
//!
//! A failure in any stage ends the query; the error records the stage.

use super::chunker::content_hash;
use super::embedder::{Embedder, EmbedderError};
use super::index::{distinct_doc_keys, IndexError, ScoredVector, SimilarityIndex};
use crate::config::Config;
use crate::provider::{ChatRequest, Message, Provider, ProviderError};
use crate::retry::RetryPolicy;
use crate::store::ObjectStore;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Prompt used when a request brings no template of its own.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "You are a knowledgeable assistant. You have access to the following documents:\n\n{retrieved_docs}\n\nUser question: {user_query}\nPlease provide a helpful and concise answer based on the documents.";

const RETRIEVED_DOCS: &str = "{retrieved_docs}";
const USER_QUERY: &str = "{user_query}";

/// Stage of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStage {
    EmbedQuery,
    Retrieve,
    AssemblePrompt,
    Generate,
    Done,
    Failed,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::EmbedQuery => "embed_query",
            QueryStage::Retrieve => "retrieve",
            QueryStage::AssemblePrompt => "assemble_prompt",
            QueryStage::Generate => "generate",
            QueryStage::Done => "done",
            QueryStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    InvalidInput(String),

    #[error("Index was built with embedding model {index_model}, engine uses {configured}")]
    ModelMismatch {
        index_model: String,
        configured: String,
    },

    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("{0}")]
    Index(#[from] IndexError),

    #[error("Generation failed: {0}")]
    Generation(#[source] ProviderError),
}

/// A query that ended in [`QueryStage::Failed`].
#[derive(Debug, Error)]
#[error("Query failed during {stage}: {source}")]
pub struct QueryFailure {
    /// Stage that was running when the query failed
    pub stage: QueryStage,
    pub source: QueryError,
}

pub type Result<T> = std::result::Result<T, QueryFailure>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub index_key: String,
    pub metadata_key: String,
    pub query: String,
    pub top_k: usize,
    /// Empty or absent means the default template
    #[serde(default)]
    pub prompt_template: Option<String>,
}

impl QueryRequest {
    pub fn new(
        index_key: impl Into<String>,
        metadata_key: impl Into<String>,
        query: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            index_key: index_key.into(),
            metadata_key: metadata_key.into(),
            query: query.into(),
            top_k,
            prompt_template: None,
        }
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    /// Distinct document keys, best match first
    pub retrieved_doc_keys: Vec<String>,
    pub answer: String,
}

/// Answers queries against indexes stored in one bucket.
#[derive(Clone)]
pub struct RagEngine {
    store: Arc<dyn ObjectStore>,
    provider: Arc<dyn Provider>,
    embedder: Embedder,
    generation_model: String,
    temperature: f64,
    default_template: Option<String>,
    max_document_chars: usize,
    retry: RetryPolicy,
}

struct Tracker {
    stage: QueryStage,
}

impl Tracker {
    fn enter(&mut self, stage: QueryStage) {
        debug!(%stage, "Entering query stage");
        self.stage = stage;
    }

    fn fail(&self, source: impl Into<QueryError>) -> QueryFailure {
        let failure = QueryFailure {
            stage: self.stage,
            source: source.into(),
        };
        warn!(stage = %failure.stage, error = %failure.source, "Query failed");
        failure
    }
}

impl RagEngine {
    pub fn new(store: Arc<dyn ObjectStore>, provider: Arc<dyn Provider>, config: &Config) -> Self {
        let embedder = Embedder::new(provider.clone(), config.embedding.model.clone())
            .with_retry(config.retry.clone());
        Self {
            store,
            provider,
            embedder,
            generation_model: config.generation.model.clone(),
            temperature: config.generation.temperature,
            default_template: config.query.prompt_template.clone(),
            max_document_chars: config.query.max_document_chars,
            retry: config.retry.clone(),
        }
    }

    /// Loads the published index for `request` and answers from it.
    pub async fn answer(&self, request: &QueryRequest) -> Result<QueryResult> {
        let mut tracker = Tracker {
            stage: QueryStage::EmbedQuery,
        };
        validate(request).map_err(|e| tracker.fail(e))?;

        let index = SimilarityIndex::load(
            self.store.as_ref(),
            &request.index_key,
            &request.metadata_key,
            &self.retry,
        )
        .await
        .map_err(|e| tracker.fail(e))?;

        self.run(&index, request, &mut tracker).await
    }

    /// Answers from an already loaded index snapshot.
    pub async fn answer_with_index(
        &self,
        index: &SimilarityIndex,
        request: &QueryRequest,
    ) -> Result<QueryResult> {
        let mut tracker = Tracker {
            stage: QueryStage::EmbedQuery,
        };
        validate(request).map_err(|e| tracker.fail(e))?;
        self.run(index, request, &mut tracker).await
    }

    async fn run(
        &self,
        index: &SimilarityIndex,
        request: &QueryRequest,
        tracker: &mut Tracker,
    ) -> Result<QueryResult> {
        // EmbedQuery
        if index.embedding_model() != self.embedder.model() {
            return Err(tracker.fail(QueryError::ModelMismatch {
                index_model: index.embedding_model().to_string(),
                configured: self.embedder.model().to_string(),
            }));
        }
        let query_vector = if index.is_empty() {
            None
        } else {
            Some(
                self.embedder
                    .embed(&request.query)
                    .await
                    .map_err(|e| tracker.fail(e))?,
            )
        };

        tracker.enter(QueryStage::Retrieve);
        let hits = match &query_vector {
            Some(vector) => index
                .query(vector, request.top_k)
                .map_err(|e| tracker.fail(e))?,
            None => Vec::new(),
        };
        let retrieved_doc_keys = distinct_doc_keys(index, &hits);
        info!(
            index_key = %request.index_key,
            hits = hits.len(),
            documents = retrieved_doc_keys.len(),
            "Retrieved documents"
        );

        tracker.enter(QueryStage::AssemblePrompt);
        let docs = self.fetch_documents(index, &hits, &retrieved_doc_keys).await;
        let template = self.template_for(request);
        let prompt = render_prompt(template, &docs, &request.query);

        tracker.enter(QueryStage::Generate);
        let chat = ChatRequest::new(self.generation_model.clone(), vec![Message::user(prompt)])
            .with_temperature(self.temperature);
        let answer = self
            .retry
            .run("generate", || self.provider.complete(chat.clone()))
            .await
            .map_err(|e| tracker.fail(QueryError::Generation(e)))?;

        tracker.enter(QueryStage::Done);
        Ok(QueryResult {
            query: request.query.clone(),
            retrieved_doc_keys,
            answer,
        })
    }

    fn template_for<'a>(&'a self, request: &'a QueryRequest) -> &'a str {
        request
            .prompt_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                self.default_template
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
            })
            .unwrap_or(DEFAULT_PROMPT_TEMPLATE)
    }

    /// Fetches retrieved documents concurrently. Documents that cannot be
    /// read are left out of the prompt.
    async fn fetch_documents(
        &self,
        index: &SimilarityIndex,
        hits: &[ScoredVector],
        keys: &[String],
    ) -> Vec<(String, String)> {
        let fetches = keys.iter().map(|key| async move {
            let result = self.retry.run("read document", || self.store.get(key)).await;
            (key, result)
        });

        let mut docs = Vec::with_capacity(keys.len());
        for (key, result) in join_all(fetches).await {
            match result {
                Ok(object) => {
                    let text = String::from_utf8_lossy(&object.body).into_owned();
                    let spans: Vec<(usize, usize, &str)> = hits
                        .iter()
                        .filter_map(|hit| index.entry(hit.vector_id))
                        .filter(|entry| &entry.doc_key == key)
                        .map(|entry| (entry.start, entry.end, entry.content_hash.as_str()))
                        .collect();
                    let excerpt = excerpt(&text, &spans, self.max_document_chars);
                    docs.push((key.clone(), excerpt));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Document fetch failed, leaving it out of the prompt");
                }
            }
        }
        docs
    }
}

fn validate(request: &QueryRequest) -> std::result::Result<(), QueryError> {
    if request.query.trim().is_empty() {
        return Err(QueryError::InvalidInput("query must not be empty".into()));
    }
    if request.top_k == 0 {
        return Err(QueryError::InvalidInput("top_k must be at least 1".into()));
    }
    Ok(())
}

/// Text of a document to show the model.
///
/// When every retrieved span still matches its hash, the spans are shown in
/// document order; otherwise the document changed since indexing and the
/// whole text is used. Either way the result is capped at `max_chars`.
fn excerpt(text: &str, spans: &[(usize, usize, &str)], max_chars: usize) -> String {
    let spans_valid = !spans.is_empty()
        && spans.iter().all(|&(start, end, hash)| {
            end <= text.len()
                && start <= end
                && text.is_char_boundary(start)
                && text.is_char_boundary(end)
                && content_hash(&text[start..end]) == hash
        });

    let body = if spans_valid {
        let mut ranges: Vec<(usize, usize)> = spans.iter().map(|&(s, e, _)| (s, e)).collect();
        ranges.sort_unstable();
        let mut merged: Vec<(usize, usize)> = Vec::new();
        for (start, end) in ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        merged
            .iter()
            .map(|&(s, e)| &text[s..e])
            .collect::<Vec<_>>()
            .join("\n...\n")
    } else {
        text.to_string()
    };

    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => body[..cut].to_string(),
        None => body,
    }
}

/// Fills `{retrieved_docs}` and `{user_query}` in one pass, so text
/// inserted for one placeholder is never scanned for the other.
pub fn render_prompt(template: &str, docs: &[(String, String)], query: &str) -> String {
    let mut retrieved = String::new();
    for (i, (key, text)) in docs.iter().enumerate() {
        retrieved.push_str(&format!("[Doc{}] Key: {}\n{}\n\n", i, key, text));
    }

    let mut out = String::with_capacity(template.len() + retrieved.len() + query.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with(RETRIEVED_DOCS) {
            out.push_str(&retrieved);
            rest = &tail[RETRIEVED_DOCS.len()..];
        } else if tail.starts_with(USER_QUERY) {
            out.push_str(query);
            rest = &tail[USER_QUERY.len()..];
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
