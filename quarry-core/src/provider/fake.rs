//! Deterministic in-process provider.
//!
//! Embeddings are hashed bags of words, so texts sharing words land close to
//! each other. Chat replies are scripted. Failures can be injected to
//! exercise retry paths.

use super::types::*;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
pub struct FakeProvider {
    dim: usize,
    model_dims: HashMap<String, usize>,
    answer: String,
    embed_failures: AtomicU32,
    chat_failures: AtomicU32,
    failure_status: u16,
    embed_calls: AtomicUsize,
    embedded_texts: AtomicUsize,
    chat_calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl FakeProvider {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            model_dims: HashMap::new(),
            answer: "fake answer".to_string(),
            embed_failures: AtomicU32::new(0),
            chat_failures: AtomicU32::new(0),
            failure_status: 503,
            embed_calls: AtomicUsize::new(0),
            embedded_texts: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// Uses a different dimension for one model id.
    pub fn with_model_dim(mut self, model: impl Into<String>, dim: usize) -> Self {
        self.model_dims.insert(model.into(), dim);
        self
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = answer.into();
        self
    }

    /// Status code of injected failures. 503 is retryable, 400 is not.
    pub fn with_failure_status(mut self, status: u16) -> Self {
        self.failure_status = status;
        self
    }

    /// Makes the next `n` embedding calls fail.
    pub fn fail_next_embeds(&self, n: u32) {
        self.embed_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` chat calls fail.
    pub fn fail_next_chats(&self, n: u32) {
        self.chat_failures.store(n, Ordering::SeqCst);
    }

    /// Number of embedding calls made, batch calls counted once.
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Number of texts successfully embedded.
    pub fn embedded_texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Content of the last user message sent to `chat`.
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn dim_for(&self, model: &str) -> usize {
        self.model_dims.get(model).copied().unwrap_or(self.dim)
    }

    /// Hashed bag-of-words vector, L2-normalized.
    pub fn vector_for(&self, text: &str, model: &str) -> Vec<f32> {
        let dim = self.dim_for(model).max(1);
        let mut v = vec![0f32; dim];
        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            v[(h as usize) % dim] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn chat<'a>(
        &'a self,
        request: ChatRequest,
        mut callback: Box<dyn FnMut(ChatResponse) + Send + 'a>,
    ) -> Result<()> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.chat_failures) {
            return Err(ProviderError::api(self.failure_status, "injected chat failure"));
        }

        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone());
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = prompt;
        }

        // Two chunks, to exercise stream concatenation
        let split = self
            .answer
            .char_indices()
            .nth(self.answer.chars().count() / 2)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let (head, tail) = self.answer.split_at(split);
        for (content, done) in [(head, false), (tail, true)] {
            callback(ChatResponse {
                model: request.model.clone(),
                content: content.to_string(),
                done,
            });
        }
        Ok(())
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.embed_failures) {
            return Err(ProviderError::api(self.failure_status, "injected embed failure"));
        }
        self.embedded_texts.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text, model))
    }

    async fn embed_batch(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.embed_failures) {
            return Err(ProviderError::api(self.failure_status, "injected embed failure"));
        }
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t, model)).collect())
    }
}
