//! Index construction.
//!
//! [`IndexBuilder::build`] turns every document under a prefix into chunk
//! embeddings and publishes them as a new index generation. When the
//! previously published generation was built with the same embedding model
//! and chunking policy, unchanged chunks keep their vector and vector id and
//! are not sent to the provider again.

use super::artifact::{
    encode_vectors, is_artifact_of, metadata_object_key, unix_now, vectors_object_key,
    DocumentRecord, IndexEntry, Manifest, MetadataPointer, MetadataTable, MANIFEST_FORMAT,
    METADATA_VERSION,
};
use super::chunker::{chunk_document, content_hash, Chunk, ChunkingPolicy};
use super::embedder::{ensure_dimension, Embedder, EmbedderError};
use super::index::{read_manifest, IndexError, IndexHandle, SimilarityIndex};
use crate::config::{Config, FailurePolicy};
use crate::models::ModelRegistry;
use crate::patterns::{has_binary_extension, is_excluded, is_folder_marker, is_text_content_type};
use crate::provider::Provider;
use crate::retry::RetryPolicy;
use crate::store::{validate_key, ObjectStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid build request: {0}")]
    InvalidRequest(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("Failed to read document {key}: {source}")]
    DocumentFetch { key: String, source: StoreError },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

pub type Result<T> = std::result::Result<T, BuildError>;

/// Where to read documents from and where to publish the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub folder_prefix: String,
    pub index_key: String,
    pub metadata_key: String,
}

impl BuildRequest {
    pub fn new(
        folder_prefix: impl Into<String>,
        index_key: impl Into<String>,
        metadata_key: impl Into<String>,
    ) -> Self {
        Self {
            folder_prefix: folder_prefix.into(),
            index_key: index_key.into(),
            metadata_key: metadata_key.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, key) in [("index_key", &self.index_key), ("metadata_key", &self.metadata_key)] {
            validate_key(key).map_err(|e| BuildError::InvalidRequest(format!("{}: {}", name, e)))?;
        }
        if self.index_key == self.metadata_key {
            return Err(BuildError::InvalidRequest(
                "index_key and metadata_key must differ".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Every chunk was embedded from scratch
    Built,
    /// Unchanged chunks were carried over from the previous generation
    Updated,
    /// Nothing changed; no new generation was published
    Unchanged,
}

/// A document or part of one left out of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub key: String,
    pub reason: String,
    /// Chunks of the document that were left out; 0 when the whole document was
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub status: BuildStatus,
    pub index_key: String,
    pub metadata_key: String,
    pub generation: u64,
    /// Chunks embedded by this build
    pub embedded: usize,
    /// Chunks whose vector was carried over
    pub reused: usize,
    pub total_entries: usize,
    pub documents: usize,
    pub removed_documents: usize,
    pub skipped: Vec<SkippedItem>,
}

struct Previous {
    generation: u64,
    index: Option<IndexHandle>,
}

enum Fetched {
    Text { text: String, bytes: u64 },
    Skip(String),
}

enum VectorSource {
    /// Same document, same text: keep the old id
    Kept(u32),
    /// Same text seen elsewhere in the old index
    Copied(u32),
    Fresh,
}

struct PlannedChunk {
    chunk: Chunk,
    source: VectorSource,
}

/// Builds and incrementally rebuilds similarity indexes.
pub struct IndexBuilder {
    store: Arc<dyn ObjectStore>,
    embedder: Embedder,
    policy: ChunkingPolicy,
    batch_size: usize,
    failure_policy: FailurePolicy,
    exclude_patterns: Vec<String>,
    registry: ModelRegistry,
    retry: RetryPolicy,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn ObjectStore>, provider: Arc<dyn Provider>, config: &Config) -> Self {
        let embedder = Embedder::new(provider, config.embedding.model.clone())
            .with_retry(config.retry.clone());
        Self {
            store,
            embedder,
            policy: config.chunking,
            batch_size: config.build.batch_size.max(1),
            failure_policy: config.build.failure_policy,
            exclude_patterns: config.build.exclude_patterns.clone(),
            registry: ModelRegistry::new(),
            retry: config.retry.clone(),
        }
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn with_chunking(mut self, policy: ChunkingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Builds the index for `request` and publishes it.
    ///
    /// # Errors
    ///
    /// Under [`FailurePolicy::AllOrNothing`] any document read or embedding
    /// failure aborts the build. A failed build leaves the published index
    /// untouched.
    pub async fn build(&self, request: &BuildRequest) -> Result<BuildReport> {
        request.validate()?;
        self.policy
            .validate()
            .map_err(|e| BuildError::InvalidRequest(e.to_string()))?;

        let model = self.embedder.model().to_string();
        info!(
            prefix = %request.folder_prefix,
            index_key = %request.index_key,
            model = %model,
            "Starting index build"
        );

        let previous = self.load_previous(request).await?;
        let reusable = previous.index.clone().filter(|index| self.can_reuse(index));
        if previous.index.is_some() && reusable.is_none() {
            info!(index_key = %request.index_key, "Previous index incompatible, rebuilding from scratch");
        }

        let mut skipped = Vec::new();
        let mut documents = BTreeMap::new();
        let mut chunks = Vec::new();

        for key in self.list_documents(request, &mut skipped).await? {
            let fetched = match self.fetch_document(&key).await {
                Ok(fetched) => fetched,
                Err(source) => match self.failure_policy {
                    FailurePolicy::AllOrNothing => {
                        return Err(BuildError::DocumentFetch { key, source })
                    }
                    FailurePolicy::Partial => {
                        warn!(key = %key, error = %source, "Skipping unreadable document");
                        Fetched::Skip(format!("fetch failed: {}", source))
                    }
                },
            };

            match fetched {
                Fetched::Text { text, bytes } => {
                    let doc_chunks = chunk_document(&key, &text, &self.policy);
                    debug!(key = %key, chunks = doc_chunks.len(), "Chunked document");
                    documents.insert(
                        key,
                        DocumentRecord {
                            content_hash: content_hash(&text),
                            chunks: doc_chunks.len(),
                            bytes,
                        },
                    );
                    chunks.extend(doc_chunks);
                }
                Fetched::Skip(reason) => skipped.push(SkippedItem {
                    key,
                    reason,
                    chunks: 0,
                }),
            }
        }

        let removed_documents = previous
            .index
            .as_ref()
            .map(|index| {
                previous_doc_keys(index)
                    .iter()
                    .filter(|key| !documents.contains_key(key.as_str()))
                    .count()
            })
            .unwrap_or(0);

        let (planned, mut next_id) = plan_chunks(chunks, reusable.as_ref());

        if let Some(index) = &reusable {
            let all_kept = planned.iter().all(|p| matches!(p.source, VectorSource::Kept(_)));
            if all_kept && planned.len() == index.len() && documents == index.metadata().documents {
                info!(
                    index_key = %request.index_key,
                    generation = index.generation(),
                    "No changes since last build"
                );
                return Ok(BuildReport {
                    status: BuildStatus::Unchanged,
                    index_key: request.index_key.clone(),
                    metadata_key: request.metadata_key.clone(),
                    generation: index.generation(),
                    embedded: 0,
                    reused: index.len(),
                    total_entries: index.len(),
                    documents: documents.len(),
                    removed_documents: 0,
                    skipped,
                });
            }
        }

        let mut dimension = match &reusable {
            Some(index) if !index.is_empty() => Some(index.dimension()),
            _ => self.registry.embedding_dim(&model),
        };
        let (fresh_vectors, last_error) = self.embed_fresh(&planned, &mut dimension).await?;

        let mut entries = Vec::with_capacity(planned.len());
        let mut records: Vec<(u32, Vec<f32>)> = Vec::with_capacity(planned.len());
        let mut failed_chunks: BTreeMap<String, usize> = BTreeMap::new();
        let (mut embedded, mut reused) = (0, 0);

        for PlannedChunk { chunk, source } in planned {
            let (vector_id, vector) = match source {
                VectorSource::Kept(id) => {
                    reused += 1;
                    (id, previous_vector(reusable.as_ref(), id)?)
                }
                VectorSource::Copied(old_id) => {
                    reused += 1;
                    let id = take_id(&mut next_id);
                    (id, previous_vector(reusable.as_ref(), old_id)?)
                }
                VectorSource::Fresh => match fresh_vectors.get(&chunk.content_hash) {
                    Some(vector) => {
                        embedded += 1;
                        (take_id(&mut next_id), vector.clone())
                    }
                    None => {
                        *failed_chunks.entry(chunk.doc_key.clone()).or_default() += 1;
                        continue;
                    }
                },
            };
            entries.push(IndexEntry {
                vector_id,
                doc_key: chunk.doc_key,
                start: chunk.start,
                end: chunk.end,
                content_hash: chunk.content_hash,
            });
            records.push((vector_id, vector));
        }

        if !failed_chunks.is_empty() {
            if entries.is_empty() {
                if let Some(e) = last_error {
                    return Err(BuildError::Embedding(e));
                }
            }
            for (key, count) in failed_chunks {
                // Not recorded, so the next build retries the whole document
                documents.remove(&key);
                skipped.push(SkippedItem {
                    key,
                    reason: "embedding failed".to_string(),
                    chunks: count,
                });
            }
        }

        let generation = previous.generation + 1;
        let dimension = dimension.unwrap_or(0);
        let manifest = Manifest {
            format: MANIFEST_FORMAT,
            generation,
            dimension,
            count: entries.len(),
            embedding_model: model.clone(),
            vectors_key: vectors_object_key(&request.index_key, generation),
            metadata_key: request.metadata_key.clone(),
            metadata_object_key: metadata_object_key(&request.metadata_key, generation),
            created_at: unix_now(),
        };
        let table = MetadataTable {
            version: METADATA_VERSION,
            embedding_model: model,
            dimension,
            chunking: self.policy,
            generation,
            entries,
            documents,
        };

        let total_entries = table.entries.len();
        let document_count = table.documents.len();
        self.publish(request, &manifest, &table, &records).await?;
        self.sweep_generations(request, generation).await;

        let status = if reusable.is_some() {
            BuildStatus::Updated
        } else {
            BuildStatus::Built
        };
        info!(
            index_key = %request.index_key,
            generation,
            embedded,
            reused,
            total_entries,
            skipped = skipped.len(),
            "Published index"
        );

        Ok(BuildReport {
            status,
            index_key: request.index_key.clone(),
            metadata_key: request.metadata_key.clone(),
            generation,
            embedded,
            reused,
            total_entries,
            documents: document_count,
            removed_documents,
            skipped,
        })
    }

    fn can_reuse(&self, index: &SimilarityIndex) -> bool {
        index.embedding_model() == self.embedder.model()
            && index.metadata().chunking == self.policy
            && self
                .registry
                .embedding_dim(self.embedder.model())
                .map_or(true, |dim| dim == index.dimension())
    }

    async fn load_previous(&self, request: &BuildRequest) -> Result<Previous> {
        let store = self.store.as_ref();
        let manifest = match read_manifest(store, &request.index_key, &self.retry).await {
            Ok(manifest) => manifest,
            Err(IndexError::Corrupt(reason)) => {
                warn!(index_key = %request.index_key, %reason, "Ignoring unreadable manifest");
                let generation = self.latest_listed_generation(&request.index_key).await?;
                return Ok(Previous {
                    generation,
                    index: None,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let Some(manifest) = manifest else {
            return Ok(Previous {
                generation: self.latest_listed_generation(&request.index_key).await?,
                index: None,
            });
        };

        let index = match SimilarityIndex::load(
            store,
            &request.index_key,
            &request.metadata_key,
            &self.retry,
        )
        .await
        {
            Ok(index) => Some(index),
            Err(IndexError::Corrupt(reason)) | Err(IndexError::NotFound(reason)) => {
                warn!(index_key = %request.index_key, %reason, "Previous index unusable");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Previous {
            generation: manifest.generation,
            index,
        })
    }

    /// Highest generation number among objects next to `index_key`.
    async fn latest_listed_generation(&self, index_key: &str) -> Result<u64> {
        let prefix = format!("{}.gen-", index_key);
        let listed = self
            .retry
            .run("list generations", || self.store.list(&prefix))
            .await?;
        Ok(listed
            .iter()
            .filter_map(|meta| parse_generation(&meta.key, index_key))
            .max()
            .unwrap_or(0))
    }

    async fn list_documents(
        &self,
        request: &BuildRequest,
        skipped: &mut Vec<SkippedItem>,
    ) -> Result<Vec<String>> {
        let listed = self
            .retry
            .run("list documents", || self.store.list(&request.folder_prefix))
            .await?;

        let mut keys = Vec::with_capacity(listed.len());
        for meta in listed {
            let key = meta.key;
            if is_folder_marker(&key)
                || is_artifact_of(&key, &request.index_key)
                || is_artifact_of(&key, &request.metadata_key)
                || is_excluded(&key, &self.exclude_patterns)
            {
                continue;
            }
            if has_binary_extension(&key) {
                skipped.push(SkippedItem {
                    key,
                    reason: "binary file".to_string(),
                    chunks: 0,
                });
                continue;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    async fn fetch_document(&self, key: &str) -> std::result::Result<Fetched, StoreError> {
        let object = match self.retry.run("read document", || self.store.get(key)).await {
            Ok(object) => object,
            Err(StoreError::NotFound(_)) => {
                return Ok(Fetched::Skip("deleted during build".to_string()))
            }
            Err(e) => return Err(e),
        };

        if !is_text_content_type(object.content_type.as_deref()) {
            return Ok(Fetched::Skip(format!(
                "content type {}",
                object.content_type.unwrap_or_default()
            )));
        }

        let bytes = object.body.len() as u64;
        let text = match String::from_utf8(object.body) {
            Ok(text) => text,
            Err(e) => {
                debug!(key, "Document is not valid UTF-8, decoding lossily");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        Ok(Fetched::Text { text, bytes })
    }

    /// Embeds every distinct fresh chunk text, batch by batch.
    ///
    /// Returns vectors by content hash and, under the partial policy, the
    /// last batch error.
    async fn embed_fresh(
        &self,
        planned: &[PlannedChunk],
        dimension: &mut Option<usize>,
    ) -> Result<(HashMap<String, Vec<f32>>, Option<EmbedderError>)> {
        let mut seen = HashSet::new();
        let pending: Vec<(&str, &str)> = planned
            .iter()
            .filter(|p| matches!(p.source, VectorSource::Fresh))
            .filter(|p| seen.insert(p.chunk.content_hash.as_str()))
            .map(|p| (p.chunk.content_hash.as_str(), p.chunk.text.as_str()))
            .collect();

        let mut vectors_by_hash = HashMap::with_capacity(pending.len());
        let mut last_error = None;

        for (batch_no, batch) in pending.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.to_string()).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    let expected = match (*dimension, vectors.first()) {
                        (Some(dim), _) => dim,
                        (None, Some(first)) => first.len(),
                        (None, None) => continue,
                    };
                    ensure_dimension(expected, &vectors)?;
                    *dimension = Some(expected);
                    for ((hash, _), vector) in batch.iter().zip(vectors) {
                        vectors_by_hash.insert(hash.to_string(), vector);
                    }
                }
                Err(e) => match self.failure_policy {
                    FailurePolicy::AllOrNothing => return Err(BuildError::Embedding(e)),
                    FailurePolicy::Partial => {
                        warn!(batch = batch_no, size = batch.len(), error = %e, "Skipping failed batch");
                        last_error = Some(e);
                    }
                },
            }
        }

        Ok((vectors_by_hash, last_error))
    }

    async fn publish(
        &self,
        request: &BuildRequest,
        manifest: &Manifest,
        table: &MetadataTable,
        records: &[(u32, Vec<f32>)],
    ) -> Result<()> {
        let refs: Vec<(u32, &[f32])> = records.iter().map(|(id, v)| (*id, v.as_slice())).collect();
        let blob = encode_vectors(manifest.dimension, &refs)?;
        let table_json = serde_json::to_vec(table)
            .map_err(|e| BuildError::Index(IndexError::Corrupt(e.to_string())))?;
        let manifest_json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| BuildError::Index(IndexError::Corrupt(e.to_string())))?;
        let pointer_json =
            serde_json::to_vec_pretty(&MetadataPointer::for_manifest(manifest, &request.index_key))
                .map_err(|e| BuildError::Index(IndexError::Corrupt(e.to_string())))?;

        self.put(&manifest.vectors_key, blob, "application/octet-stream").await?;
        self.put(&manifest.metadata_object_key, table_json, "application/json").await?;
        // Swapping the manifest is the publish point
        self.put(&request.index_key, manifest_json, "application/json").await?;
        // Lags by at most one generation, which the sweep keeps
        self.put(&request.metadata_key, pointer_json, "application/json").await?;
        Ok(())
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.retry
            .run("write index artifact", || {
                self.store.put(key, body.clone(), Some(content_type))
            })
            .await?;
        Ok(())
    }

    /// Deletes generations older than the one before `current`.
    async fn sweep_generations(&self, request: &BuildRequest, current: u64) {
        for base in [&request.index_key, &request.metadata_key] {
            let prefix = format!("{}.gen-", base);
            let listed = match self.store.list(&prefix).await {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(prefix = %prefix, error = %e, "Failed to list old generations");
                    continue;
                }
            };
            for meta in listed {
                let Some(generation) = parse_generation(&meta.key, base) else {
                    continue;
                };
                if generation + 1 < current {
                    if let Err(e) = self.store.delete(&meta.key).await {
                        warn!(key = %meta.key, error = %e, "Failed to delete old generation");
                    } else {
                        debug!(key = %meta.key, "Deleted old generation");
                    }
                }
            }
        }
    }
}

/// Decides, chunk by chunk, where each vector will come from.
///
/// Returns the plan and the first id free for new vectors.
fn plan_chunks(chunks: Vec<Chunk>, reusable: Option<&IndexHandle>) -> (Vec<PlannedChunk>, u32) {
    let mut kept: HashMap<(String, String), VecDeque<u32>> = HashMap::new();
    let mut by_hash: HashMap<String, u32> = HashMap::new();
    let mut next_id = 0;

    if let Some(index) = reusable {
        for entry in &index.metadata().entries {
            kept.entry((entry.doc_key.clone(), entry.content_hash.clone()))
                .or_default()
                .push_back(entry.vector_id);
            by_hash
                .entry(entry.content_hash.clone())
                .or_insert(entry.vector_id);
            next_id = next_id.max(entry.vector_id + 1);
        }
    }

    let planned = chunks
        .into_iter()
        .map(|chunk| {
            let source = match kept
                .get_mut(&(chunk.doc_key.clone(), chunk.content_hash.clone()))
                .and_then(|ids| ids.pop_front())
            {
                Some(id) => VectorSource::Kept(id),
                None => match by_hash.get(&chunk.content_hash) {
                    Some(&id) => VectorSource::Copied(id),
                    None => VectorSource::Fresh,
                },
            };
            PlannedChunk { chunk, source }
        })
        .collect();

    (planned, next_id)
}

fn take_id(next_id: &mut u32) -> u32 {
    let id = *next_id;
    *next_id += 1;
    id
}

fn previous_vector(index: Option<&IndexHandle>, vector_id: u32) -> Result<Vec<f32>> {
    index
        .and_then(|index| index.vector(vector_id))
        .map(|v| v.to_vec())
        .ok_or_else(|| {
            BuildError::Index(IndexError::Corrupt(format!(
                "previous generation lacks vector {}",
                vector_id
            )))
        })
}

fn previous_doc_keys(index: &SimilarityIndex) -> HashSet<String> {
    index
        .metadata()
        .documents
        .keys()
        .cloned()
        .chain(index.metadata().entries.iter().map(|e| e.doc_key.clone()))
        .collect()
}

/// Generation number of `<base>.gen-<N>[.ext]`.
fn parse_generation(key: &str, base: &str) -> Option<u64> {
    key.strip_prefix(base)?
        .strip_prefix(".gen-")?
        .split('.')
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FakeProvider;
    use crate::store::MemoryStore;
    use std::time::Duration;

    const PREFIX: &str = "docs/";

    fn config() -> Config {
        let mut config = Config::default();
        config.embedding.model = "fake-embed".to_string();
        config.chunking = ChunkingPolicy::new(64, 8).unwrap();
        config.build.batch_size = 4;
        config.retry = RetryPolicy::default().with_initial_delay(Duration::from_millis(1));
        config
    }

    fn request() -> BuildRequest {
        BuildRequest::new(PREFIX, "index/main", "index/meta.json")
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let docs = [
            ("docs/rust.md", "Rust is a systems programming language focused on safety and speed."),
            ("docs/python.md", "Python is a dynamic language popular for scripting and data science."),
            ("docs/cooking.txt", "To bake bread you need flour, water, yeast and salt."),
        ];
        for (key, text) in docs {
            store.put(key, text.as_bytes().to_vec(), Some("text/markdown")).await.unwrap();
        }
        store
    }

    fn builder(store: &MemoryStore, provider: &Arc<FakeProvider>) -> IndexBuilder {
        IndexBuilder::new(Arc::new(store.clone()), provider.clone(), &config())
    }

    async fn load(store: &MemoryStore) -> IndexHandle {
        SimilarityIndex::load(store, "index/main", "index/meta.json", &RetryPolicy::no_retry())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_build() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        let report = builder(&store, &provider).build(&request()).await.unwrap();

        assert_eq!(report.status, BuildStatus::Built);
        assert_eq!(report.generation, 1);
        assert_eq!(report.documents, 3);
        assert_eq!(report.embedded, report.total_entries);
        assert!(report.total_entries >= 3);

        let index = load(&store).await;
        assert_eq!(index.len(), report.total_entries);
        assert_eq!(index.dimension(), 32);
        assert_eq!(index.embedding_model(), "fake-embed");
        let ids: Vec<u32> = index.metadata().entries.iter().map(|e| e.vector_id).collect();
        assert_eq!(ids, (0..report.total_entries as u32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_self_retrieval() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(64));
        builder(&store, &provider).build(&request()).await.unwrap();
        let index = load(&store).await;

        for entry in &index.metadata().entries {
            let text = store.get(&entry.doc_key).await.unwrap().body;
            let chunk = String::from_utf8(text[entry.start..entry.end].to_vec()).unwrap();
            let vector = provider.vector_for(&chunk, "fake-embed");
            let hits = index.query(&vector, 1).unwrap();
            let top = index.entry(hits[0].vector_id).unwrap();
            assert_eq!(top.doc_key, entry.doc_key);
        }
    }

    #[tokio::test]
    async fn test_rebuild_unchanged_is_noop() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        let builder = builder(&store, &provider);
        let first = builder.build(&request()).await.unwrap();
        let calls = provider.embed_calls();

        let second = builder.build(&request()).await.unwrap();
        assert_eq!(second.status, BuildStatus::Unchanged);
        assert_eq!(second.generation, first.generation);
        assert_eq!(second.embedded, 0);
        assert_eq!(second.total_entries, first.total_entries);
        assert_eq!(provider.embed_calls(), calls);
    }

    #[tokio::test]
    async fn test_incremental_rebuild_keeps_ids() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        let builder = builder(&store, &provider);
        builder.build(&request()).await.unwrap();
        let before = load(&store).await;

        store
            .put("docs/go.md", b"Go is a language with goroutines.".to_vec(), None)
            .await
            .unwrap();
        let texts_before = provider.embedded_texts();
        let report = builder.build(&request()).await.unwrap();

        assert_eq!(report.status, BuildStatus::Updated);
        assert_eq!(report.generation, 2);
        assert_eq!(report.embedded, 1);
        assert_eq!(report.reused, before.len());
        assert_eq!(provider.embedded_texts(), texts_before + 1);

        let after = load(&store).await;
        for entry in &before.metadata().entries {
            let kept = after.entry(entry.vector_id).unwrap();
            assert_eq!(kept.doc_key, entry.doc_key);
            assert_eq!(kept.content_hash, entry.content_hash);
            assert_eq!(after.vector(entry.vector_id), before.vector(entry.vector_id));
        }
        let new_entry = after
            .metadata()
            .entries
            .iter()
            .find(|e| e.doc_key == "docs/go.md")
            .unwrap();
        assert_eq!(new_entry.vector_id as usize, before.len());
    }

    #[tokio::test]
    async fn test_deleted_document_is_dropped() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        let builder = builder(&store, &provider);
        builder.build(&request()).await.unwrap();

        store.delete("docs/cooking.txt").await.unwrap();
        let report = builder.build(&request()).await.unwrap();
        assert_eq!(report.removed_documents, 1);
        assert_eq!(report.embedded, 0);

        let index = load(&store).await;
        assert!(index.metadata().entries.iter().all(|e| e.doc_key != "docs/cooking.txt"));
        assert!(!index.metadata().documents.contains_key("docs/cooking.txt"));
    }

    #[tokio::test]
    async fn test_model_change_forces_full_rebuild() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        builder(&store, &provider).build(&request()).await.unwrap();

        let mut other = config();
        other.embedding.model = "fake-embed-v2".to_string();
        let report = IndexBuilder::new(Arc::new(store.clone()), provider.clone(), &other)
            .build(&request())
            .await
            .unwrap();
        assert_eq!(report.status, BuildStatus::Built);
        assert_eq!(report.reused, 0);
        assert_eq!(load(&store).await.embedding_model(), "fake-embed-v2");
    }

    #[tokio::test]
    async fn test_skips_binary_artifacts_and_excluded() {
        let store = seeded_store().await;
        store.put("docs/photo.png", vec![0x89, 0x50], None).await.unwrap();
        store.put("docs/.git/config", b"[core]".to_vec(), None).await.unwrap();
        store
            .put("docs/manual.pdf.bin", b"x".to_vec(), Some("application/pdf"))
            .await
            .unwrap();
        store
            .put("docs/report", b"%PDF".to_vec(), Some("application/pdf"))
            .await
            .unwrap();
        let provider = Arc::new(FakeProvider::new(32));
        let request = BuildRequest::new(PREFIX, "docs/index", "docs/index-meta.json");

        let first = builder(&store, &provider).build(&request).await.unwrap();
        assert_eq!(first.documents, 3);
        let skipped: Vec<&str> = first.skipped.iter().map(|s| s.key.as_str()).collect();
        assert!(skipped.contains(&"docs/photo.png"));
        assert!(skipped.contains(&"docs/report"));

        // Artifacts now live under the prefix; they must not be indexed
        let second = builder(&store, &provider).build(&request).await.unwrap();
        assert_eq!(second.status, BuildStatus::Unchanged);
    }

    #[tokio::test]
    async fn test_non_utf8_is_decoded_lossily() {
        let store = MemoryStore::new();
        store
            .put("docs/latin1.txt", b"caf\xe9 au lait".to_vec(), None)
            .await
            .unwrap();
        let provider = Arc::new(FakeProvider::new(16));
        let report = builder(&store, &provider).build(&request()).await.unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.total_entries, 1);
    }

    #[tokio::test]
    async fn test_all_or_nothing_leaves_index_untouched() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        let builder = builder(&store, &provider);
        builder.build(&request()).await.unwrap();
        let before = store.get("index/main").await.unwrap().body;

        store
            .put("docs/new.md", b"Something new to embed".to_vec(), None)
            .await
            .unwrap();
        provider.fail_next_embeds(3);
        let err = builder.build(&request()).await.unwrap_err();
        assert!(matches!(err, BuildError::Embedding(_)));
        assert_eq!(store.get("index/main").await.unwrap().body, before);
    }

    #[tokio::test]
    async fn test_partial_policy_skips_failed_batch() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        let mut cfg = config();
        cfg.build.batch_size = 1;
        cfg.build.failure_policy = FailurePolicy::Partial;
        let builder = IndexBuilder::new(Arc::new(store.clone()), provider.clone(), &cfg);

        // First batch exhausts its three attempts
        provider.fail_next_embeds(3);
        let report = builder.build(&request()).await.unwrap();
        assert_eq!(report.status, BuildStatus::Built);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, "embedding failed");
        assert_eq!(report.documents, 2);

        // The skipped document is picked up by the next build
        let retry = builder.build(&request()).await.unwrap();
        assert_eq!(retry.status, BuildStatus::Updated);
        assert_eq!(retry.documents, 3);
        assert!(retry.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_build() {
        let store = seeded_store().await;
        // Registry says nomic-embed-text has 768 dimensions
        let provider = Arc::new(FakeProvider::new(32));
        let mut cfg = config();
        cfg.embedding.model = "nomic-embed-text".to_string();
        let err = IndexBuilder::new(Arc::new(store.clone()), provider, &cfg)
            .build(&request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Embedding(EmbedderError::DimensionMismatch { expected: 768, actual: 32 })
        ));
        assert!(matches!(store.get("index/main").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_prefix_publishes_empty_index() {
        let store = MemoryStore::new();
        let provider = Arc::new(FakeProvider::new(16));
        let report = builder(&store, &provider).build(&request()).await.unwrap();
        assert_eq!(report.total_entries, 0);
        let index = load(&store).await;
        assert!(index.is_empty());
        assert!(index.query(&[1.0; 16], 3).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_old_generations_are_swept() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        let builder = builder(&store, &provider);
        for i in 0..3 {
            store
                .put(&format!("docs/extra-{}.md", i), format!("extra {}", i).into_bytes(), None)
                .await
                .unwrap();
            builder.build(&request()).await.unwrap();
        }
        let keys: Vec<String> = store
            .list("index/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert!(keys.contains(&"index/main.gen-3.vec".to_string()));
        assert!(keys.contains(&"index/main.gen-2.vec".to_string()));
        assert!(!keys.contains(&"index/main.gen-1.vec".to_string()));
        assert!(!keys.contains(&"index/meta.json.gen-1.json".to_string()));
    }

    #[tokio::test]
    async fn test_metadata_key_points_at_current_table() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        let builder = builder(&store, &provider);
        builder.build(&request()).await.unwrap();
        store.delete("docs/cooking.txt").await.unwrap();
        let report = builder.build(&request()).await.unwrap();

        let body = store.get("index/meta.json").await.unwrap().body;
        let pointer: MetadataPointer = serde_json::from_slice(&body).unwrap();
        assert_eq!(pointer.generation, report.generation);
        assert_eq!(pointer.index_key, "index/main");

        let table = store.get(&pointer.metadata_object_key).await.unwrap().body;
        let table: MetadataTable = serde_json::from_slice(&table).unwrap();
        assert_eq!(table.generation, 2);
        assert!(!table.documents.contains_key("docs/cooking.txt"));
    }

    #[tokio::test]
    async fn test_snapshot_survives_rebuild() {
        let store = seeded_store().await;
        let provider = Arc::new(FakeProvider::new(32));
        let builder = builder(&store, &provider);
        builder.build(&request()).await.unwrap();
        let snapshot = load(&store).await;
        let query = provider.vector_for("bread flour yeast", "fake-embed");
        let before = snapshot.query(&query, 2).unwrap();

        store.delete("docs/cooking.txt").await.unwrap();
        builder.build(&request()).await.unwrap();

        assert_eq!(snapshot.generation(), 1);
        assert_eq!(snapshot.query(&query, 2).unwrap(), before);
        assert_eq!(load(&store).await.generation(), 2);
    }

    #[test]
    fn test_parse_generation() {
        assert_eq!(parse_generation("idx.gen-12.vec", "idx"), Some(12));
        assert_eq!(parse_generation("meta.json.gen-3.json", "meta.json"), Some(3));
        assert_eq!(parse_generation("idx.gen-x.vec", "idx"), None);
        assert_eq!(parse_generation("other", "idx"), None);
    }

    #[test]
    fn test_request_validation() {
        assert!(BuildRequest::new("docs/", "", "meta").validate().is_err());
        assert!(BuildRequest::new("docs/", "idx", "idx").validate().is_err());
        assert!(BuildRequest::new("docs/", "idx", "meta").validate().is_ok());
    }
}
