//! Exact cosine-similarity index over one published generation.
//!
//! A [`SimilarityIndex`] is immutable once loaded and shared as an
//! [`IndexHandle`]. A rebuild publishes a new generation; handles loaded
//! earlier keep answering from the generation they were loaded from.

use super::artifact::{
    decode_vectors, IndexEntry, Manifest, MetadataTable, VectorBlob, MANIFEST_FORMAT,
    METADATA_VERSION,
};
use crate::retry::RetryPolicy;
use crate::store::{ObjectStore, StoreError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Attempts at reading a consistent manifest/generation pair.
const LOAD_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index not found: {0}")]
    NotFound(String),

    #[error("Index corrupt: {0}")]
    Corrupt(String),

    #[error("Vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to encode index: {0}")]
    Encode(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Shared, read-only snapshot of an index.
pub type IndexHandle = Arc<SimilarityIndex>;

/// A query hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredVector {
    pub vector_id: u32,
    pub score: f32,
}

#[derive(Debug)]
pub struct SimilarityIndex {
    manifest: Manifest,
    metadata: MetadataTable,
    ids: Vec<u32>,
    /// Row-major, `ids.len() × dimension`
    vectors: Vec<f32>,
    norms: Vec<f32>,
    rows_by_id: HashMap<u32, usize>,
    entries_by_id: HashMap<u32, usize>,
}

impl SimilarityIndex {
    /// Assembles an index from its three parts, checking they agree.
    pub fn from_parts(manifest: Manifest, metadata: MetadataTable, blob: VectorBlob) -> Result<Self> {
        if manifest.format != MANIFEST_FORMAT {
            return Err(IndexError::Corrupt(format!(
                "unsupported manifest format {}",
                manifest.format
            )));
        }
        if metadata.version != METADATA_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported metadata version {}",
                metadata.version
            )));
        }
        if blob.dimension != manifest.dimension || metadata.dimension != manifest.dimension {
            return Err(IndexError::Corrupt(format!(
                "dimension disagrees: manifest {}, vectors {}, metadata {}",
                manifest.dimension, blob.dimension, metadata.dimension
            )));
        }
        if blob.records.len() != manifest.count || metadata.entries.len() != manifest.count {
            return Err(IndexError::Corrupt(format!(
                "entry count disagrees: manifest {}, vectors {}, metadata {}",
                manifest.count,
                blob.records.len(),
                metadata.entries.len()
            )));
        }
        if metadata.embedding_model != manifest.embedding_model
            || metadata.generation != manifest.generation
        {
            return Err(IndexError::Corrupt(
                "metadata table does not belong to this manifest".into(),
            ));
        }

        let mut entries_by_id = HashMap::with_capacity(metadata.entries.len());
        for (pos, entry) in metadata.entries.iter().enumerate() {
            if entry.start > entry.end {
                return Err(IndexError::Corrupt(format!(
                    "entry {} has an inverted span",
                    entry.vector_id
                )));
            }
            if entries_by_id.insert(entry.vector_id, pos).is_some() {
                return Err(IndexError::Corrupt(format!(
                    "duplicate vector id {} in metadata",
                    entry.vector_id
                )));
            }
        }

        let dimension = manifest.dimension;
        let mut ids = Vec::with_capacity(blob.records.len());
        let mut vectors = Vec::with_capacity(blob.records.len() * dimension);
        let mut norms = Vec::with_capacity(blob.records.len());
        let mut rows_by_id = HashMap::with_capacity(blob.records.len());
        for (row, (vector_id, vector)) in blob.records.into_iter().enumerate() {
            if !entries_by_id.contains_key(&vector_id) {
                return Err(IndexError::Corrupt(format!(
                    "vector {} has no metadata entry",
                    vector_id
                )));
            }
            if rows_by_id.insert(vector_id, row).is_some() {
                return Err(IndexError::Corrupt(format!(
                    "duplicate vector id {} in vectors",
                    vector_id
                )));
            }
            norms.push(norm(&vector));
            vectors.extend_from_slice(&vector);
            ids.push(vector_id);
        }

        Ok(Self {
            manifest,
            metadata,
            ids,
            vectors,
            norms,
            rows_by_id,
            entries_by_id,
        })
    }

    /// Loads the generation currently published at `index_key`.
    ///
    /// # Errors
    ///
    /// - [`IndexError::NotFound`] if nothing is published at `index_key`,
    ///   or it was built for another `metadata_key`
    /// - [`IndexError::Corrupt`] if the artifacts are unreadable or disagree
    pub async fn load(
        store: &dyn ObjectStore,
        index_key: &str,
        metadata_key: &str,
        retry: &RetryPolicy,
    ) -> Result<IndexHandle> {
        let mut last_missing = String::new();

        for attempt in 1..=LOAD_ATTEMPTS {
            let manifest = read_manifest(store, index_key, retry)
                .await?
                .ok_or_else(|| IndexError::NotFound(index_key.to_string()))?;

            if manifest.metadata_key != metadata_key {
                return Err(IndexError::NotFound(format!(
                    "{} was built with metadata key {}, not {}",
                    index_key, manifest.metadata_key, metadata_key
                )));
            }

            let vectors = read_object(store, &manifest.vectors_key, retry).await?;
            let metadata = read_object(store, &manifest.metadata_object_key, retry).await?;

            match (vectors, metadata) {
                (Some(vectors), Some(metadata)) => {
                    let blob = decode_vectors(&vectors)?;
                    let table: MetadataTable = serde_json::from_slice(&metadata).map_err(|e| {
                        IndexError::Corrupt(format!("metadata table is not valid JSON: {}", e))
                    })?;
                    let index = Self::from_parts(manifest, table, blob)?;
                    debug!(
                        index_key,
                        generation = index.generation(),
                        entries = index.len(),
                        "Loaded index"
                    );
                    return Ok(Arc::new(index));
                }
                (vectors, _) => {
                    // Generation swept by a concurrent publish; the manifest has moved on
                    last_missing = if vectors.is_none() {
                        manifest.vectors_key.clone()
                    } else {
                        manifest.metadata_object_key.clone()
                    };
                    warn!(
                        index_key,
                        attempt,
                        missing = %last_missing,
                        "Index generation missing, re-reading manifest"
                    );
                }
            }
        }

        Err(IndexError::Corrupt(format!(
            "manifest at {} points to missing object {}",
            index_key, last_missing
        )))
    }

    /// Top-k most similar vectors, best first. Ties go to the lower id.
    ///
    /// # Errors
    ///
    /// - [`IndexError::InvalidTopK`] if `top_k` is 0
    /// - [`IndexError::DimensionMismatch`] if `vector` has the wrong length
    pub fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredVector>> {
        if top_k == 0 {
            return Err(IndexError::InvalidTopK);
        }
        if self.is_empty() && self.dimension() == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }

        let query_norm = norm(vector);
        let dimension = self.dimension();
        let mut scored: Vec<ScoredVector> = self
            .ids
            .iter()
            .enumerate()
            .map(|(row, &vector_id)| {
                let stored = &self.vectors[row * dimension..(row + 1) * dimension];
                let denom = query_norm * self.norms[row];
                let score = if denom > 0.0 { dot(vector, stored) / denom } else { 0.0 };
                ScoredVector { vector_id, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.vector_id.cmp(&b.vector_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    pub fn entry(&self, vector_id: u32) -> Option<&IndexEntry> {
        self.entries_by_id
            .get(&vector_id)
            .map(|&pos| &self.metadata.entries[pos])
    }

    /// Stored vector for `vector_id`.
    pub fn vector(&self, vector_id: u32) -> Option<&[f32]> {
        let dimension = self.dimension();
        self.rows_by_id
            .get(&vector_id)
            .map(|&row| &self.vectors[row * dimension..(row + 1) * dimension])
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.manifest.dimension
    }

    pub fn embedding_model(&self) -> &str {
        &self.manifest.embedding_model
    }

    pub fn generation(&self) -> u64 {
        self.manifest.generation
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }
}

/// Reads the manifest at `index_key`, `None` if there is none.
pub async fn read_manifest(
    store: &dyn ObjectStore,
    index_key: &str,
    retry: &RetryPolicy,
) -> Result<Option<Manifest>> {
    let Some(bytes) = read_object(store, index_key, retry).await? else {
        return Ok(None);
    };
    let manifest = serde_json::from_slice(&bytes)
        .map_err(|e| IndexError::Corrupt(format!("manifest is not valid JSON: {}", e)))?;
    Ok(Some(manifest))
}

async fn read_object(
    store: &dyn ObjectStore,
    key: &str,
    retry: &RetryPolicy,
) -> Result<Option<Vec<u8>>> {
    match retry.run("read index artifact", || store.get(key)).await {
        Ok(object) => Ok(Some(object.body)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(IndexError::Store(e)),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Distinct document keys of `hits`, in order of each key's best hit.
pub fn distinct_doc_keys(index: &SimilarityIndex, hits: &[ScoredVector]) -> Vec<String> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter_map(|hit| index.entry(hit.vector_id))
        .filter(|entry| seen.insert(entry.doc_key.as_str()))
        .map(|entry| entry.doc_key.clone())
        .collect()
}
