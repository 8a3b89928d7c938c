//! Persisted form of a similarity index.
//!
//! An index is published as one generation of two objects plus pointers:
//!
//! - `<index_key>.gen-<N>.vec`: gzip-compressed vector blob
//! - `<metadata_key>.gen-<N>.json`: the metadata table
//! - `<index_key>`: the JSON [`Manifest`] naming generation `N`
//! - `<metadata_key>`: a [`MetadataPointer`] to the current metadata table,
//!   written after the manifest for consumers that only know `metadata_key`
//!
//! Readers always start from the manifest, so replacing that single object
//! switches every later load to the new generation at once.
//!
//! Vector blob layout, little endian, before compression:
//!
//! ```text
//! "QVEC" | u32 format | u32 dimension | u64 count
//! count × ( u32 vector_id | u32 len | len × f32 )
//! ```

use super::chunker::ChunkingPolicy;
use super::index::IndexError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

pub const MANIFEST_FORMAT: u32 = 1;
pub const VECTOR_FORMAT: u32 = 1;
pub const METADATA_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"QVEC";
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Pointer to the published generation of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: u32,
    pub generation: u64,
    pub dimension: usize,
    pub count: usize,
    pub embedding_model: String,
    pub vectors_key: String,
    /// Logical metadata key the index was built for
    pub metadata_key: String,
    /// Object holding this generation's metadata table
    pub metadata_object_key: String,
    /// Unix seconds
    pub created_at: u64,
}

/// Object at `metadata_key` naming the current metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPointer {
    pub format: u32,
    pub generation: u64,
    pub index_key: String,
    pub metadata_object_key: String,
}

impl MetadataPointer {
    pub fn for_manifest(manifest: &Manifest, index_key: &str) -> Self {
        Self {
            format: MANIFEST_FORMAT,
            generation: manifest.generation,
            index_key: index_key.to_string(),
            metadata_object_key: manifest.metadata_object_key.clone(),
        }
    }
}

/// One row of the metadata table: where a vector came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub vector_id: u32,
    pub doc_key: String,
    pub start: usize,
    pub end: usize,
    pub content_hash: String,
}

/// What the build saw of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// SHA-256 of the whole document text
    pub content_hash: String,
    pub chunks: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataTable {
    pub version: u32,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunking: ChunkingPolicy,
    pub generation: u64,
    pub entries: Vec<IndexEntry>,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentRecord>,
}

pub fn vectors_object_key(index_key: &str, generation: u64) -> String {
    format!("{}.gen-{}.vec", index_key, generation)
}

pub fn metadata_object_key(metadata_key: &str, generation: u64) -> String {
    format!("{}.gen-{}.json", metadata_key, generation)
}

/// True when `key` is the manifest or a generation object of `base`.
pub fn is_artifact_of(key: &str, base: &str) -> bool {
    key == base
        || key
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix(".gen-"))
            .is_some()
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Serializes and compresses `(vector_id, vector)` records.
pub fn encode_vectors(dimension: usize, records: &[(u32, &[f32])]) -> Result<Vec<u8>, IndexError> {
    let mut raw = Vec::with_capacity(HEADER_LEN + records.len() * (8 + dimension * 4));
    raw.extend_from_slice(MAGIC);
    raw.extend_from_slice(&VECTOR_FORMAT.to_le_bytes());
    raw.extend_from_slice(&(dimension as u32).to_le_bytes());
    raw.extend_from_slice(&(records.len() as u64).to_le_bytes());

    for (vector_id, vector) in records {
        if vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
        raw.extend_from_slice(&vector_id.to_le_bytes());
        raw.extend_from_slice(&(vector.len() as u32).to_le_bytes());
        for value in vector.iter() {
            raw.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

/// Decoded vector blob.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBlob {
    pub dimension: usize,
    pub records: Vec<(u32, Vec<f32>)>,
}

/// Decompresses and validates a vector blob.
///
/// Any structural problem (bad magic, truncation, a record whose length
/// differs from the header dimension, trailing bytes) is reported as
/// [`IndexError::Corrupt`].
pub fn decode_vectors(bytes: &[u8]) -> Result<VectorBlob, IndexError> {
    let mut raw = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(|e| IndexError::Corrupt(format!("vector blob is not valid gzip: {}", e)))?;

    let mut reader = ByteReader::new(&raw);
    if reader.take(4)? != MAGIC {
        return Err(IndexError::Corrupt("vector blob has bad magic".into()));
    }
    let format = reader.u32()?;
    if format != VECTOR_FORMAT {
        return Err(IndexError::Corrupt(format!("unsupported vector format {}", format)));
    }
    let dimension = reader.u32()? as usize;
    let count = reader.u64()? as usize;
    if dimension == 0 && count > 0 {
        return Err(IndexError::Corrupt("zero dimension with non-empty blob".into()));
    }

    let mut records = Vec::with_capacity(count.min(reader.remaining() / 8));
    for _ in 0..count {
        let vector_id = reader.u32()?;
        let len = reader.u32()? as usize;
        if len != dimension {
            return Err(IndexError::Corrupt(format!(
                "vector {} has length {}, header says {}",
                vector_id, len, dimension
            )));
        }
        let body = reader.take(len * 4)?;
        let vector = body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        records.push((vector_id, vector));
    }
    if reader.remaining() != 0 {
        return Err(IndexError::Corrupt("trailing bytes after last vector".into()));
    }

    Ok(VectorBlob { dimension, records })
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], IndexError> {
        if self.remaining() < n {
            return Err(IndexError::Corrupt("vector blob is truncated".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, IndexError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, IndexError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }
}
