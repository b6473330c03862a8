//! Durable, queryable persistence for nodes, relationships, chunks, and
//! vectors.
//!
//! The [`IndexStore`] trait is the backend-agnostic contract: an embedded
//! in-memory store (with an optional JSON snapshot layer) covers the
//! unified-backend case, and the qdrant-backed split store covers the
//! graph-plus-vector-system case. Writes are atomic per file: a reader
//! never observes a partially upserted file.

pub mod memory;
pub mod qdrant;
pub mod snapshot;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunker::Chunk;
use crate::embeddings::EmbeddingRecord;
use crate::graph::{FileKind, FileNode, Relationship, RelationshipType, Subgraph};
use crate::resolver::ChunkVector;

pub use memory::MemoryStore;
pub use qdrant::{QdrantVectorBackend, QdrantVectorConfig, SplitStore};
pub use snapshot::SnapshotStore;

/// Errors raised by store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// What a per-file upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Content hash matched the stored node; chunks and embeddings were
    /// left untouched.
    Unchanged,
}

/// An embedding keyed by the chunk content hash it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub chunk_hash: String,
    pub record: EmbeddingRecord,
}

/// Filter for nearest-chunk queries.
#[derive(Debug, Clone, Default)]
pub struct NearestFilter {
    /// Only chunks from files in this language.
    pub language: Option<String>,
    /// Only chunks from files of these kinds.
    pub kinds: Option<Vec<FileKind>>,
    /// Only chunks whose file path starts with this prefix.
    pub path_prefix: Option<String>,
    /// Only chunks from files indexed at or after this unix time.
    pub indexed_after: Option<u64>,
}

impl NearestFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_kinds(mut self, kinds: Vec<FileKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_indexed_after(mut self, unix_secs: u64) -> Self {
        self.indexed_after = Some(unix_secs);
        self
    }

    /// Whether a file node passes the node-level filters.
    pub fn accepts(&self, node: &FileNode) -> bool {
        if let Some(language) = &self.language {
            if &node.language != language {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&node.kind) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !node.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.indexed_after {
            if node.indexed_at < after {
                return false;
            }
        }
        true
    }
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestHit {
    pub chunk: Chunk,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// Store-wide counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub nodes: usize,
    pub relationships: usize,
    pub chunks: usize,
    pub embeddings: usize,
}

/// Backend-agnostic contract for the index store.
///
/// Implementations must make `upsert_file` atomic with respect to one
/// file, serialize concurrent upserts to the same path (last writer
/// wins), and let read-only queries run concurrently with writes without
/// ever observing a torn single-file state.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or replace one file with its chunks and embeddings. A
    /// re-upsert with an unchanged content hash leaves stored chunks and
    /// embeddings untouched.
    async fn upsert_file(
        &self,
        node: FileNode,
        chunks: Vec<Chunk>,
        embeddings: Vec<StoredEmbedding>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Remove a file, its owned chunks and embeddings, and every
    /// relationship where it is an endpoint. Returns false when the path
    /// was not present.
    async fn delete_file(&self, path: &str) -> Result<bool, StoreError>;

    /// Swap in the resolver's full relationship set.
    async fn replace_relationships(
        &self,
        relationships: Vec<Relationship>,
    ) -> Result<(), StoreError>;

    /// The k most similar chunks to a query vector. Only vectors
    /// produced by `provider` are compared; vectors from other providers
    /// live in a different space.
    async fn query_nearest(
        &self,
        vector: &[f32],
        provider: &str,
        k: usize,
        filter: &NearestFilter,
    ) -> Result<Vec<NearestHit>, StoreError>;

    /// Bounded-depth traversal from a node along the given edge kinds.
    async fn query_related(
        &self,
        path: &str,
        kinds: &[RelationshipType],
        depth: usize,
    ) -> Result<Subgraph, StoreError>;

    /// Fetch a single node.
    async fn node(&self, path: &str) -> Result<Option<FileNode>, StoreError>;

    /// The complete node set, as input for relationship resolution.
    async fn all_nodes(&self) -> Result<Vec<FileNode>, StoreError>;

    /// The complete relationship set, in stable order.
    async fn all_relationships(&self) -> Result<Vec<Relationship>, StoreError>;

    /// Every stored chunk vector, for similarity resolution.
    async fn chunk_vectors(&self) -> Result<Vec<ChunkVector>, StoreError>;

    /// Path -> content hash for every stored file; used for incremental
    /// skip decisions and deletion reconciliation.
    async fn file_hashes(&self) -> Result<HashMap<String, String>, StoreError>;

    /// Store-wide counters.
    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Persist pending state, where the backend buffers writes.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
