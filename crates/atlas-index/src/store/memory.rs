//! In-memory index store.
//!
//! The default embedded backend and the fixture store for tests. All
//! state sits behind one `RwLock`; upserts mutate maps inside a short
//! write-lock section, so a file's node, chunks, and embeddings flip
//! visible in one step and readers never see a torn write. Embeddings are
//! shared across files by content hash and reference-counted so deleting
//! one file never strips a vector another file still uses.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::chunker::Chunk;
use crate::embeddings::{cosine_similarity, EmbeddingRecord};
use crate::graph::{CodeGraph, FileNode, Relationship, RelationshipType, Subgraph};
use crate::resolver::ChunkVector;

use super::{
    IndexStore, NearestFilter, NearestHit, StoreError, StoreStats, StoredEmbedding, UpsertOutcome,
};

/// Snapshot-serializable store state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct MemoryState {
    pub graph: CodeGraph,
    /// File path -> its ordered chunks.
    pub chunks: HashMap<String, Vec<Chunk>>,
    /// Content hash -> embedding, shared across files.
    pub embeddings: HashMap<String, EmbeddingRecord>,
    /// Content hash -> number of stored chunks referencing it.
    pub embedding_refs: HashMap<String, usize>,
}

impl MemoryState {
    fn add_chunks(&mut self, chunks: Vec<Chunk>, embeddings: Vec<StoredEmbedding>) {
        for stored in embeddings {
            self.embeddings
                .entry(stored.chunk_hash)
                .or_insert(stored.record);
        }
        for chunk in &chunks {
            *self
                .embedding_refs
                .entry(chunk.content_hash.clone())
                .or_insert(0) += 1;
        }
        if let Some(first) = chunks.first() {
            self.chunks.insert(first.file_path.clone(), chunks);
        }
    }

    fn remove_chunks(&mut self, path: &str) {
        let Some(old) = self.chunks.remove(path) else {
            return;
        };
        for chunk in old {
            let remove = match self.embedding_refs.get_mut(&chunk.content_hash) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count == 0
                }
                None => false,
            };
            if remove {
                self.embedding_refs.remove(&chunk.content_hash);
                self.embeddings.remove(&chunk.content_hash);
            }
        }
    }
}

/// In-memory [`IndexStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(mut state: MemoryState) -> Self {
        state.graph.rebuild_indexes();
        Self {
            inner: RwLock::new(state),
        }
    }

    pub(crate) async fn export_state(&self) -> MemoryState {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn upsert_file(
        &self,
        mut node: FileNode,
        chunks: Vec<Chunk>,
        embeddings: Vec<StoredEmbedding>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.write().await;

        let existing = inner
            .graph
            .node(&node.path)
            .map(|n| (n.content_hash.clone(), n.indexed_at));
        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some((hash, indexed_at)) if hash == node.content_hash => {
                // Unchanged content: refresh scan metadata, keep stored
                // chunks and embeddings as they are.
                node.indexed_at = node.indexed_at.max(indexed_at);
                inner.graph.upsert_node(node);
                return Ok(UpsertOutcome::Unchanged);
            }
            Some(_) => UpsertOutcome::Updated,
        };

        inner.remove_chunks(&node.path);
        inner.add_chunks(chunks, embeddings);
        inner.graph.upsert_node(node);

        Ok(outcome)
    }

    async fn delete_file(&self, path: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        inner.remove_chunks(path);
        match inner.graph.remove_node(path) {
            Ok(_) => {
                debug!("Deleted {path} from index");
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn replace_relationships(
        &self,
        relationships: Vec<Relationship>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.graph.set_relationships(relationships);
        Ok(())
    }

    async fn query_nearest(
        &self,
        vector: &[f32],
        provider: &str,
        k: usize,
        filter: &NearestFilter,
    ) -> Result<Vec<NearestHit>, StoreError> {
        let inner = self.inner.read().await;

        let mut hits: Vec<NearestHit> = Vec::new();
        for (path, chunks) in &inner.chunks {
            let Some(node) = inner.graph.node(path) else {
                continue;
            };
            if !filter.accepts(node) {
                continue;
            }
            for chunk in chunks {
                let Some(record) = inner.embeddings.get(&chunk.content_hash) else {
                    // Chunk stored without a vector (provider failure);
                    // excluded from similarity until a later scan.
                    continue;
                };
                if record.provider != provider {
                    continue;
                }
                hits.push(NearestHit {
                    chunk: chunk.clone(),
                    score: cosine_similarity(vector, &record.vector),
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn query_related(
        &self,
        path: &str,
        kinds: &[RelationshipType],
        depth: usize,
    ) -> Result<Subgraph, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.graph.related(path, kinds, depth))
    }

    async fn node(&self, path: &str) -> Result<Option<FileNode>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.graph.node(path).cloned())
    }

    async fn all_nodes(&self) -> Result<Vec<FileNode>, StoreError> {
        let inner = self.inner.read().await;
        let mut nodes: Vec<FileNode> = inner.graph.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(nodes)
    }

    async fn all_relationships(&self) -> Result<Vec<Relationship>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.graph.relationships.clone())
    }

    async fn chunk_vectors(&self) -> Result<Vec<ChunkVector>, StoreError> {
        let inner = self.inner.read().await;
        let mut vectors = Vec::new();
        for chunks in inner.chunks.values() {
            for chunk in chunks {
                if let Some(record) = inner.embeddings.get(&chunk.content_hash) {
                    vectors.push(ChunkVector {
                        path: chunk.file_path.clone(),
                        chunk_hash: chunk.content_hash.clone(),
                        provider: record.provider.clone(),
                        vector: record.vector.clone(),
                    });
                }
            }
        }
        vectors.sort_by(|a, b| (&a.path, &a.chunk_hash).cmp(&(&b.path, &b.chunk_hash)));
        Ok(vectors)
    }

    async fn file_hashes(&self) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .graph
            .nodes
            .values()
            .map(|n| (n.path.clone(), n.content_hash.clone()))
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.read().await;
        Ok(StoreStats {
            nodes: inner.graph.node_count(),
            relationships: inner.graph.relationship_count(),
            chunks: inner.chunks.values().map(Vec::len).sum(),
            embeddings: inner.embeddings.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FileKind;

    fn node(path: &str, hash: &str) -> FileNode {
        FileNode::new(path, FileKind::File, "typescript").with_content(10, hash)
    }

    fn chunk(path: &str, hash: &str, text: &str) -> Chunk {
        Chunk {
            file_path: path.to_string(),
            byte_start: 0,
            byte_end: text.len(),
            line_start: 1,
            line_end: 1,
            text: text.to_string(),
            overlap: 0,
            content_hash: hash.to_string(),
            entity: None,
            language: "typescript".to_string(),
        }
    }

    fn embedding(hash: &str, vector: Vec<f32>) -> StoredEmbedding {
        StoredEmbedding {
            chunk_hash: hash.to_string(),
            record: EmbeddingRecord {
                vector,
                provider: "test".to_string(),
                created_at: 0,
            },
        }
    }

    #[tokio::test]
    async fn upsert_then_query_roundtrip() {
        let store = MemoryStore::new();
        let outcome = store
            .upsert_file(
                node("a.ts", "h1"),
                vec![chunk("a.ts", "c1", "export function foo() {}")],
                vec![embedding("c1", vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let hits = store
            .query_nearest(&[1.0, 0.0], "test", 5, &NearestFilter::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn unchanged_reupsert_is_noop_for_chunks() {
        let store = MemoryStore::new();
        store
            .upsert_file(
                node("a.ts", "h1"),
                vec![chunk("a.ts", "c1", "text")],
                vec![embedding("c1", vec![1.0])],
            )
            .await
            .unwrap();

        // Same hash, no chunks supplied: stored chunks must survive.
        let outcome = store
            .upsert_file(node("a.ts", "h1"), vec![], vec![])
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.embeddings, 1);
    }

    #[tokio::test]
    async fn changed_content_replaces_chunks() {
        let store = MemoryStore::new();
        store
            .upsert_file(
                node("a.ts", "h1"),
                vec![chunk("a.ts", "c1", "old")],
                vec![embedding("c1", vec![1.0])],
            )
            .await
            .unwrap();

        let outcome = store
            .upsert_file(
                node("a.ts", "h2"),
                vec![chunk("a.ts", "c2", "new")],
                vec![embedding("c2", vec![0.5])],
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.embeddings, 1);
        let vectors = store.chunk_vectors().await.unwrap();
        assert_eq!(vectors[0].chunk_hash, "c2");
    }

    #[tokio::test]
    async fn delete_removes_node_chunks_and_edges() {
        let store = MemoryStore::new();
        store
            .upsert_file(
                node("a.ts", "h1"),
                vec![chunk("a.ts", "c1", "a")],
                vec![embedding("c1", vec![1.0])],
            )
            .await
            .unwrap();
        store
            .upsert_file(node("b.ts", "h2"), vec![], vec![])
            .await
            .unwrap();
        store
            .replace_relationships(vec![Relationship::new(
                "b.ts",
                "a.ts",
                RelationshipType::DependsOn,
            )])
            .await
            .unwrap();

        assert!(store.delete_file("a.ts").await.unwrap());
        assert!(!store.delete_file("a.ts").await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.relationships, 0);
        assert_eq!(stats.chunks, 0);
        assert_eq!(stats.embeddings, 0);
    }

    #[tokio::test]
    async fn shared_embedding_survives_one_owner_deletion() {
        let store = MemoryStore::new();
        // Two files share identical chunk text, hence one embedding.
        store
            .upsert_file(
                node("a.ts", "h1"),
                vec![chunk("a.ts", "shared", "same")],
                vec![embedding("shared", vec![1.0])],
            )
            .await
            .unwrap();
        store
            .upsert_file(
                node("b.ts", "h2"),
                vec![chunk("b.ts", "shared", "same")],
                vec![embedding("shared", vec![1.0])],
            )
            .await
            .unwrap();

        store.delete_file("a.ts").await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.embeddings, 1);

        store.delete_file("b.ts").await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.embeddings, 0);
    }

    #[tokio::test]
    async fn nearest_filters_by_language_and_provider() {
        let store = MemoryStore::new();
        store
            .upsert_file(
                node("a.ts", "h1"),
                vec![chunk("a.ts", "c1", "ts chunk")],
                vec![embedding("c1", vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        let mut py_node = FileNode::new("b.py", FileKind::File, "python").with_content(5, "h2");
        py_node.indexed_at = 100;
        store
            .upsert_file(
                py_node,
                vec![chunk("b.py", "c2", "py chunk")],
                vec![embedding("c2", vec![1.0, 0.0])],
            )
            .await
            .unwrap();

        let filter = NearestFilter::new().with_language("python");
        let hits = store
            .query_nearest(&[1.0, 0.0], "test", 10, &filter)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.file_path, "b.py");

        let hits = store
            .query_nearest(&[1.0, 0.0], "other-provider", 10, &NearestFilter::new())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
