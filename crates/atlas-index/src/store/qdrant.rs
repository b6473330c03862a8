//! Qdrant-backed vector storage.
//!
//! The split-backend variant of the store contract: the graph half stays
//! embedded while chunk vectors live in a qdrant collection. Payloads
//! carry the chunk metadata and the producing provider id, and every
//! search filters on the provider so vectors from different providers are
//! never compared.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::chunker::Chunk;
use crate::graph::{FileNode, Relationship, RelationshipType, Subgraph};
use crate::resolver::ChunkVector;

use super::memory::MemoryStore;
use super::{
    IndexStore, NearestFilter, NearestHit, StoreError, StoreStats, StoredEmbedding, UpsertOutcome,
};

/// Connection settings for the qdrant vector backend.
#[derive(Debug, Clone)]
pub struct QdrantVectorConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection_name: String,
    pub dimensions: usize,
}

impl Default for QdrantVectorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection_name: crate::DEFAULT_COLLECTION.to_string(),
            dimensions: crate::DEFAULT_LOCAL_DIMENSIONS,
        }
    }
}

/// Vector-capable backend over a qdrant collection.
pub struct QdrantVectorBackend {
    client: Qdrant,
    collection_name: String,
    dimensions: usize,
}

impl QdrantVectorBackend {
    /// Connect to a qdrant server.
    pub async fn connect(config: &QdrantVectorConfig) -> Result<Self, StoreError> {
        info!("Connecting to qdrant at {}", config.url);

        let mut builder = Qdrant::from_url(&config.url).skip_compatibility_check();
        if let Some(api_key) = &config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            client,
            collection_name: config.collection_name.clone(),
            dimensions: config.dimensions,
        })
    }

    /// Create the collection when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection_name);

        if !exists {
            info!(
                "Creating collection {} with {} dimensions",
                self.collection_name, self.dimensions
            );
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                        VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        } else {
            debug!("Collection {} already exists", self.collection_name);
        }

        Ok(())
    }

    /// Upsert a file's chunk vectors, replacing whatever the path had.
    pub async fn upsert_chunks(
        &self,
        path: &str,
        chunks: &[Chunk],
        embeddings: &[StoredEmbedding],
    ) -> Result<usize, StoreError> {
        self.delete_by_path(path).await?;

        let by_hash: HashMap<&str, &StoredEmbedding> = embeddings
            .iter()
            .map(|e| (e.chunk_hash.as_str(), e))
            .collect();

        let mut points = Vec::new();
        for chunk in chunks {
            let Some(stored) = by_hash.get(chunk.content_hash.as_str()) else {
                // Chunk without a vector: excluded from similarity until
                // a later scan retries the provider.
                continue;
            };
            points.push(PointStruct::new(
                Uuid::new_v4().to_string(),
                stored.record.vector.clone(),
                chunk_payload(chunk, &stored.record.provider),
            ));
        }

        if points.is_empty() {
            return Ok(0);
        }

        let count = points.len();
        debug!("Upserting {count} points for {path}");
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count)
    }

    /// Delete every point belonging to a file path.
    pub async fn delete_by_path(&self, path: &str) -> Result<(), StoreError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(Filter::must([Condition::matches(
                        "file_path",
                        path.to_string(),
                    )])),
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Nearest chunks for a query vector, constrained to one provider's
    /// vector space.
    pub async fn search(
        &self,
        vector: &[f32],
        provider: &str,
        k: usize,
        filter: &NearestFilter,
    ) -> Result<Vec<NearestHit>, StoreError> {
        let mut conditions = vec![Condition::matches("provider", provider.to_string())];
        if let Some(language) = &filter.language {
            conditions.push(Condition::matches("language", language.clone()));
        }
        if let Some(prefix) = &filter.path_prefix {
            conditions.push(Condition::matches("file_path", prefix.clone()));
        }

        let search = SearchPointsBuilder::new(&self.collection_name, vector.to_vec(), k as u64)
            .with_payload(true)
            .filter(Filter::must(conditions));

        let results = self
            .client
            .search_points(search)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let hits = results
            .result
            .into_iter()
            .filter_map(|p| {
                let chunk = payload_chunk(&p.payload)?;
                Some(NearestHit {
                    chunk,
                    score: p.score,
                })
            })
            .collect();
        Ok(hits)
    }

    /// Every stored vector, for similarity resolution.
    pub async fn all_vectors(&self) -> Result<Vec<ChunkVector>, StoreError> {
        let mut vectors = Vec::new();
        let mut offset = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection_name)
                .limit(256)
                .with_payload(true)
                .with_vectors(true);
            if let Some(next) = offset.take() {
                builder = builder.offset(next);
            }

            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            for point in response.result {
                let Some(vector) = point_vector(point.vectors) else {
                    continue;
                };
                let payload = point.payload;
                let (Some(path), Some(hash), Some(provider)) = (
                    payload_str(&payload, "file_path"),
                    payload_str(&payload, "chunk_hash"),
                    payload_str(&payload, "provider"),
                ) else {
                    continue;
                };
                vectors.push(ChunkVector {
                    path,
                    chunk_hash: hash,
                    provider,
                    vector,
                });
            }

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(vectors)
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }
}

/// Build the qdrant payload for one chunk.
fn chunk_payload(chunk: &Chunk, provider: &str) -> HashMap<&'static str, Value> {
    let mut payload: HashMap<&'static str, Value> = HashMap::new();
    payload.insert("file_path", chunk.file_path.clone().into());
    payload.insert("chunk_hash", chunk.content_hash.clone().into());
    payload.insert("provider", provider.to_string().into());
    payload.insert("language", chunk.language.clone().into());
    payload.insert("text", chunk.text.clone().into());
    payload.insert("byte_start", (chunk.byte_start as i64).into());
    payload.insert("byte_end", (chunk.byte_end as i64).into());
    payload.insert("line_start", (chunk.line_start as i64).into());
    payload.insert("line_end", (chunk.line_end as i64).into());
    payload.insert("overlap", (chunk.overlap as i64).into());
    if let Some(entity) = &chunk.entity {
        payload.insert("entity", entity.clone().into());
    }
    payload
}

/// Rebuild a chunk from a point payload.
fn payload_chunk(payload: &HashMap<String, Value>) -> Option<Chunk> {
    Some(Chunk {
        file_path: payload_str(payload, "file_path")?,
        byte_start: payload_int(payload, "byte_start")? as usize,
        byte_end: payload_int(payload, "byte_end")? as usize,
        line_start: payload_int(payload, "line_start")? as usize,
        line_end: payload_int(payload, "line_end")? as usize,
        text: payload_str(payload, "text")?,
        overlap: payload_int(payload, "overlap").unwrap_or(0) as usize,
        content_hash: payload_str(payload, "chunk_hash")?,
        entity: payload_str(payload, "entity"),
        language: payload_str(payload, "language").unwrap_or_else(|| "unknown".to_string()),
    })
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(qdrant_client::qdrant::value::Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    })
}

fn payload_int(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)) => Some(*i),
        _ => None,
    })
}

fn point_vector(vectors: Option<qdrant_client::qdrant::VectorsOutput>) -> Option<Vec<f32>> {
    use qdrant_client::qdrant::vectors_output::VectorsOptions;
    match vectors?.vectors_options? {
        VectorsOptions::Vector(v) => Some(v.data),
        VectorsOptions::Vectors(_) => None,
    }
}

/// Split-backend [`IndexStore`]: nodes, relationships, and chunk listings
/// in the embedded store; vectors in qdrant.
pub struct SplitStore {
    graph: MemoryStore,
    vectors: QdrantVectorBackend,
}

impl SplitStore {
    /// Connect and bootstrap the collection.
    pub async fn connect(config: &QdrantVectorConfig) -> Result<Self, StoreError> {
        let vectors = QdrantVectorBackend::connect(config).await?;
        vectors.ensure_collection().await?;
        Ok(Self {
            graph: MemoryStore::new(),
            vectors,
        })
    }
}

#[async_trait]
impl IndexStore for SplitStore {
    async fn upsert_file(
        &self,
        node: FileNode,
        chunks: Vec<Chunk>,
        embeddings: Vec<StoredEmbedding>,
    ) -> Result<UpsertOutcome, StoreError> {
        let path = node.path.clone();

        // Vector half first: a failed qdrant write leaves the previous
        // graph state intact, keeping the per-file upsert atomic.
        let outcome_probe = self.graph.node(&path).await?;
        let unchanged = outcome_probe
            .map(|n| n.content_hash == node.content_hash)
            .unwrap_or(false);
        if !unchanged {
            self.vectors
                .upsert_chunks(&path, &chunks, &embeddings)
                .await?;
        }

        // Embeddings stay out of the embedded half; qdrant owns them.
        self.graph.upsert_file(node, chunks, Vec::new()).await
    }

    async fn delete_file(&self, path: &str) -> Result<bool, StoreError> {
        self.vectors.delete_by_path(path).await?;
        self.graph.delete_file(path).await
    }

    async fn replace_relationships(
        &self,
        relationships: Vec<Relationship>,
    ) -> Result<(), StoreError> {
        self.graph.replace_relationships(relationships).await
    }

    async fn query_nearest(
        &self,
        vector: &[f32],
        provider: &str,
        k: usize,
        filter: &NearestFilter,
    ) -> Result<Vec<NearestHit>, StoreError> {
        self.vectors.search(vector, provider, k, filter).await
    }

    async fn query_related(
        &self,
        path: &str,
        kinds: &[RelationshipType],
        depth: usize,
    ) -> Result<Subgraph, StoreError> {
        self.graph.query_related(path, kinds, depth).await
    }

    async fn node(&self, path: &str) -> Result<Option<FileNode>, StoreError> {
        self.graph.node(path).await
    }

    async fn all_nodes(&self) -> Result<Vec<FileNode>, StoreError> {
        self.graph.all_nodes().await
    }

    async fn all_relationships(&self) -> Result<Vec<Relationship>, StoreError> {
        self.graph.all_relationships().await
    }

    async fn chunk_vectors(&self) -> Result<Vec<ChunkVector>, StoreError> {
        self.vectors.all_vectors().await
    }

    async fn file_hashes(&self) -> Result<HashMap<String, String>, StoreError> {
        self.graph.file_hashes().await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.graph.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, hash: &str) -> Chunk {
        Chunk {
            file_path: path.to_string(),
            byte_start: 0,
            byte_end: 4,
            line_start: 1,
            line_end: 2,
            text: "text".to_string(),
            overlap: 0,
            content_hash: hash.to_string(),
            entity: Some("foo".to_string()),
            language: "rust".to_string(),
        }
    }

    #[test]
    fn payload_roundtrip_preserves_chunk() {
        let original = chunk("src/a.rs", "h1");
        let payload: HashMap<String, Value> = chunk_payload(&original, "test-provider")
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        assert_eq!(
            payload_str(&payload, "provider").as_deref(),
            Some("test-provider")
        );
        let rebuilt = payload_chunk(&payload).unwrap();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn payload_without_required_fields_is_rejected() {
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("file_path".to_string(), "a.rs".to_string().into());
        assert!(payload_chunk(&payload).is_none());
    }

    #[test]
    fn default_config_points_at_local_qdrant() {
        let config = QdrantVectorConfig::default();
        assert_eq!(config.url, "http://localhost:6334");
        assert_eq!(config.collection_name, crate::DEFAULT_COLLECTION);
    }
}
