//! JSON snapshot persistence over the in-memory store.
//!
//! State lives in `state.json` under the data directory, with versioned
//! snapshot copies kept for rollback and pruned to a fixed count. A
//! corrupt state file is recovered by starting empty rather than failing
//! startup. Writes buffer in memory; `flush` persists.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::chunker::Chunk;
use crate::graph::{FileNode, Relationship, RelationshipType, Subgraph};
use crate::resolver::ChunkVector;

use super::memory::{MemoryState, MemoryStore};
use super::{
    IndexStore, NearestFilter, NearestHit, StoreError, StoreStats, StoredEmbedding, UpsertOutcome,
};

/// State file name under the data directory.
pub const STATE_FILE: &str = "state.json";

/// Snapshot directory name.
pub const SNAPSHOT_DIR: &str = "snapshots";

/// A snapshot copy is taken every this many flushes.
pub const SNAPSHOT_EVERY: u32 = 10;

/// Maximum snapshot copies kept.
pub const MAX_SNAPSHOTS: usize = 5;

#[derive(Serialize, Deserialize)]
struct PersistedState {
    version: u32,
    state: MemoryState,
}

/// Persistent [`IndexStore`] backed by [`MemoryStore`] plus JSON
/// snapshots on disk.
pub struct SnapshotStore {
    dir: PathBuf,
    memory: MemoryStore,
    dirty: AtomicBool,
    version: AtomicU32,
}

impl SnapshotStore {
    /// Open the store in a data directory, loading existing state when
    /// present. Corrupt state is logged and replaced with an empty
    /// index.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        fs::create_dir_all(dir.join(SNAPSHOT_DIR))?;

        let state_path = dir.join(STATE_FILE);
        let (state, version) = if state_path.exists() {
            match Self::load(&state_path) {
                Ok(persisted) => {
                    info!(
                        "Loaded index state v{} from {:?}",
                        persisted.version, state_path
                    );
                    (persisted.state, persisted.version)
                }
                Err(err) => {
                    warn!(
                        "Index state at {:?} is unreadable ({err}), starting empty",
                        state_path
                    );
                    (MemoryState::default(), 0)
                }
            }
        } else {
            info!("No existing index state at {:?}, starting empty", state_path);
            (MemoryState::default(), 0)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            memory: MemoryStore::from_state(state),
            dirty: AtomicBool::new(false),
            version: AtomicU32::new(version),
        })
    }

    fn load(path: &Path) -> Result<PersistedState, StoreError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn snapshot_path(&self, version: u32) -> PathBuf {
        self.dir
            .join(SNAPSHOT_DIR)
            .join(format!("v{version}.json"))
    }

    /// Delete the oldest snapshots beyond the retention cap.
    fn prune_snapshots(&self) -> Result<(), StoreError> {
        let snapshot_dir = self.dir.join(SNAPSHOT_DIR);
        let mut versions: Vec<(u32, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&snapshot_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(version) = name
                .strip_prefix('v')
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                versions.push((version, entry.path()));
            }
        }
        versions.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in versions.into_iter().skip(MAX_SNAPSHOTS) {
            debug!("Pruning old snapshot {:?}", path);
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for SnapshotStore {
    async fn upsert_file(
        &self,
        node: FileNode,
        chunks: Vec<Chunk>,
        embeddings: Vec<StoredEmbedding>,
    ) -> Result<UpsertOutcome, StoreError> {
        let outcome = self.memory.upsert_file(node, chunks, embeddings).await?;
        if outcome != UpsertOutcome::Unchanged {
            self.mark_dirty();
        }
        Ok(outcome)
    }

    async fn delete_file(&self, path: &str) -> Result<bool, StoreError> {
        let deleted = self.memory.delete_file(path).await?;
        if deleted {
            self.mark_dirty();
        }
        Ok(deleted)
    }

    async fn replace_relationships(
        &self,
        relationships: Vec<Relationship>,
    ) -> Result<(), StoreError> {
        self.memory.replace_relationships(relationships).await?;
        self.mark_dirty();
        Ok(())
    }

    async fn query_nearest(
        &self,
        vector: &[f32],
        provider: &str,
        k: usize,
        filter: &NearestFilter,
    ) -> Result<Vec<NearestHit>, StoreError> {
        self.memory.query_nearest(vector, provider, k, filter).await
    }

    async fn query_related(
        &self,
        path: &str,
        kinds: &[RelationshipType],
        depth: usize,
    ) -> Result<Subgraph, StoreError> {
        self.memory.query_related(path, kinds, depth).await
    }

    async fn node(&self, path: &str) -> Result<Option<FileNode>, StoreError> {
        self.memory.node(path).await
    }

    async fn all_nodes(&self) -> Result<Vec<FileNode>, StoreError> {
        self.memory.all_nodes().await
    }

    async fn all_relationships(&self) -> Result<Vec<Relationship>, StoreError> {
        self.memory.all_relationships().await
    }

    async fn chunk_vectors(&self) -> Result<Vec<ChunkVector>, StoreError> {
        self.memory.chunk_vectors().await
    }

    async fn file_hashes(&self) -> Result<HashMap<String, String>, StoreError> {
        self.memory.file_hashes().await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.memory.stats().await
    }

    /// Persist buffered state. Writes to a temp file and renames so a
    /// crash mid-write cannot corrupt the previous state.
    async fn flush(&self) -> Result<(), StoreError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            debug!("Index state clean, skipping flush");
            return Ok(());
        }

        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let persisted = PersistedState {
            version,
            state: self.memory.export_state().await,
        };
        let json = serde_json::to_string(&persisted)?;

        let state_path = self.dir.join(STATE_FILE);
        let tmp_path = self.dir.join(format!("{STATE_FILE}.tmp"));
        fs::write(&tmp_path, &json)?;
        fs::rename(&tmp_path, &state_path)?;

        if version % SNAPSHOT_EVERY == 0 {
            fs::write(self.snapshot_path(version), &json)?;
            self.prune_snapshots()?;
            info!("Snapshot v{version} written");
        }

        debug!("Flushed index state v{version}");
        Ok(())
    }
}
