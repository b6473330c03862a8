//! Scan orchestration: classify, extract, chunk, embed, resolve.
//!
//! File tasks run on a bounded worker pool and upsert in completion
//! order; relationship resolution is the synchronization barrier at the
//! end of the pipeline, running only after every file task of the scan
//! has finished or permanently failed, and always over the store's full
//! node set. No single file's failure halts a scan.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use atlas_config::IndexConfig;

use crate::chunker::Chunker;
use crate::classifier::{CandidateFile, Classifier};
use crate::embeddings::EmbeddingGenerator;
use crate::extractor::{content_hash, EntityExtractor};
use crate::patterns::PatternDetector;
use crate::resolver::Resolver;
use crate::store::{IndexStore, StoreError, StoredEmbedding, UpsertOutcome};

/// What to scan.
#[derive(Debug, Clone)]
pub enum ScanMode {
    /// Walk the whole project root.
    Full,
    /// Re-index only the given paths; deleted ones are removed.
    /// Relationship resolution still runs globally.
    Incremental(Vec<PathBuf>),
}

/// A per-file failure note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanError {
    pub path: String,
    pub message: String,
}

/// Outcome counters for one scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_failed: usize,
    pub files_deleted: usize,
    pub chunks: usize,
    pub embeddings_generated: usize,
    pub embeddings_cached: usize,
    pub relationships: usize,
    /// True when the classifier hit its file cap.
    pub truncated: bool,
    /// True when the scan was cancelled between file tasks.
    pub cancelled: bool,
    pub errors: Vec<ScanError>,
    pub duration_ms: u64,
}

/// Cooperative cancellation flag checked between file tasks.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum FileOutcome {
    Indexed { chunks: usize },
    Unchanged,
    Failed { message: String, fatal: bool },
}

/// Orchestrates scans of one project root against one store.
pub struct Scanner<S: IndexStore + ?Sized + 'static> {
    root: PathBuf,
    config: IndexConfig,
    store: Arc<S>,
    generator: Arc<EmbeddingGenerator>,
    cancel: CancelHandle,
}

impl<S: IndexStore + ?Sized + 'static> Scanner<S> {
    pub fn new(
        root: impl Into<PathBuf>,
        config: IndexConfig,
        store: Arc<S>,
        generator: Arc<EmbeddingGenerator>,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            store,
            generator,
            cancel: CancelHandle::default(),
        }
    }

    /// Handle for aborting an in-flight scan between file tasks.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run a scan. Returns the summary; only a store-wide failure is an
    /// error.
    pub async fn scan(&self, mode: ScanMode) -> Result<ScanSummary> {
        let started = Instant::now();
        let mut summary = ScanSummary::default();
        let generated_before = self.generator.stats().generated();
        let hits_before = self.generator.stats().cache_hits();

        let candidates = self.discover(&mode, &mut summary).await?;
        summary.files_seen = candidates.len();
        info!(
            "Scanning {} files under {:?}",
            candidates.len(),
            self.root
        );

        let known_hashes = self
            .store
            .file_hashes()
            .await
            .context("store unavailable while listing file hashes")?;

        // Bounded worker pool: each worker owns its parsers and drains
        // its share of the candidate list.
        let workers = self.config.scan.concurrency.max(1);
        let mut assignments: Vec<Vec<CandidateFile>> = vec![Vec::new(); workers];
        for (i, candidate) in candidates.into_iter().enumerate() {
            assignments[i % workers].push(candidate);
        }

        let mut join_set: JoinSet<Vec<(String, FileOutcome)>> = JoinSet::new();
        for files in assignments.into_iter().filter(|f| !f.is_empty()) {
            let store = Arc::clone(&self.store);
            let generator = Arc::clone(&self.generator);
            let config = self.config.clone();
            let cancel = self.cancel.clone();
            let known: std::collections::HashMap<String, String> = files
                .iter()
                .filter_map(|f| {
                    known_hashes
                        .get(&f.rel_path)
                        .map(|h| (f.rel_path.clone(), h.clone()))
                })
                .collect();

            join_set.spawn(async move {
                let mut outcomes = Vec::new();
                let mut extractor = match EntityExtractor::new() {
                    Ok(extractor) => extractor,
                    Err(err) => {
                        for file in &files {
                            outcomes.push((
                                file.rel_path.clone(),
                                FileOutcome::Failed {
                                    message: format!("extractor setup failed: {err}"),
                                    fatal: false,
                                },
                            ));
                        }
                        return outcomes;
                    }
                };
                let chunker = Chunker::new(config.chunk.clone());
                let detector = PatternDetector::new(&config.resolution);

                for file in files {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let outcome = process_file(
                        &file,
                        known.get(&file.rel_path).map(String::as_str),
                        &mut extractor,
                        &chunker,
                        &detector,
                        &generator,
                        store.as_ref(),
                    )
                    .await;
                    outcomes.push((file.rel_path, outcome));
                }
                outcomes
            });
        }

        // Barrier: resolution must not start until every file task has
        // completed or permanently failed.
        let mut fatal: Option<String> = None;
        while let Some(joined) = join_set.join_next().await {
            let outcomes = joined.context("scan worker panicked")?;
            for (path, outcome) in outcomes {
                match outcome {
                    FileOutcome::Indexed { chunks } => {
                        summary.files_indexed += 1;
                        summary.chunks += chunks;
                    }
                    FileOutcome::Unchanged => summary.files_unchanged += 1,
                    FileOutcome::Failed { message, fatal: is_fatal } => {
                        summary.files_failed += 1;
                        summary.errors.push(ScanError {
                            path,
                            message: message.clone(),
                        });
                        if is_fatal && fatal.is_none() {
                            fatal = Some(message);
                        }
                    }
                }
            }
        }
        if let Some(message) = fatal {
            anyhow::bail!("store failure aborted the scan: {message}");
        }
        summary.cancelled = self.cancel.is_cancelled();

        // Second pass: recompute the full relationship set, even for an
        // incremental scan, since any file can change cross-file edges.
        let nodes = self
            .store
            .all_nodes()
            .await
            .context("store unavailable while loading nodes for resolution")?;
        let vectors = self
            .store
            .chunk_vectors()
            .await
            .context("store unavailable while loading vectors for resolution")?;
        let resolver = Resolver::new(self.config.resolution.clone());
        let report = resolver.resolve(&nodes, &vectors);
        summary.relationships = report.relationships.len();
        self.store
            .replace_relationships(report.relationships)
            .await
            .context("store unavailable while writing relationships")?;

        self.store.flush().await.context("store flush failed")?;

        summary.embeddings_generated = self.generator.stats().generated() - generated_before;
        summary.embeddings_cached = self.generator.stats().cache_hits() - hits_before;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Scan finished: {} indexed, {} unchanged, {} failed, {} relationships in {}ms",
            summary.files_indexed,
            summary.files_unchanged,
            summary.files_failed,
            summary.relationships,
            summary.duration_ms
        );
        Ok(summary)
    }

    /// Build the candidate list and reconcile deletions.
    async fn discover(
        &self,
        mode: &ScanMode,
        summary: &mut ScanSummary,
    ) -> Result<Vec<CandidateFile>> {
        let classifier = Classifier::new(self.config.scan.clone());

        match mode {
            ScanMode::Full => {
                let manifest = classifier
                    .scan_root(&self.root)
                    .context("file discovery failed")?;
                summary.truncated = manifest.truncated;

                // Files present in the store but gone from disk.
                let known = self.store.file_hashes().await?;
                let on_disk: std::collections::HashSet<&str> =
                    manifest.files.iter().map(|f| f.rel_path.as_str()).collect();
                for path in known.keys() {
                    if !on_disk.contains(path.as_str()) {
                        debug!("Removing vanished file {path}");
                        self.store.delete_file(path).await?;
                        summary.files_deleted += 1;
                    }
                }

                Ok(manifest.files)
            }
            ScanMode::Incremental(paths) => {
                let mut candidates = Vec::new();
                for path in paths {
                    let absolute = if path.is_absolute() {
                        path.clone()
                    } else {
                        self.root.join(path)
                    };
                    match classifier.classify_path(&self.root, &absolute) {
                        Some(candidate) => candidates.push(candidate),
                        None => {
                            // Listed but unreadable or missing: the file
                            // was deleted.
                            let rel = relative_to(&self.root, &absolute);
                            if self.store.delete_file(&rel).await? {
                                summary.files_deleted += 1;
                            }
                        }
                    }
                }
                Ok(candidates)
            }
        }
    }
}

/// Extract, chunk, embed, and upsert one file.
async fn process_file<S: IndexStore + ?Sized>(
    file: &CandidateFile,
    known_hash: Option<&str>,
    extractor: &mut EntityExtractor,
    chunker: &Chunker,
    detector: &PatternDetector,
    generator: &EmbeddingGenerator,
    store: &S,
) -> FileOutcome {
    let bytes = match tokio::fs::read(&file.path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return FileOutcome::Failed {
                message: format!("read failed: {err}"),
                fatal: false,
            }
        }
    };
    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(_) => {
            return FileOutcome::Failed {
                message: "not valid UTF-8, skipped".to_string(),
                fatal: false,
            }
        }
    };

    // Unchanged content never re-extracts or re-embeds.
    let hash = content_hash(&content);
    if known_hash == Some(hash.as_str()) {
        debug!("Unchanged: {}", file.rel_path);
        return FileOutcome::Unchanged;
    }

    let mut node = extractor.extract(&file.rel_path, file.kind, &file.language, &content);
    node.indexed_at = unix_now();
    node.patterns = detector.detect_local(&node);
    if let Some(error) = &node.extraction_error {
        warn!("Extraction error in {}: {error}", file.rel_path);
    }

    let chunks = chunker.chunk(&node, &content);
    let mut embeddings = Vec::new();
    let mut embed_failure: Option<String> = None;
    for chunk in &chunks {
        match generator.embed_chunk(&chunk.content_hash, &chunk.text).await {
            Ok(record) => embeddings.push(StoredEmbedding {
                chunk_hash: chunk.content_hash.clone(),
                record,
            }),
            Err(err) => {
                // The chunk is stored without a vector and excluded from
                // similarity search until a later scan retries.
                warn!("Embedding failed for {}: {err}", file.rel_path);
                embed_failure = Some(err.to_string());
            }
        }
    }

    let chunk_count = chunks.len();
    match store.upsert_file(node, chunks, embeddings).await {
        Ok(UpsertOutcome::Unchanged) => FileOutcome::Unchanged,
        Ok(_) => match embed_failure {
            // Indexed, but surface the embedding failure in the summary.
            Some(message) => FileOutcome::Failed {
                message: format!("indexed without vectors: {message}"),
                fatal: false,
            },
            None => FileOutcome::Indexed {
                chunks: chunk_count,
            },
        },
        Err(StoreError::Backend(message)) => FileOutcome::Failed {
            message,
            fatal: true,
        },
        Err(err) => FileOutcome::Failed {
            message: err.to_string(),
            fatal: false,
        },
    }
}

fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::tempdir;

    fn scanner_for(root: &Path) -> (Scanner<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = IndexConfig::default();
        let generator = Arc::new(EmbeddingGenerator::from_config(&config.embedding).unwrap());
        (
            Scanner::new(root, config, Arc::clone(&store), generator),
            store,
        )
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn full_scan_indexes_and_rescan_is_unchanged() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/a.ts", "export function foo() { return 1; }\n");
        write(dir.path(), "src/b.ts", "import { foo } from './a';\nfoo();\n");

        let (scanner, store) = scanner_for(dir.path());

        let first = scanner.scan(ScanMode::Full).await.unwrap();
        assert_eq!(first.files_indexed, 2);
        assert_eq!(first.files_failed, 0);
        assert!(first.relationships > 0);

        let second = scanner.scan(ScanMode::Full).await.unwrap();
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_unchanged, 2);

        // Unchanged rescan keeps the stored state identical.
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.nodes, 2);
    }

    #[tokio::test]
    async fn incremental_scan_handles_change_and_delete() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/a.ts", "export function foo() {}\n");
        write(dir.path(), "src/b.ts", "export function bar() {}\n");

        let (scanner, store) = scanner_for(dir.path());
        scanner.scan(ScanMode::Full).await.unwrap();

        write(dir.path(), "src/a.ts", "export function foo2() {}\n");
        fs::remove_file(dir.path().join("src/b.ts")).unwrap();

        let summary = scanner
            .scan(ScanMode::Incremental(vec![
                PathBuf::from("src/a.ts"),
                PathBuf::from("src/b.ts"),
            ]))
            .await
            .unwrap();

        assert_eq!(summary.files_indexed, 1);
        assert_eq!(summary.files_deleted, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.nodes, 1);
        let node = store.node("src/a.ts").await.unwrap().unwrap();
        assert!(node.exports.contains(&"foo2".to_string()));
    }

    #[tokio::test]
    async fn unreadable_file_fails_without_aborting_scan() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/good.ts", "export function ok() {}\n");
        fs::write(dir.path().join("src/bad.ts"), [0xff, 0xfe, 0x00, 0x01]).unwrap();

        let (scanner, store) = scanner_for(dir.path());
        let summary = scanner.scan(ScanMode::Full).await.unwrap();

        assert_eq!(summary.files_indexed, 1);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].path.ends_with("bad.ts"));
        assert_eq!(store.stats().await.unwrap().nodes, 1);
    }

    #[tokio::test]
    async fn cancelled_scan_keeps_partial_state_valid() {
        let dir = tempdir().unwrap();
        for i in 0..10 {
            write(dir.path(), &format!("src/f{i}.ts"), "export function f() {}\n");
        }

        let (scanner, store) = scanner_for(dir.path());
        scanner.cancel_handle().cancel();
        let summary = scanner.scan(ScanMode::Full).await.unwrap();
        assert!(summary.cancelled);

        // Whatever made it in is consistent; a follow-up scan completes.
        let follow_up_store = store.stats().await.unwrap();
        assert!(follow_up_store.nodes <= 10);
    }

    #[tokio::test]
    async fn vanished_files_are_removed_on_full_scan() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/a.ts", "export function a() {}\n");
        write(dir.path(), "src/b.ts", "export function b() {}\n");

        let (scanner, store) = scanner_for(dir.path());
        scanner.scan(ScanMode::Full).await.unwrap();
        assert_eq!(store.stats().await.unwrap().nodes, 2);

        fs::remove_file(dir.path().join("src/b.ts")).unwrap();
        let summary = scanner.scan(ScanMode::Full).await.unwrap();
        assert_eq!(summary.files_deleted, 1);
        assert_eq!(store.stats().await.unwrap().nodes, 1);
    }
}
