//! Integration tests for the atlas-index crate.
//!
//! These exercise the full pipeline end to end: discovery, extraction,
//! chunking, embedding, storage, resolution, and search over a real
//! temporary project tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;

use atlas_config::IndexConfig;
use atlas_index::{
    reassemble, Chunker, EmbeddingError, EmbeddingGenerator, EmbeddingProvider, EntityExtractor,
    FileKind, HashEmbeddings, IndexStore, MemoryStore, QueryFilters, QueryProcessor,
    RelationshipType, ScanMode, Scanner,
};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn scanner_for(root: &Path) -> (Scanner<MemoryStore>, Arc<MemoryStore>, Arc<EmbeddingGenerator>) {
    let store = Arc::new(MemoryStore::new());
    let config = IndexConfig::default();
    let generator = Arc::new(EmbeddingGenerator::from_config(&config.embedding).unwrap());
    (
        Scanner::new(root, config, Arc::clone(&store), Arc::clone(&generator)),
        store,
        generator,
    )
}

/// `a.ts` exports `foo`, `b.ts` imports and calls it: the scan must link
/// them and a search about `foo` must surface `b.ts`.
#[tokio::test]
async fn end_to_end_import_call_and_search() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "src/a.ts",
        "export function foo() {\n    return 1;\n}\n",
    );
    write(
        dir.path(),
        "src/b.ts",
        "import { foo } from './a';\nfoo();\n",
    );
    write(
        dir.path(),
        "src/zebra.ts",
        "export const stripes = 42;\n",
    );

    let (scanner, store, generator) = scanner_for(dir.path());
    let summary = scanner.scan(ScanMode::Full).await.unwrap();
    assert_eq!(summary.files_indexed, 3);
    assert_eq!(summary.files_failed, 0);

    let relationships = store.all_relationships().await.unwrap();

    let depends: Vec<_> = relationships
        .iter()
        .filter(|r| r.kind == RelationshipType::DependsOn && !r.unresolved)
        .collect();
    assert!(
        depends
            .iter()
            .any(|r| r.from == "src/b.ts" && r.to == "src/a.ts"),
        "expected DEPENDS_ON b -> a, got {depends:?}"
    );

    let calls: Vec<_> = relationships
        .iter()
        .filter(|r| r.kind == RelationshipType::Calls)
        .collect();
    assert!(
        calls
            .iter()
            .any(|r| r.from == "src/b.ts" && r.to == "src/a.ts"),
        "expected CALLS b -> a, got {calls:?}"
    );

    // A query about calling foo ranks b.ts above the unrelated file.
    let processor = QueryProcessor::new(store, generator, Default::default());
    let results = processor
        .search("call the foo function", &QueryFilters::default())
        .await
        .unwrap();
    let b_rank = results.iter().position(|r| r.file_path == "src/b.ts");
    let zebra_rank = results.iter().position(|r| r.file_path == "src/zebra.ts");
    assert!(b_rank.is_some(), "b.ts missing from results: {results:?}");
    if let Some(zebra) = zebra_rank {
        assert!(b_rank.unwrap() < zebra, "b.ts should outrank zebra.ts");
    }
}

/// Scanning an unchanged project twice yields identical node and
/// relationship sets.
#[tokio::test]
async fn rescan_is_idempotent() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "src/service.ts",
        r#"
export interface Handler {
    handle(input: string): string;
}

export class EchoHandler implements Handler {
    handle(input: string): string {
        if (input.length > 0) {
            return input;
        }
        return "";
    }
}
"#,
    );
    write(
        dir.path(),
        "src/main.ts",
        "import { EchoHandler } from './service';\nconst h = new EchoHandler();\n",
    );
    write(dir.path(), "src/service.test.ts", "import { EchoHandler } from './service';\n");

    let (scanner, store, _) = scanner_for(dir.path());
    scanner.scan(ScanMode::Full).await.unwrap();
    let nodes_first = store.all_nodes().await.unwrap();
    let rels_first = store.all_relationships().await.unwrap();

    scanner.scan(ScanMode::Full).await.unwrap();
    let nodes_second = store.all_nodes().await.unwrap();
    let rels_second = store.all_relationships().await.unwrap();

    assert_eq!(nodes_first, nodes_second);
    assert_eq!(rels_first, rels_second);
    assert!(!rels_first.is_empty());
}

/// Concatenating a file's chunks minus overlaps reproduces the content.
#[tokio::test]
async fn chunk_coverage_reconstructs_content() {
    let mut content = String::from("// header comment\n");
    for i in 0..40 {
        content.push_str(&format!(
            "export function handler{i}(input: string): string {{\n    if (input.length > {i}) {{\n        return input;\n    }}\n    return \"{i}\";\n}}\n\n"
        ));
    }

    let mut extractor = EntityExtractor::new().unwrap();
    let node = extractor.extract("src/big.ts", FileKind::File, "typescript", &content);
    assert!(node.functions.len() >= 40);

    let config = IndexConfig::default();
    let chunks = Chunker::new(config.chunk).chunk(&node, &content);
    assert!(chunks.len() > 1, "fixture should produce several chunks");
    assert_eq!(reassemble(&chunks), content);
}

/// Counting provider used to prove cache single-flight behavior.
struct CountingProvider {
    inner: HashEmbeddings,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn provider_id(&self) -> &str {
        "counting"
    }
}

/// Identical chunk text across two files produces exactly one provider
/// call and a shared vector.
#[tokio::test]
async fn duplicate_content_embeds_once() {
    let dir = tempdir().unwrap();
    let shared = "export function duplicated() {\n    return 'same';\n}\n";
    write(dir.path(), "src/copy1.ts", shared);
    write(dir.path(), "src/copy2.ts", shared);

    let provider = Arc::new(CountingProvider {
        inner: HashEmbeddings::new(64),
        calls: AtomicUsize::new(0),
    });
    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(EmbeddingGenerator::with_providers(
        vec![provider.clone()],
        4,
    ));
    let scanner = Scanner::new(
        dir.path(),
        IndexConfig::default(),
        Arc::clone(&store),
        Arc::clone(&generator),
    );

    let summary = scanner.scan(ScanMode::Full).await.unwrap();
    assert_eq!(summary.files_indexed, 2);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    // One embedding, shared by both files' chunks.
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.embeddings, 1);
    assert_eq!(stats.chunks, 2);
}

/// Removing a file removes its node, chunks, embeddings, and every edge
/// where it was an endpoint.
#[tokio::test]
async fn deletion_leaves_no_dangling_state() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "src/a.ts",
        "export function foo() { return 1; }\n",
    );
    write(
        dir.path(),
        "src/b.ts",
        "import { foo } from './a';\nfoo();\n",
    );

    let (scanner, store, _) = scanner_for(dir.path());
    scanner.scan(ScanMode::Full).await.unwrap();
    assert!(store
        .all_relationships()
        .await
        .unwrap()
        .iter()
        .any(|r| r.to == "src/a.ts"));

    fs::remove_file(dir.path().join("src/a.ts")).unwrap();
    let summary = scanner.scan(ScanMode::Full).await.unwrap();
    assert_eq!(summary.files_deleted, 1);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.nodes, 1);
    let relationships = store.all_relationships().await.unwrap();
    assert!(
        !relationships
            .iter()
            .any(|r| r.from == "src/a.ts" || r.to == "src/a.ts"),
        "edges still reference the deleted file: {relationships:?}"
    );
}

/// Querying with the exact text of an indexed chunk returns that chunk
/// first with the maximum similarity score.
#[tokio::test]
async fn self_match_ranks_first() {
    let dir = tempdir().unwrap();
    let exact = "export function verifySignature(payload: string): boolean {\n    return payload.length > 0;\n}\n";
    write(dir.path(), "src/crypto.ts", exact);
    write(
        dir.path(),
        "src/other.ts",
        "export function unrelatedThing() { return null; }\n",
    );

    let (scanner, store, generator) = scanner_for(dir.path());
    scanner.scan(ScanMode::Full).await.unwrap();

    let processor = QueryProcessor::new(store, generator, Default::default());
    let results = processor.search(exact, &QueryFilters::default()).await.unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].file_path, "src/crypto.ts");
    assert!(
        results[0].vector_score > 0.999,
        "self-match score was {}",
        results[0].vector_score
    );
}

/// Two files declaring `run()` and a third calling it: a CALLS edge to
/// each candidate, both below full confidence.
#[tokio::test]
async fn ambiguous_call_edges_both_candidates()  {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/one.ts", "export function run() { return 1; }\n");
    write(dir.path(), "src/two.ts", "export function run() { return 2; }\n");
    write(dir.path(), "src/caller.ts", "import { run } from './one';\nrun();\n");

    let (scanner, store, _) = scanner_for(dir.path());
    scanner.scan(ScanMode::Full).await.unwrap();

    let relationships = store.all_relationships().await.unwrap();
    let calls: Vec<_> = relationships
        .iter()
        .filter(|r| r.kind == RelationshipType::Calls && r.from == "src/caller.ts")
        .collect();

    assert_eq!(calls.len(), 2, "expected edges to both candidates: {calls:?}");
    let targets: Vec<&str> = calls.iter().map(|r| r.to.as_str()).collect();
    assert!(targets.contains(&"src/one.ts"));
    assert!(targets.contains(&"src/two.ts"));
    for call in calls {
        let confidence = call.confidence().unwrap();
        assert!(
            confidence < 0.9,
            "ambiguous call should be below full confidence, got {confidence}"
        );
    }
}

/// Incremental mode limits extraction to the given paths but re-resolves
/// relationships globally.
#[tokio::test]
async fn incremental_scan_reresolves_globally() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/a.ts", "export function alpha() {}\n");
    write(dir.path(), "src/b.ts", "export function beta() {}\n");

    let (scanner, store, _) = scanner_for(dir.path());
    scanner.scan(ScanMode::Full).await.unwrap();
    assert!(store
        .all_relationships()
        .await
        .unwrap()
        .iter()
        .all(|r| r.kind != RelationshipType::Calls));

    // Only b changes, but the new call edge targets unchanged a.
    write(
        dir.path(),
        "src/b.ts",
        "import { alpha } from './a';\nalpha();\n",
    );
    let summary = scanner
        .scan(ScanMode::Incremental(vec![PathBuf::from("src/b.ts")]))
        .await
        .unwrap();
    assert_eq!(summary.files_indexed, 1);

    let relationships = store.all_relationships().await.unwrap();
    assert!(relationships
        .iter()
        .any(|r| r.kind == RelationshipType::Calls && r.from == "src/b.ts" && r.to == "src/a.ts"));
}

/// An unresolvable relative import is kept as a flagged edge, and a later
/// scan resolves it once the target appears.
#[tokio::test]
async fn unresolved_import_is_retained_then_reresolved() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "src/app.ts",
        "import { helper } from './helper';\nhelper();\n",
    );

    let (scanner, store, _) = scanner_for(dir.path());
    scanner.scan(ScanMode::Full).await.unwrap();

    let relationships = store.all_relationships().await.unwrap();
    let unresolved: Vec<_> = relationships.iter().filter(|r| r.unresolved).collect();
    assert_eq!(unresolved.len(), 1);
    assert!(unresolved[0].to.starts_with("unresolved:"));

    // The missing file appears; the next scan resolves the edge.
    write(dir.path(), "src/helper.ts", "export function helper() {}\n");
    scanner.scan(ScanMode::Full).await.unwrap();

    let relationships = store.all_relationships().await.unwrap();
    assert!(relationships.iter().all(|r| !r.unresolved));
    assert!(relationships
        .iter()
        .any(|r| r.kind == RelationshipType::DependsOn
            && r.from == "src/app.ts"
            && r.to == "src/helper.ts"));
}
