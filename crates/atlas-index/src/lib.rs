//! Codebase graph and semantic search index.
//!
//! This crate provides:
//! - File discovery and classification with ignore rules
//! - AST-based entity extraction using tree-sitter
//! - Entity-aligned content chunking with bounded overlap
//! - Embedding generation with provider fallback and a single-flight
//!   content-hash cache
//! - Second-pass relationship resolution (imports, inheritance, calls,
//!   tests, patterns, semantic similarity)
//! - A backend-agnostic index store (embedded, snapshot-persistent, or
//!   qdrant-backed vectors)
//! - Query processing with graph-aware re-ranking
//!
//! The scan pipeline is two-phase: file tasks build nodes in parallel,
//! then the resolver computes the full relationship set once every node
//! is known.

pub mod chunker;
pub mod classifier;
pub mod embeddings;
pub mod extractor;
pub mod graph;
pub mod patterns;
pub mod query;
pub mod resolver;
pub mod scanner;
pub mod store;

// Re-exports
pub use chunker::{reassemble, Chunk, Chunker};
pub use classifier::{classify_kind, detect_language, CandidateFile, Classifier, ScanManifest};
pub use embeddings::{
    cosine_similarity, EmbeddingCache, EmbeddingError, EmbeddingGenerator, EmbeddingProvider,
    EmbeddingRecord, HashEmbeddings, RemoteEmbeddings,
};
pub use extractor::{content_hash, EntityExtractor, ExtractorError};
pub use graph::{
    ClassInfo, CodeGraph, FileKind, FileNode, FunctionInfo, ImportKind, ImportRelation,
    PatternInfo, PatternKind, RelatedNode, Relationship, RelationshipType, Subgraph, VariableInfo,
    VariableScope,
};
pub use patterns::PatternDetector;
pub use query::{QueryError, QueryFilters, QueryProcessor, RelatedHop, SearchResult};
pub use resolver::{ChunkVector, ResolutionReport, Resolver, UnresolvedType};
pub use scanner::{CancelHandle, ScanError, ScanMode, ScanSummary, Scanner};
pub use store::{
    IndexStore, MemoryStore, NearestFilter, NearestHit, QdrantVectorBackend, QdrantVectorConfig,
    SnapshotStore, SplitStore, StoreError, StoreStats, StoredEmbedding, UpsertOutcome,
};

/// Default qdrant collection name.
pub const DEFAULT_COLLECTION: &str = "atlas-chunks";

/// Default dimensions of the local hashed-feature embedder.
pub const DEFAULT_LOCAL_DIMENSIONS: usize = 256;
