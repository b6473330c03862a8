//! Query processing: semantic search with graph-aware re-ranking.
//!
//! A search embeds the query, retrieves the nearest chunks, expands each
//! hit one hop through the relationship graph, and re-ranks by a weighted
//! combination of vector similarity and a relationship-derived boost: a
//! hit that is graph-connected to another hit outranks an isolated one.
//! Queries falling below the similarity floor return an empty set, never
//! an error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use atlas_config::SearchConfig;

use crate::embeddings::{EmbeddingError, EmbeddingGenerator};
use crate::graph::{RelationshipType, Subgraph};
use crate::store::{IndexStore, NearestFilter, StoreError};

/// Errors surfaced by query processing.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Store failed: {0}")]
    Store(#[from] StoreError),
}

/// Optional constraints on a search.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Restrict to files of one language.
    pub language: Option<String>,
    /// Restrict to files under a path prefix.
    pub path_prefix: Option<String>,
    /// Restrict to files indexed at or after this unix time (recency).
    pub indexed_after: Option<u64>,
}

impl QueryFilters {
    fn to_nearest(&self) -> NearestFilter {
        let mut filter = NearestFilter::new();
        if let Some(language) = &self.language {
            filter = filter.with_language(language.clone());
        }
        if let Some(prefix) = &self.path_prefix {
            filter = filter.with_path_prefix(prefix.clone());
        }
        if let Some(after) = self.indexed_after {
            filter = filter.with_indexed_after(after);
        }
        filter
    }
}

/// One relationship hop surfaced next to a search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedHop {
    pub kind: RelationshipType,
    pub to: String,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_path: String,
    pub line_start: usize,
    pub line_end: usize,
    /// Matched chunk text.
    pub snippet: String,
    /// Entity the chunk is aligned to, when known.
    pub entity: Option<String>,
    /// Combined relevance score.
    pub score: f32,
    /// Raw vector similarity component.
    pub vector_score: f32,
    /// Relationship boost component.
    pub boost: f32,
    /// One-hop relationships to other files in the result set.
    pub related: Vec<RelatedHop>,
}

/// Edge kinds that contribute to the ranking boost.
const BOOST_KINDS: &[RelationshipType] = &[
    RelationshipType::Calls,
    RelationshipType::DependsOn,
    RelationshipType::Implements,
    RelationshipType::Extends,
    RelationshipType::Instantiates,
    RelationshipType::Uses,
];

/// Turns free-text queries into ranked, graph-enriched results.
pub struct QueryProcessor<S: IndexStore + ?Sized> {
    store: Arc<S>,
    generator: Arc<EmbeddingGenerator>,
    config: SearchConfig,
}

impl<S: IndexStore + ?Sized> QueryProcessor<S> {
    pub fn new(store: Arc<S>, generator: Arc<EmbeddingGenerator>, config: SearchConfig) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    /// Semantic search with graph-aware re-ranking.
    pub async fn search(
        &self,
        query: &str,
        filters: &QueryFilters,
    ) -> Result<Vec<SearchResult>, QueryError> {
        debug!("Searching for: {query}");

        let embedded = self.generator.embed_query(query).await?;
        let fetch = self.config.limit * self.config.fetch_multiplier.max(1);
        let hits = self
            .store
            .query_nearest(
                &embedded.vector,
                &embedded.provider,
                fetch,
                &filters.to_nearest(),
            )
            .await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let hit_paths: HashSet<String> = hits.iter().map(|h| h.chunk.file_path.clone()).collect();

        // One hop through the graph per distinct file; a hit connected to
        // another hit earns a boost proportional to its connections.
        let mut hops_by_path: HashMap<String, Vec<RelatedHop>> = HashMap::new();
        if self.config.expand_related {
            for path in &hit_paths {
                let subgraph = self
                    .store
                    .query_related(path, BOOST_KINDS, 1)
                    .await?;
                let hops = hops_by_path.entry(path.clone()).or_default();
                for relationship in subgraph.relationships {
                    if relationship.from == *path {
                        hops.push(RelatedHop {
                            kind: relationship.kind,
                            to: relationship.to,
                        });
                    }
                }
            }
        }

        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|hit| {
                let related = hops_by_path
                    .get(&hit.chunk.file_path)
                    .cloned()
                    .unwrap_or_default();
                let connected = related
                    .iter()
                    .filter(|hop| hit_paths.contains(&hop.to) && hop.to != hit.chunk.file_path)
                    .count();
                // Saturating boost: the first connection matters most.
                let boost = 1.0 - 0.5f32.powi(connected as i32);
                let score = self.config.vector_weight * hit.score
                    + self.config.relationship_weight * boost;

                SearchResult {
                    file_path: hit.chunk.file_path,
                    line_start: hit.chunk.line_start,
                    line_end: hit.chunk.line_end,
                    snippet: hit.chunk.text,
                    entity: hit.chunk.entity,
                    score,
                    vector_score: hit.score,
                    boost,
                    related,
                }
            })
            .filter(|r| r.vector_score >= self.config.min_score)
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(self.config.limit);

        debug!("Search returned {} results", results.len());
        Ok(results)
    }

    /// Bounded-depth subgraph around a file.
    pub async fn related(
        &self,
        path: &str,
        kinds: &[RelationshipType],
        depth: usize,
    ) -> Result<Subgraph, QueryError> {
        Ok(self.store.query_related(path, kinds, depth).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::embeddings::{EmbeddingProvider, HashEmbeddings};
    use crate::extractor::content_hash;
    use crate::graph::{FileKind, FileNode, Relationship};
    use crate::store::{MemoryStore, StoredEmbedding};

    async fn store_with_chunks(texts: &[(&str, &str)]) -> (Arc<MemoryStore>, Arc<EmbeddingGenerator>) {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(HashEmbeddings::new(128));
        let generator = Arc::new(EmbeddingGenerator::with_providers(
            vec![provider.clone()],
            2,
        ));

        for (path, text) in texts {
            let hash = content_hash(text);
            let vector = provider.embed(text).await.unwrap();
            let node = FileNode::new(*path, FileKind::File, "typescript")
                .with_content(text.len() as u64, content_hash(text));
            let chunk = Chunk {
                file_path: path.to_string(),
                byte_start: 0,
                byte_end: text.len(),
                line_start: 1,
                line_end: 1,
                text: text.to_string(),
                overlap: 0,
                content_hash: hash.clone(),
                entity: None,
                language: "typescript".to_string(),
            };
            let stored = StoredEmbedding {
                chunk_hash: hash,
                record: crate::embeddings::EmbeddingRecord {
                    vector,
                    provider: provider.provider_id().to_string(),
                    created_at: 0,
                },
            };
            store.upsert_file(node, vec![chunk], vec![stored]).await.unwrap();
        }

        (store, generator)
    }

    #[tokio::test]
    async fn exact_text_ranks_first_with_max_similarity() {
        let (store, generator) = store_with_chunks(&[
            ("src/auth.ts", "function login(user, password) { return token; }"),
            ("src/math.ts", "function add(a, b) { return a + b; }"),
        ])
        .await;

        let processor = QueryProcessor::new(store, generator, SearchConfig::default());
        let results = processor
            .search(
                "function login(user, password) { return token; }",
                &QueryFilters::default(),
            )
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].file_path, "src/auth.ts");
        assert!(results[0].vector_score > 0.999);
    }

    #[tokio::test]
    async fn below_floor_returns_empty_not_error() {
        let (store, generator) =
            store_with_chunks(&[("src/a.ts", "alpha beta gamma")]).await;

        let config = SearchConfig {
            min_score: 0.99,
            ..SearchConfig::default()
        };
        let processor = QueryProcessor::new(store, generator, config);
        let results = processor
            .search("completely unrelated zebra firmware", &QueryFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn graph_connection_boosts_ranking() {
        let (store, generator) = store_with_chunks(&[
            ("src/a.ts", "handle payment processing checkout"),
            ("src/b.ts", "handle payment processing checkout"),
        ])
        .await;
        // a calls b: both hits, but a gets the boost.
        store
            .replace_relationships(vec![Relationship::new(
                "src/a.ts",
                "src/b.ts",
                RelationshipType::Calls,
            )])
            .await
            .unwrap();

        let processor = QueryProcessor::new(store, generator, SearchConfig::default());
        let results = processor
            .search("payment processing", &QueryFilters::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].file_path, "src/a.ts");
        assert!(results[0].boost > results[1].boost);
        assert_eq!(results[0].related.len(), 1);
        assert_eq!(results[0].related[0].to, "src/b.ts");
    }

    #[tokio::test]
    async fn language_filter_narrows_results() {
        let (store, generator) = store_with_chunks(&[
            ("src/a.ts", "serialize the response body"),
        ])
        .await;

        let processor = QueryProcessor::new(store, generator, SearchConfig::default());
        let filters = QueryFilters {
            language: Some("python".to_string()),
            ..QueryFilters::default()
        };
        let results = processor
            .search("serialize the response body", &filters)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
