//! Configuration management for the Atlas code index.
//!
//! Every tunable of the indexing pipeline lives here: scan limits, chunk
//! sizing, embedding provider selection, resolution heuristics, storage
//! locations, and search weights. Configuration is loaded once at startup
//! and passed explicitly into the components that need it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Top-level configuration for the index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// File discovery and worker pool settings.
    pub scan: ScanConfig,

    /// Chunk sizing policy.
    pub chunk: ChunkConfig,

    /// Embedding provider selection and limits.
    pub embedding: EmbeddingConfig,

    /// Relationship resolution heuristics.
    pub resolution: ResolutionConfig,

    /// Storage backend settings.
    pub store: StoreConfig,

    /// Query-time ranking settings.
    pub search: SearchConfig,
}

/// File discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Glob-style patterns excluded from the walk, in addition to gitignore.
    pub ignore_patterns: Vec<String>,

    /// Whether to honor .gitignore files found in the tree.
    pub respect_gitignore: bool,

    /// Maximum directory depth to descend.
    pub max_depth: usize,

    /// Maximum number of files to classify. When the cap is hit the scan
    /// reports truncation instead of failing.
    pub max_files: usize,

    /// Number of concurrent per-file extraction tasks.
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
            respect_gitignore: true,
            max_depth: 32,
            max_files: 50_000,
            concurrency: 8,
        }
    }
}

/// Directories and file patterns that are never worth indexing.
pub fn default_ignore_patterns() -> Vec<String> {
    [
        ".git",
        ".hg",
        ".svn",
        "node_modules",
        "target",
        "dist",
        "build",
        "out",
        "__pycache__",
        ".venv",
        "venv",
        ".idea",
        ".vscode",
        "*.log",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Chunk sizing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Target chunk size in bytes.
    pub target_size: usize,

    /// Maximum overlap carried from the previous chunk, in bytes.
    pub max_overlap: usize,

    /// How far before the target size an entity boundary may be and still
    /// win over a hard cut, in bytes.
    pub tolerance: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_size: 1600,
            max_overlap: 200,
            tolerance: 600,
        }
    }
}

/// Which embedding provider to use first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible HTTP endpoint.
    Remote,
    /// Deterministic local hashed-feature embedder.
    Local,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Primary backend. The local backend is always available as fallback.
    pub backend: EmbeddingBackend,

    /// API key for the remote backend.
    pub api_key: Option<String>,

    /// Remote model identifier.
    pub model: String,

    /// Remote embedding dimensions.
    pub dimensions: usize,

    /// Remote endpoint URL.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum concurrent provider calls.
    pub max_concurrency: usize,

    /// Batch size for provider calls.
    pub batch_size: usize,

    /// Dimensions of the local hashed-feature embedder.
    pub local_dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            api_key: None,
            model: "qwen/qwen3-embedding-8b".to_string(),
            dimensions: 4096,
            base_url: "https://openrouter.ai/api/v1/embeddings".to_string(),
            request_timeout_secs: 30,
            max_concurrency: 4,
            batch_size: 32,
            local_dimensions: 256,
        }
    }
}

/// Relationship resolution heuristics.
///
/// The original calibration of these constants is heuristic; they are
/// configuration rather than literals so deployments can tune them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Confidence assigned to a call edge with a single candidate.
    pub call_confidence: f64,

    /// Confidence assigned to each candidate of an ambiguous call.
    pub ambiguous_call_confidence: f64,

    /// Cosine similarity threshold for SIMILAR_TO edges.
    pub similarity_threshold: f32,

    /// Maximum SIMILAR_TO edges kept per file.
    pub similarity_top_k: usize,

    /// Import specifier prefixes rewritten before resolution
    /// (e.g. "@app/" -> "src/").
    pub alias_prefixes: HashMap<String, String>,

    /// Pattern detection confidences, keyed by pattern name.
    pub pattern_confidence: HashMap<String, f32>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            call_confidence: 0.9,
            ambiguous_call_confidence: 0.5,
            similarity_threshold: 0.85,
            similarity_top_k: 5,
            alias_prefixes: HashMap::new(),
            pattern_confidence: HashMap::new(),
        }
    }
}

/// Storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the embedded snapshot store.
    pub data_dir: String,

    /// Qdrant URL for the split-backend variant, if used.
    pub qdrant_url: Option<String>,

    /// Qdrant collection name.
    pub collection_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: ".atlas-index".to_string(),
            qdrant_url: None,
            collection_name: "atlas-chunks".to_string(),
        }
    }
}

impl StoreConfig {
    /// Data directory with `~` expanded.
    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).into_owned())
    }
}

/// Query-time ranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum number of results to return.
    pub limit: usize,

    /// Weight of the vector similarity component.
    pub vector_weight: f32,

    /// Weight of the relationship-derived boost component.
    pub relationship_weight: f32,

    /// Results scoring below this floor are dropped.
    pub min_score: f32,

    /// Whether to expand hits one hop through the graph.
    pub expand_related: bool,

    /// How many candidates to fetch before re-ranking, as a multiple of
    /// `limit`.
    pub fetch_multiplier: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            vector_weight: 0.7,
            relationship_weight: 0.3,
            min_score: 0.1,
            expand_related: true,
            fetch_multiplier: 3,
        }
    }
}

impl IndexConfig {
    /// Load configuration from an optional TOML file plus `ATLAS_*`
    /// environment overrides. Missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        } else if let Some(default_path) = Self::default_path() {
            builder = builder.add_source(config::File::from(default_path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ATLAS")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: IndexConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Default config file location (`~/.config/atlas/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("atlas").join("config.toml"))
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk.target_size == 0 {
            return Err(ConfigError::Invalid(
                "chunk.target_size must be positive".to_string(),
            ));
        }
        if self.chunk.max_overlap >= self.chunk.target_size {
            return Err(ConfigError::Invalid(
                "chunk.max_overlap must be smaller than chunk.target_size".to_string(),
            ));
        }
        if self.scan.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "scan.concurrency must be positive".to_string(),
            ));
        }
        if self.embedding.backend == EmbeddingBackend::Remote && self.embedding.api_key.is_none() {
            return Err(ConfigError::Invalid(
                "embedding.api_key is required for the remote backend".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.search.vector_weight)
            || !(0.0..=1.0).contains(&self.search.relationship_weight)
        {
            return Err(ConfigError::Invalid(
                "search weights must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let cfg = IndexConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.search.limit, 10);
        assert_eq!(cfg.embedding.backend, EmbeddingBackend::Local);
    }

    #[test]
    fn loads_partial_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[chunk]
target_size = 800

[resolution]
similarity_threshold = 0.9
"#,
        )
        .unwrap();

        let cfg = IndexConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.chunk.target_size, 800);
        assert!((cfg.resolution.similarity_threshold - 0.9).abs() < f32::EPSILON);
        // Untouched sections keep defaults.
        assert_eq!(cfg.scan.max_files, 50_000);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let cfg = IndexConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.chunk.target_size, 1600);
    }

    #[test]
    fn rejects_overlap_larger_than_target() {
        let mut cfg = IndexConfig::default();
        cfg.chunk.target_size = 100;
        cfg.chunk.max_overlap = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn remote_backend_requires_api_key() {
        let mut cfg = IndexConfig::default();
        cfg.embedding.backend = EmbeddingBackend::Remote;
        assert!(cfg.validate().is_err());
        cfg.embedding.api_key = Some("key".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn data_dir_expands_tilde() {
        let cfg = StoreConfig {
            data_dir: "~/atlas".to_string(),
            ..StoreConfig::default()
        };
        let path = cfg.data_dir_path();
        assert!(!path.to_string_lossy().contains('~'));
    }
}
