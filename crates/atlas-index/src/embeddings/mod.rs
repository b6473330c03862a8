//! Embedding provider trait and implementations.
//!
//! Two providers ship here: a remote OpenAI-compatible HTTP provider and
//! a deterministic local hashed-feature embedder used as fallback. The
//! [`EmbeddingGenerator`] front-end adds content-hash caching with
//! single-flight semantics and primary-to-fallback failover. Vectors
//! always carry the id of the provider that produced them; vectors from
//! different providers are never compared to each other.

pub mod cache;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use atlas_config::{EmbeddingBackend, EmbeddingConfig};

use crate::extractor::content_hash;

pub use cache::EmbeddingCache;

/// Errors that can occur during embedding generation.
#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    #[error("API request failed: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited after {0} retries")]
    RateLimited(u32),

    #[error("Network error: {0}")]
    Network(String),

    #[error("All providers failed, last error: {0}")]
    AllProvidersFailed(String),
}

/// A produced vector together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub vector: Vec<f32>,
    /// Id of the provider that produced the vector.
    pub provider: String,
    /// Unix seconds at generation time.
    pub created_at: u64,
}

/// Capability interface for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed multiple texts in one call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Number of dimensions of produced vectors.
    fn dimensions(&self) -> usize;

    /// Stable provider id recorded next to every vector.
    fn provider_id(&self) -> &str;

    /// Maximum batch size supported.
    fn max_batch_size(&self) -> usize {
        32
    }
}

/// Request body for OpenAI-compatible embedding APIs.
#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

/// Response from the embedding API.
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Remote embedding provider for OpenAI-compatible endpoints.
pub struct RemoteEmbeddings {
    api_key: String,
    model: String,
    dimensions: usize,
    client: Client,
    base_url: String,
    provider_id: String,
}

impl RemoteEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        Ok(Self {
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            client,
            base_url: config.base_url.clone(),
            provider_id: format!("remote:{}", config.model),
        })
    }

    /// Override the endpoint URL (tests, proxies).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Send an embedding request, retrying on rate limits with backoff.
    async fn send_request(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request_body = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.clone(),
        };

        let mut retry_count = 0u32;
        let max_retries = 3;
        let mut backoff_secs = 1u64;

        loop {
            debug!(
                "Sending embedding request for {} texts to {}",
                texts.len(),
                self.base_url
            );

            let response = self
                .client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request_body)
                .send()
                .await
                .map_err(|e| EmbeddingError::Network(e.to_string()))?;

            let status = response.status();

            if status.is_success() {
                let embedding_response: EmbeddingResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

                // Sort by index so output order matches input order.
                let mut embeddings: Vec<(usize, Vec<f32>)> = embedding_response
                    .data
                    .into_iter()
                    .map(|d| (d.index, d.embedding))
                    .collect();
                embeddings.sort_by_key(|(idx, _)| *idx);

                if embeddings.len() != texts.len() {
                    return Err(EmbeddingError::InvalidResponse(format!(
                        "expected {} vectors, got {}",
                        texts.len(),
                        embeddings.len()
                    )));
                }

                return Ok(embeddings.into_iter().map(|(_, emb)| emb).collect());
            }

            if status.as_u16() == 429 {
                retry_count += 1;
                if retry_count > max_retries {
                    return Err(EmbeddingError::RateLimited(max_retries));
                }

                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                warn!(
                    "Rate limited, retrying after {} seconds (attempt {}/{})",
                    retry_after, retry_count, max_retries
                );

                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                backoff_secs *= 2;
                continue;
            }

            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::Api(format!(
                "status {}: {}",
                status.as_u16(),
                error_body
            )));
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.send_request(texts.to_vec()).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

/// Deterministic local embedder: hashed token, bigram, and character
/// trigram features folded into a fixed-dimension vector with hash-derived
/// signs, L2-normalized. No network, no model files; always available as
/// the fallback provider.
pub struct HashEmbeddings {
    dimensions: usize,
    provider_id: String,
}

impl HashEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(64);
        Self {
            dimensions,
            provider_id: format!("local-hash-v1:{dimensions}"),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let normalized = text.to_lowercase();
        let tokens: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return vector;
        }

        for token in &tokens {
            add_feature(&mut vector, &format!("t:{token}"), 1.0);
        }
        for pair in tokens.windows(2) {
            add_feature(&mut vector, &format!("b:{}_{}", pair[0], pair[1]), 0.8);
        }

        let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
        let compact_chars: Vec<char> = compact.chars().collect();
        for tri in compact_chars.windows(3) {
            let trigram: String = tri.iter().collect();
            add_feature(&mut vector, &format!("c:{trigram}"), 0.15);
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Fold one feature into the vector at a hash-chosen index with a
/// hash-chosen sign.
fn add_feature(vector: &mut [f32], feature: &str, weight: f32) {
    let mut hasher = Sha256::new();
    hasher.update(feature.as_bytes());
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    let index = (u64::from_le_bytes(first) as usize) % vector.len();
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    vector[index] += sign * weight;
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

/// Counters exposed in the scan summary.
#[derive(Debug, Default)]
pub struct GeneratorStats {
    generated: AtomicUsize,
    cache_hits: AtomicUsize,
    primary_failures: AtomicUsize,
}

impl GeneratorStats {
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn primary_failures(&self) -> usize {
        self.primary_failures.load(Ordering::Relaxed)
    }
}

/// Front-end over the provider chain: cache first, then the primary
/// provider, then the fallback. Concurrency against providers is bounded;
/// concurrent requests for the same content hash collapse to one call.
pub struct EmbeddingGenerator {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    cache: EmbeddingCache,
    limiter: Arc<Semaphore>,
    stats: Arc<GeneratorStats>,
}

impl EmbeddingGenerator {
    /// Build the provider chain from configuration. The local hashed
    /// embedder is always the last link.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let local = Arc::new(HashEmbeddings::new(config.local_dimensions));
        let providers: Vec<Arc<dyn EmbeddingProvider>> = match config.backend {
            EmbeddingBackend::Remote => {
                vec![Arc::new(RemoteEmbeddings::new(config)?), local]
            }
            EmbeddingBackend::Local => vec![local],
        };
        Ok(Self::with_providers(providers, config.max_concurrency))
    }

    /// Build from an explicit provider chain, primary first.
    pub fn with_providers(
        providers: Vec<Arc<dyn EmbeddingProvider>>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            providers,
            cache: EmbeddingCache::new(),
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            stats: Arc::new(GeneratorStats::default()),
        }
    }

    /// Provider id queries will be compared against.
    pub fn active_provider_id(&self) -> &str {
        self.providers
            .first()
            .map(|p| p.provider_id())
            .unwrap_or("none")
    }

    pub fn stats(&self) -> &GeneratorStats {
        &self.stats
    }

    /// Embed a chunk by content hash, consulting the cache first.
    pub async fn embed_chunk(
        &self,
        hash: &str,
        text: &str,
    ) -> Result<EmbeddingRecord, EmbeddingError> {
        let stats = Arc::clone(&self.stats);
        let had_hit = self.cache.contains(hash).await;
        let record = self
            .cache
            .get_or_compute(hash, || async {
                stats.generated.fetch_add(1, Ordering::Relaxed);
                self.call_chain(text).await
            })
            .await?;
        if had_hit {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(record)
    }

    /// Embed a free-text query. Queries share the cache so repeated
    /// searches stay cheap.
    pub async fn embed_query(&self, text: &str) -> Result<EmbeddingRecord, EmbeddingError> {
        let hash = content_hash(text);
        self.embed_chunk(&hash, text).await
    }

    /// Walk the provider chain until one succeeds.
    async fn call_chain(&self, text: &str) -> Result<EmbeddingRecord, EmbeddingError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let mut last_error = None;
        for (i, provider) in self.providers.iter().enumerate() {
            match provider.embed(text).await {
                Ok(vector) => {
                    return Ok(EmbeddingRecord {
                        vector,
                        provider: provider.provider_id().to_string(),
                        created_at: unix_now(),
                    });
                }
                Err(err) => {
                    if i == 0 && self.providers.len() > 1 {
                        self.stats.primary_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Primary embedding provider {} failed, falling back: {}",
                            provider.provider_id(),
                            err
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(EmbeddingError::AllProvidersFailed(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Cosine similarity between two vectors. Mismatched dimensions (vectors
/// from different providers) compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Provider that always fails; for fallback tests.
    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Network("connection refused".to_string()))
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Network("connection refused".to_string()))
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn provider_id(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn hash_embeddings_are_deterministic_and_normalized() {
        let provider = HashEmbeddings::new(128);
        let a = provider.embed("fn login(user: &str)").await.unwrap();
        let b = provider.embed("fn login(user: &str)").await.unwrap();
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn similar_texts_are_closer_than_unrelated() {
        let provider = HashEmbeddings::new(256);
        let base = provider.embed("parse the config file").await.unwrap();
        let near = provider.embed("parse the config files").await.unwrap();
        let far = provider.embed("zebra quantum firmware").await.unwrap();

        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(dot(&base, &near) > dot(&base, &far));
    }

    #[tokio::test]
    async fn generator_falls_back_to_local_provider() {
        let generator = EmbeddingGenerator::with_providers(
            vec![Arc::new(FailingProvider), Arc::new(HashEmbeddings::new(64))],
            2,
        );

        let record = generator.embed_query("some text").await.unwrap();
        assert!(record.provider.starts_with("local-hash"));
        assert_eq!(record.vector.len(), 64);
        assert_eq!(generator.stats().primary_failures(), 1);
    }

    #[tokio::test]
    async fn generator_reports_total_failure() {
        let generator =
            EmbeddingGenerator::with_providers(vec![Arc::new(FailingProvider)], 2);
        let err = generator.embed_query("text").await;
        assert!(matches!(err, Err(EmbeddingError::AllProvidersFailed(_))));
    }

    #[tokio::test]
    async fn identical_hashes_use_one_provider_call() {
        let generator = EmbeddingGenerator::with_providers(
            vec![Arc::new(HashEmbeddings::new(64))],
            4,
        );

        let first = generator.embed_chunk("hash-1", "duplicate text").await.unwrap();
        let second = generator.embed_chunk("hash-1", "duplicate text").await.unwrap();
        assert_eq!(first.vector, second.vector);
        assert_eq!(generator.stats().generated(), 1);
    }

    #[test]
    fn remote_provider_carries_model_in_id() {
        let config = EmbeddingConfig {
            api_key: Some("key".to_string()),
            ..EmbeddingConfig::default()
        };
        let provider = RemoteEmbeddings::new(&config).unwrap();
        assert_eq!(provider.provider_id(), "remote:qwen/qwen3-embedding-8b");
        assert_eq!(provider.dimensions(), 4096);
    }
}
