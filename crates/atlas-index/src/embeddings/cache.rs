//! Content-hash keyed embedding cache with single-flight semantics.
//!
//! Identical text always maps to one cached vector, and concurrent
//! lookups for the same hash collapse into a single provider call rather
//! than duplicating billable requests. A failed computation leaves the
//! slot empty so a later scan can retry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use super::{EmbeddingError, EmbeddingRecord};

/// Concurrent-safe embedding cache keyed by content hash.
#[derive(Default)]
pub struct EmbeddingCache {
    slots: Mutex<HashMap<String, Arc<OnceCell<EmbeddingRecord>>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a completed record exists for the hash.
    pub async fn contains(&self, hash: &str) -> bool {
        let slots = self.slots.lock().await;
        slots.get(hash).map(|c| c.get().is_some()).unwrap_or(false)
    }

    /// Number of completed entries.
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|c| c.get().is_some()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Return the cached record for the hash, or run `compute` to fill
    /// it. Concurrent callers with the same hash share one computation;
    /// on failure the slot stays empty for a later retry.
    pub async fn get_or_compute<F, Fut>(
        &self,
        hash: &str,
        compute: F,
    ) -> Result<EmbeddingRecord, EmbeddingError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<EmbeddingRecord, EmbeddingError>>,
    {
        let cell = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(hash.to_string()).or_default())
        };

        let record = cell.get_or_try_init(compute).await?;
        debug!("Embedding cache serve for {hash}");
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(marker: f32) -> EmbeddingRecord {
        EmbeddingRecord {
            vector: vec![marker; 4],
            provider: "test".to_string(),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn second_lookup_hits_cache() {
        let cache = EmbeddingCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = cache
                .get_or_compute("h1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(record(1.0))
                })
                .await
                .unwrap();
            assert_eq!(result.vector, vec![1.0; 4]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains("h1").await);
        assert!(!cache.contains("h2").await);
    }

    #[tokio::test]
    async fn concurrent_lookups_collapse_to_one_call() {
        let cache = Arc::new(EmbeddingCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Widen the race window.
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        Ok(record(2.0))
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().vector, vec![2.0; 4]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_leaves_slot_retryable() {
        let cache = EmbeddingCache::new();

        let err = cache
            .get_or_compute("h", || async {
                Err(EmbeddingError::Network("down".to_string()))
            })
            .await;
        assert!(err.is_err());
        assert!(!cache.contains("h").await);

        let ok = cache
            .get_or_compute("h", || async { Ok(record(3.0)) })
            .await
            .unwrap();
        assert_eq!(ok.vector, vec![3.0; 4]);
    }
}
