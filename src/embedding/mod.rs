//! Text embedding provider and cache.
//!
//! `EmbeddingProvider` is a closed enum selected once at startup by
//! [`providers::build`]. [`EmbeddingService`] wraps it with output-dimension
//! checks and the best-effort cache, and is shared as an `Arc` by every
//! request path.

pub mod cache;
pub mod providers;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, warn};

use crate::store::core::sha256_hex;
use cache::CacheBackend;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),
    #[error("cannot embed empty text")]
    EmptyInput,
    #[error("embedding has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding model unavailable: {0}")]
    Model(String),
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding task failed: {0}")]
    Task(String),
}

// ── Provider enum ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum EmbeddingProvider {
    Onnx(providers::onnx::OnnxEmbedder),
    Hashing(providers::hashing::HashingEmbedder),
    Remote(providers::remote::RemoteEmbedder),
}

impl EmbeddingProvider {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            EmbeddingProvider::Onnx(p) => p.embed_batch(texts).await,
            EmbeddingProvider::Hashing(p) => p.embed_batch(texts).await,
            EmbeddingProvider::Remote(p) => p.embed_batch(texts).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingProvider::Onnx(_) => "onnx",
            EmbeddingProvider::Hashing(_) => "hashing",
            EmbeddingProvider::Remote(_) => "remote",
        }
    }
}

/// Cache key for `text`: `emb:` + SHA-256 of the trimmed text.
pub fn cache_key(text: &str) -> String {
    format!("emb:{}", sha256_hex(text.trim()))
}

/// Hit/miss counters of [`EmbeddingService::embed_cached`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct EmbeddingService {
    provider: EmbeddingProvider,
    cache: CacheBackend,
    dimensions: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingService {
    pub fn new(provider: EmbeddingProvider, cache: CacheBackend, dimensions: usize) -> Self {
        Self { provider, cache, dimensions, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn cache_name(&self) -> &'static str {
        self.cache.name()
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats { hits: self.hits.load(Ordering::Relaxed), misses: self.misses.load(Ordering::Relaxed) }
    }

    /// Embed one text, bypassing the cache.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| EmbeddingError::Request("provider returned no vector".into()))
    }

    /// Embed many texts in one provider call, preserving order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }
        let vectors = self.provider.embed_batch(texts.to_vec()).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Request(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        for v in &vectors {
            self.check_dimension(v)?;
        }
        debug!(provider = self.provider.name(), count = vectors.len(), "embedded batch");
        Ok(vectors)
    }

    /// Embed through the cache: a hit returns the stored vector, a miss
    /// computes, stores and returns. Cache failures are logged and ignored.
    pub async fn embed_cached(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = cache_key(text);

        match self.cache.get(&key).await {
            Ok(Some(v)) if v.len() == self.dimensions => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "embedding cache hit");
                return Ok(v);
            }
            Ok(Some(v)) => {
                warn!(%key, len = v.len(), expected = self.dimensions, "cached embedding has wrong dimension; recomputing");
            }
            Ok(None) => {}
            Err(e) => warn!(%key, error = %e, "embedding cache read failed; treating as miss"),
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let vector = self.embed(text).await?;

        if let Err(e) = self.cache.put(&key, vector.clone()).await {
            warn!(%key, error = %e, "embedding cache write failed; continuing uncached");
        }
        Ok(vector)
    }

    fn check_dimension(&self, v: &[f32]) -> Result<(), EmbeddingError> {
        if v.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch { expected: self.dimensions, actual: v.len() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::hashing::HashingEmbedder;

    fn service(dims: usize, cache: CacheBackend) -> EmbeddingService {
        EmbeddingService::new(EmbeddingProvider::Hashing(HashingEmbedder::new(dims, 2)), cache, dims)
    }

    #[test]
    fn cache_key_ignores_surrounding_whitespace() {
        assert_eq!(cache_key("  furto "), cache_key("furto"));
        assert!(cache_key("furto").starts_with("emb:"));
        assert_eq!(cache_key("furto").len(), 4 + 64);
    }

    #[tokio::test]
    async fn cached_equals_uncached_and_second_call_hits() {
        let svc = service(64, CacheBackend::memory(3600, 100));
        let direct = svc.embed("roubo a mão armada").await.unwrap();
        let first = svc.embed_cached("roubo a mão armada").await.unwrap();
        let second = svc.embed_cached("roubo a mão armada").await.unwrap();
        assert_eq!(direct, first);
        assert_eq!(first, second);
        assert_eq!(svc.cache_stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn disabled_cache_is_transparent() {
        let svc = service(64, CacheBackend::Disabled);
        let a = svc.embed_cached("tráfico de drogas").await.unwrap();
        let b = svc.embed_cached("tráfico de drogas").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(svc.cache_stats().hits, 0);
    }

    #[tokio::test]
    async fn wrong_dimension_cache_entry_is_recomputed() {
        let cache = CacheBackend::memory(3600, 100);
        cache.put(&cache_key("x y"), vec![1.0, 2.0]).await.unwrap();
        let svc = service(64, cache);
        assert_eq!(svc.embed_cached("x y").await.unwrap().len(), 64);
    }

    #[tokio::test]
    async fn broken_cache_table_degrades_to_misses() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let db = crate::store::Database::open(&temp.path().join("argus.db"), 5000).expect("open db");
        db.conn().unwrap().execute_batch("DROP TABLE embedding_cache").unwrap();

        let svc = service(64, CacheBackend::Sqlite { db, ttl_seconds: 3600 });
        let first = svc.embed_cached("furto de celular").await.unwrap();
        let second = svc.embed_cached("furto de celular").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(svc.cache_stats(), CacheStats { hits: 0, misses: 2 });
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let svc = service(64, CacheBackend::Disabled);
        assert!(matches!(svc.embed("   ").await, Err(EmbeddingError::EmptyInput)));
        assert!(svc.embed_batch(&[]).await.unwrap().is_empty());
    }
}
