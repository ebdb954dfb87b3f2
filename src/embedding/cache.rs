//! Best-effort embedding cache.
//!
//! Keys are `emb:<sha256 hex>` strings, values are vectors, entries expire
//! after a fixed TTL. Errors surface as [`CacheError`] and are swallowed by
//! [`EmbeddingService`](super::EmbeddingService): a broken cache degrades to
//! a miss and never fails an embedding request.

use std::time::Duration;

use chrono::Utc;
use moka::sync::Cache;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use tokio::task;

use crate::config::CacheConfig;
use crate::store::core::{blob_to_vector, vector_to_blob};
use crate::store::Database;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unknown cache backend: {0}")]
    UnknownBackend(String),
    #[error("cache storage failed: {0}")]
    Storage(String),
    #[error("cache entry corrupt: {0}")]
    Corrupt(String),
    #[error("cache task failed: {0}")]
    Task(String),
}

/// Cache tiers selectable via `[cache] backend`.
#[derive(Clone)]
pub enum CacheBackend {
    /// In-process moka cache with TTL and bounded capacity.
    Memory(Cache<String, Vec<f32>>),
    /// Rows in the `embedding_cache` table of the main database.
    Sqlite { db: Database, ttl_seconds: u64 },
    Disabled,
}

impl std::fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl CacheBackend {
    pub fn memory(ttl_seconds: u64, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(Duration::from_secs(ttl_seconds))
            .build();
        CacheBackend::Memory(cache)
    }

    /// Select the backend named in config. `db` backs the `sqlite` tier.
    pub fn from_config(config: &CacheConfig, db: &Database) -> Result<Self, CacheError> {
        match config.backend.as_str() {
            "memory" => Ok(Self::memory(config.ttl_seconds, config.max_entries)),
            "sqlite" => Ok(CacheBackend::Sqlite { db: db.clone(), ttl_seconds: config.ttl_seconds }),
            "disabled" | "none" => Ok(CacheBackend::Disabled),
            other => Err(CacheError::UnknownBackend(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CacheBackend::Memory(_) => "memory",
            CacheBackend::Sqlite { .. } => "sqlite",
            CacheBackend::Disabled => "disabled",
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<f32>>, CacheError> {
        match self {
            CacheBackend::Memory(cache) => Ok(cache.get(key)),
            CacheBackend::Sqlite { db, .. } => {
                let db = db.clone();
                let key = key.to_string();
                task::spawn_blocking(move || sqlite_get(&db, &key))
                    .await
                    .map_err(|e| CacheError::Task(e.to_string()))?
            }
            CacheBackend::Disabled => Ok(None),
        }
    }

    pub async fn put(&self, key: &str, vector: Vec<f32>) -> Result<(), CacheError> {
        match self {
            CacheBackend::Memory(cache) => {
                cache.insert(key.to_string(), vector);
                Ok(())
            }
            CacheBackend::Sqlite { db, ttl_seconds } => {
                let db = db.clone();
                let key = key.to_string();
                let expires_at = Utc::now().timestamp() + *ttl_seconds as i64;
                task::spawn_blocking(move || sqlite_put(&db, &key, &vector, expires_at))
                    .await
                    .map_err(|e| CacheError::Task(e.to_string()))?
            }
            CacheBackend::Disabled => Ok(()),
        }
    }
}

fn sqlite_get(db: &Database, key: &str) -> Result<Option<Vec<f32>>, CacheError> {
    let conn = db.conn().map_err(|e| CacheError::Storage(e.to_string()))?;
    let row: Option<(Vec<u8>, i64)> = conn
        .query_row(
            "SELECT vector, expires_at FROM embedding_cache WHERE key = ?1",
            params![key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| CacheError::Storage(e.to_string()))?;

    match row {
        Some((blob, expires_at)) if expires_at > Utc::now().timestamp() => {
            blob_to_vector(&blob).map(Some).map_err(CacheError::Corrupt)
        }
        _ => Ok(None),
    }
}

/// Upsert one entry, dropping every expired row on the way in.
fn sqlite_put(db: &Database, key: &str, vector: &[f32], expires_at: i64) -> Result<(), CacheError> {
    let conn = db.conn().map_err(|e| CacheError::Storage(e.to_string()))?;
    conn.execute(
        "DELETE FROM embedding_cache WHERE expires_at <= ?1",
        params![Utc::now().timestamp()],
    )
    .map_err(|e| CacheError::Storage(e.to_string()))?;
    conn.execute(
        "INSERT INTO embedding_cache (key, vector, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET vector = excluded.vector, expires_at = excluded.expires_at",
        params![key, vector_to_blob(vector), expires_at],
    )
    .map_err(|e| CacheError::Storage(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_db() -> (TempDir, Database) {
        let temp = TempDir::new().expect("tempdir");
        let db = Database::open(&temp.path().join("argus.db"), 5000).expect("open db");
        (temp, db)
    }

    #[tokio::test]
    async fn memory_roundtrip_and_miss() {
        let cache = CacheBackend::memory(3600, 100);
        assert_eq!(cache.get("emb:a").await.unwrap(), None);
        cache.put("emb:a", vec![1.0, 2.0]).await.unwrap();
        assert_eq!(cache.get("emb:a").await.unwrap(), Some(vec![1.0, 2.0]));
    }

    #[tokio::test]
    async fn sqlite_entry_survives_new_backend_instance() {
        let (_temp, db) = make_db();
        let a = CacheBackend::Sqlite { db: db.clone(), ttl_seconds: 3600 };
        a.put("emb:k", vec![0.5, 0.5]).await.unwrap();
        let b = CacheBackend::Sqlite { db, ttl_seconds: 3600 };
        assert_eq!(b.get("emb:k").await.unwrap(), Some(vec![0.5, 0.5]));
    }

    #[tokio::test]
    async fn sqlite_expired_entry_reads_as_miss_and_is_overwritten() {
        let (_temp, db) = make_db();
        let past = Utc::now().timestamp() - 10;
        sqlite_put(&db, "emb:old", &[1.0], past).unwrap();

        let cache = CacheBackend::Sqlite { db, ttl_seconds: 3600 };
        assert_eq!(cache.get("emb:old").await.unwrap(), None);
        cache.put("emb:old", vec![2.0]).await.unwrap();
        assert_eq!(cache.get("emb:old").await.unwrap(), Some(vec![2.0]));
    }

    #[tokio::test]
    async fn sqlite_put_purges_expired_rows() {
        let (_temp, db) = make_db();
        let cache = CacheBackend::Sqlite { db: db.clone(), ttl_seconds: 0 };
        for i in 0..50 {
            cache.put(&format!("emb:{i}"), vec![i as f32]).await.unwrap();
        }

        let rows: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM embedding_cache", [], |r| r.get(0))
            .unwrap();
        assert!(rows <= 1, "{rows} rows retained");
    }

    #[tokio::test]
    async fn disabled_never_hits() {
        let cache = CacheBackend::Disabled;
        cache.put("emb:x", vec![1.0]).await.unwrap();
        assert_eq!(cache.get("emb:x").await.unwrap(), None);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let (_temp, db) = make_db();
        let cfg = CacheConfig { backend: "redis".into(), ttl_seconds: 1, max_entries: 1 };
        assert!(matches!(CacheBackend::from_config(&cfg, &db), Err(CacheError::UnknownBackend(_))));
    }
}
