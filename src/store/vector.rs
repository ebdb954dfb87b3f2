//! Similarity search over the incident and statute collections.
//!
//! Ranking happens inside SQLite through the `cosine_distance` function
//! registered by [`open_conn`](super::core::open_conn); the query shape is
//! shared by both corpora:
//!
//! ```sql
//! SELECT ... FROM (
//!     SELECT ..., 1.0 - cosine_distance(embedding, ?query) AS similarity
//!     FROM <collection> WHERE active = 1 AND embedding IS NOT NULL ...
//! ) WHERE similarity >= ?threshold
//! ORDER BY similarity DESC, id ASC LIMIT ?top_k
//! ```
//!
//! A NULL similarity (zero-norm vector) never passes the threshold filter.

use rusqlite::{Connection, Params, Row};
use serde::Serialize;
use tokio::task;
use tracing::debug;

use crate::config::SearchParams;
use crate::error::AppError;
use crate::store::incidents::{Incident, IncidentStore};
use crate::store::statutes::{Statute, StatuteStore};

/// A record paired with its cosine similarity to the query, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scored<T> {
    pub record: T,
    pub similarity: f32,
}

/// Run a prepared similarity query whose last selected column is `similarity`.
pub(crate) fn run_search<T, P, F>(
    conn: &Connection,
    label: &str,
    sql: &str,
    params: P,
    mut map: F,
) -> Result<Vec<Scored<T>>, AppError>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| AppError::Storage(format!("{label}: prepare search: {e}")))?;

    let rows = stmt
        .query_map(params, |row| {
            let record = map(row)?;
            let similarity: f64 = row.get("similarity")?;
            Ok(Scored { record, similarity: similarity.clamp(0.0, 1.0) as f32 })
        })
        .map_err(|e| AppError::Storage(format!("{label}: execute search: {e}")))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row.map_err(|e| AppError::Storage(format!("{label}: map search row: {e}")))?);
    }
    Ok(results)
}

/// Async facade over both collections.
///
/// Rejects query vectors of the wrong dimension before touching SQLite and
/// runs the synchronous searches on the blocking pool.
#[derive(Debug, Clone)]
pub struct VectorStore {
    incidents: IncidentStore,
    statutes: StatuteStore,
    dimensions: usize,
}

impl VectorStore {
    pub fn new(incidents: IncidentStore, statutes: StatuteStore, dimensions: usize) -> Self {
        Self { incidents, statutes, dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Top incident reports for `tenant_id` at or above `params.threshold`.
    pub async fn search_incidents(
        &self,
        embedding: Vec<f32>,
        tenant_id: i64,
        params: SearchParams,
    ) -> Result<Vec<Scored<Incident>>, AppError> {
        self.check_dimension(&embedding)?;
        let store = self.incidents.clone();
        let hits = task::spawn_blocking(move || store.search(&embedding, Some(tenant_id), params))
            .await
            .map_err(|e| AppError::Storage(format!("incident search task failed: {e}")))??;
        debug!(tenant_id, hits = hits.len(), "incident search done");
        Ok(hits)
    }

    /// Top active statutes at or above `params.threshold`.
    pub async fn search_statutes(
        &self,
        embedding: Vec<f32>,
        params: SearchParams,
    ) -> Result<Vec<Scored<Statute>>, AppError> {
        self.check_dimension(&embedding)?;
        let store = self.statutes.clone();
        let hits = task::spawn_blocking(move || store.search(&embedding, params))
            .await
            .map_err(|e| AppError::Storage(format!("statute search task failed: {e}")))??;
        debug!(hits = hits.len(), "statute search done");
        Ok(hits)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), AppError> {
        if embedding.len() != self.dimensions {
            return Err(AppError::InvalidInput(format!(
                "query vector has dimension {}, collection expects {}",
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::core::Database;
    use tempfile::TempDir;

    fn make_store(dim: usize) -> (TempDir, VectorStore) {
        let temp = TempDir::new().expect("tempdir");
        let db = Database::open(&temp.path().join("argus.db"), 5000).expect("open db");
        let store = VectorStore::new(IncidentStore::new(db.clone()), StatuteStore::new(db), dim);
        (temp, store)
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected_before_search() {
        let (_temp, store) = make_store(4);
        let params = SearchParams { threshold: 0.0, top_k: 3 };
        let err = store.search_statutes(vec![1.0; 512], params).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_collections_return_empty() {
        let (_temp, store) = make_store(4);
        let params = SearchParams { threshold: 0.0, top_k: 3 };
        assert!(store.search_incidents(vec![1.0, 0.0, 0.0, 0.0], 1, params).await.unwrap().is_empty());
        assert!(store.search_statutes(vec![1.0, 0.0, 0.0, 0.0], params).await.unwrap().is_empty());
    }
}
