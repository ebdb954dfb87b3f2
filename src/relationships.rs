//! Relationship materializer.
//!
//! Turns "these persons appeared together in event E at time T" into
//! upserts on the relationship graph: one canonical edge per distinct pair,
//! all pairs of one event committed together.

use chrono::{DateTime, Utc};
use tokio::task;
use tracing::{debug, info};

use crate::error::AppError;
use crate::store::relationships::{RelationshipEdge, RelationshipStore};

pub use crate::store::relationships::pairs_of;

#[derive(Debug, Clone)]
pub struct Materializer {
    store: RelationshipStore,
}

impl Materializer {
    pub fn new(store: RelationshipStore) -> Self {
        Self { store }
    }

    /// Record one co-occurrence event. Returns the number of pairs upserted.
    ///
    /// Fewer than two distinct persons is a no-op returning `0`. Storage
    /// failures propagate and leave none of the event's pairs applied.
    pub async fn register_cooccurrence(
        &self,
        person_ids: &[i64],
        event_id: i64,
        event_time: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let pairs = pairs_of(person_ids);
        if pairs.is_empty() {
            debug!(event_id, persons = person_ids.len(), "fewer than two distinct persons; nothing to link");
            return Ok(0);
        }

        let store = self.store.clone();
        let n = task::spawn_blocking(move || store.upsert_pairs(&pairs, event_id, event_time))
            .await
            .map_err(|e| AppError::Storage(format!("materializer task failed: {e}")))??;

        info!(event_id, pairs = n, "co-occurrence registered");
        Ok(n)
    }

    /// Edges touching `person_id`, strongest first.
    pub async fn edges_for(&self, person_id: i64) -> Result<Vec<RelationshipEdge>, AppError> {
        let store = self.store.clone();
        task::spawn_blocking(move || store.edges_for(person_id))
            .await
            .map_err(|e| AppError::Storage(format!("edge lookup task failed: {e}")))?
    }

    pub async fn edge_between(&self, x: i64, y: i64) -> Result<Option<RelationshipEdge>, AppError> {
        let store = self.store.clone();
        task::spawn_blocking(move || store.edge_between(x, y))
            .await
            .map_err(|e| AppError::Storage(format!("edge lookup task failed: {e}")))?
    }
}
