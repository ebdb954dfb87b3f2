//! Person relationship graph: one undirected, weighted edge per pair.
//!
//! Pairs are stored canonically (`person_a < person_b`, enforced by a CHECK
//! constraint). Edges are only ever created or strengthened, never deleted.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;

use super::core::{to_iso8601, Database};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipEdge {
    pub person_a: i64,
    pub person_b: i64,
    /// Number of events in which both persons appeared.
    pub weight: i64,
    pub first_seen: String,
    pub last_seen: String,
    pub first_event_id: i64,
    pub last_event_id: i64,
}

impl RelationshipEdge {
    /// The other end of the edge as seen from `person_id`.
    pub fn counterpart(&self, person_id: i64) -> Option<i64> {
        if person_id == self.person_a {
            Some(self.person_b)
        } else if person_id == self.person_b {
            Some(self.person_a)
        } else {
            None
        }
    }
}

const COLUMNS: &str =
    "person_a, person_b, weight, first_seen, last_seen, first_event_id, last_event_id";

fn map_edge(row: &Row<'_>) -> rusqlite::Result<RelationshipEdge> {
    Ok(RelationshipEdge {
        person_a: row.get(0)?,
        person_b: row.get(1)?,
        weight: row.get(2)?,
        first_seen: row.get(3)?,
        last_seen: row.get(4)?,
        first_event_id: row.get(5)?,
        last_event_id: row.get(6)?,
    })
}

/// All `C(n, 2)` canonical pairs of the distinct ids in `person_ids`.
pub fn pairs_of(person_ids: &[i64]) -> Vec<(i64, i64)> {
    let mut ids = person_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut pairs = Vec::with_capacity(ids.len() * ids.len().saturating_sub(1) / 2);
    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + 1..] {
            pairs.push((a, b));
        }
    }
    pairs
}

/// Order a pair canonically. `None` for a self-pair.
pub fn canonical_pair(x: i64, y: i64) -> Option<(i64, i64)> {
    match x.cmp(&y) {
        std::cmp::Ordering::Less => Some((x, y)),
        std::cmp::Ordering::Greater => Some((y, x)),
        std::cmp::Ordering::Equal => None,
    }
}

#[derive(Debug, Clone)]
pub struct RelationshipStore {
    db: Database,
}

impl RelationshipStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert every given canonical pair for one event, atomically.
    ///
    /// Runs in an IMMEDIATE transaction so concurrent events serialize on the
    /// write lock instead of failing mid-way on lock upgrade.
    pub fn upsert_pairs(
        &self,
        pairs: &[(i64, i64)],
        event_id: i64,
        event_time: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::Storage(format!("relationships: begin tx: {e}")))?;

        upsert_pairs_tx(&tx, pairs, event_id, &to_iso8601(event_time))?;

        tx.commit()
            .map_err(|e| AppError::Storage(format!("relationships: commit event {event_id}: {e}")))?;
        Ok(pairs.len())
    }

    /// Edges touching `person_id` on either side, strongest first.
    pub fn edges_for(&self, person_id: i64) -> Result<Vec<RelationshipEdge>, AppError> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM relationships
                 WHERE person_a = ?1 OR person_b = ?1
                 ORDER BY weight DESC, last_seen DESC, person_a ASC, person_b ASC"
            ))
            .map_err(|e| AppError::Storage(format!("relationships: prepare edges: {e}")))?;
        let rows = stmt
            .query_map(params![person_id], map_edge)
            .map_err(|e| AppError::Storage(format!("relationships: query edges: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| AppError::Storage(format!("relationships: map edge row: {e}")))
    }

    /// The single edge between `x` and `y`, in either argument order.
    pub fn edge_between(&self, x: i64, y: i64) -> Result<Option<RelationshipEdge>, AppError> {
        let Some((a, b)) = canonical_pair(x, y) else {
            return Ok(None);
        };
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM relationships WHERE person_a = ?1 AND person_b = ?2"),
            params![a, b],
            map_edge,
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("relationships: get edge: {e}")))
    }

    pub fn count(&self) -> Result<i64, AppError> {
        let conn = self.db.conn()?;
        conn.query_row("SELECT COUNT(*) FROM relationships", [], |r| r.get(0))
            .map_err(|e| AppError::Storage(format!("relationships: count: {e}")))
    }
}

/// Apply one event's pairs inside a caller-owned transaction.
///
/// Lets an encounter and its edges commit or roll back together.
pub(crate) fn upsert_pairs_tx(
    tx: &Transaction<'_>,
    pairs: &[(i64, i64)],
    event_id: i64,
    seen: &str,
) -> Result<(), AppError> {
    for &(a, b) in pairs {
        upsert_one(tx, a, b, event_id, seen)?;
    }
    Ok(())
}

fn upsert_one(tx: &Transaction<'_>, a: i64, b: i64, event_id: i64, seen: &str) -> Result<(), AppError> {
    tx.execute(
        "INSERT INTO relationships
            (person_a, person_b, weight, first_seen, last_seen, first_event_id, last_event_id)
         VALUES (?1, ?2, 1, ?3, ?3, ?4, ?4)
         ON CONFLICT(person_a, person_b) DO UPDATE SET
            weight = weight + 1,
            last_seen = excluded.last_seen,
            last_event_id = excluded.last_event_id",
        params![a, b, seen, event_id],
    )
    .map_err(|e| AppError::Storage(format!("relationships: upsert ({a}, {b}): {e}")))?;
    Ok(())
}
