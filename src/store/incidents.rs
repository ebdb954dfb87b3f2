//! Incident report collection.
//!
//! A report is created empty, populated once with its extracted text and
//! embedding, and from then on only searched. Soft-deleted reports stay in
//! the table with `active = 0` and never appear in search results.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;

use super::core::{now_iso8601, read_embedding, vector_to_blob, Database};
use super::vector::{run_search, Scored};
use crate::config::SearchParams;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: i64,
    pub tenant_id: i64,
    /// Unique official report number.
    pub number: String,
    pub encounter_id: Option<i64>,
    pub extracted_text: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub processed: bool,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, tenant_id, number, encounter_id, extracted_text, embedding, \
                       processed, active, created_at, updated_at";

fn map_incident(row: &Row<'_>) -> rusqlite::Result<Incident> {
    Ok(Incident {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        number: row.get("number")?,
        encounter_id: row.get("encounter_id")?,
        extracted_text: row.get("extracted_text")?,
        embedding: read_embedding(row.get("embedding")?)?,
        processed: row.get("processed")?,
        active: row.get("active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct IncidentStore {
    db: Database,
}

impl IncidentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a new, unprocessed report.
    pub fn create(
        &self,
        tenant_id: i64,
        number: &str,
        encounter_id: Option<i64>,
    ) -> Result<Incident, AppError> {
        let number = number.trim();
        if number.is_empty() {
            return Err(AppError::InvalidInput("incident number must not be empty".into()));
        }
        let conn = self.db.conn()?;
        let now = now_iso8601();
        conn.execute(
            "INSERT INTO incidents (tenant_id, number, encounter_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![tenant_id, number, encounter_id, now],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => {
                AppError::InvalidInput(format!("incident {number} already exists or references an unknown encounter"))
            }
            _ => AppError::Storage(format!("incidents: insert: {e}")),
        })?;

        let id = conn.last_insert_rowid();
        fetch(&conn, id)?.ok_or_else(|| AppError::Storage(format!("incidents: row {id} vanished after insert")))
    }

    pub fn get(&self, id: i64) -> Result<Option<Incident>, AppError> {
        let conn = self.db.conn()?;
        fetch(&conn, id)
    }

    pub fn get_by_number(&self, number: &str) -> Result<Option<Incident>, AppError> {
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM incidents WHERE number = ?1"),
            params![number],
            map_incident,
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("incidents: get by number: {e}")))
    }

    /// Mark inactive. Returns `false` when no active report had that id.
    pub fn soft_delete(&self, id: i64) -> Result<bool, AppError> {
        let conn = self.db.conn()?;
        let n = conn
            .execute(
                "UPDATE incidents SET active = 0, updated_at = ?2 WHERE id = ?1 AND active = 1",
                params![id, now_iso8601()],
            )
            .map_err(|e| AppError::Storage(format!("incidents: soft delete: {e}")))?;
        Ok(n > 0)
    }

    /// Store extracted text and embedding and flag the report as processed.
    ///
    /// `embedding = None` leaves the report processed but unsearchable.
    pub fn set_processed_text(
        &self,
        id: i64,
        text: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), AppError> {
        let conn = self.db.conn()?;
        let blob = embedding.map(vector_to_blob);
        let n = conn
            .execute(
                "UPDATE incidents
                 SET extracted_text = ?2, embedding = ?3, processed = 1, updated_at = ?4
                 WHERE id = ?1",
                params![id, text, blob, now_iso8601()],
            )
            .map_err(|e| AppError::Storage(format!("incidents: set processed text: {e}")))?;
        if n == 0 {
            return Err(AppError::NotFound(format!("incident {id}")));
        }
        Ok(())
    }

    /// Active reports still waiting for text extraction, oldest first.
    pub fn unprocessed(&self, limit: usize) -> Result<Vec<Incident>, AppError> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM incidents
                 WHERE processed = 0 AND active = 1 ORDER BY id ASC LIMIT ?1"
            ))
            .map_err(|e| AppError::Storage(format!("incidents: prepare unprocessed: {e}")))?;
        let rows = stmt
            .query_map(params![limit as i64], map_incident)
            .map_err(|e| AppError::Storage(format!("incidents: query unprocessed: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| AppError::Storage(format!("incidents: map unprocessed row: {e}")))
    }

    /// Similarity search restricted to active, processed, embedded reports.
    pub fn search(
        &self,
        embedding: &[f32],
        tenant_id: Option<i64>,
        params: SearchParams,
    ) -> Result<Vec<Scored<Incident>>, AppError> {
        let conn = self.db.conn()?;
        let sql = format!(
            "SELECT {COLUMNS}, similarity FROM (
                 SELECT *, 1.0 - cosine_distance(embedding, ?1) AS similarity
                 FROM incidents
                 WHERE active = 1 AND processed = 1 AND embedding IS NOT NULL
                   AND (?2 IS NULL OR tenant_id = ?2)
             )
             WHERE similarity >= ?3
             ORDER BY similarity DESC, id ASC
             LIMIT ?4"
        );
        run_search(
            &conn,
            "incidents",
            &sql,
            params![
                vector_to_blob(embedding),
                tenant_id,
                params.threshold as f64,
                params.top_k as i64
            ],
            map_incident,
        )
    }
}

fn fetch(conn: &Connection, id: i64) -> Result<Option<Incident>, AppError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM incidents WHERE id = ?1"),
        params![id],
        map_incident,
    )
    .optional()
    .map_err(|e| AppError::Storage(format!("incidents: get {id}: {e}")))
}
