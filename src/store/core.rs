//! `core`: connection factory, schema and shared helpers for the Argus database.
//!
//! ## What lives here
//! - **Schema**: `SCHEMA_VERSION`, `init_schema` (all tables in one database).
//! - **Connection factory**: `open_conn` (busy timeout + WAL + foreign keys)
//!   which also registers the `cosine_distance` SQL function.
//! - **Vector codec**: little-endian `f32` BLOBs and cosine similarity.
//! - **Utilities**: `sha256_hex`, `now_iso8601`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::error::AppError;

// ── Schema ────────────────────────────────────────────────────────────────────

/// Schema version stored in `PRAGMA user_version`.
/// Increment when the DDL changes; add a migration path in `init_schema`.
pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Create every table on a fresh database, or verify the version on re-open.
pub(crate) fn init_schema(conn: &Connection) -> Result<(), AppError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|e| AppError::Storage(format!("read schema version: {e}")))?;

    if version == SCHEMA_VERSION {
        return Ok(());
    }
    if version != 0 {
        return Err(AppError::Storage(format!(
            "unsupported schema version {version}, expected {SCHEMA_VERSION}"
        )));
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS persons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vehicles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            plate TEXT NOT NULL,
            model TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS encounters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            notes TEXT,
            occurred_at TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS encounter_persons (
            encounter_id INTEGER NOT NULL REFERENCES encounters(id),
            person_id INTEGER NOT NULL REFERENCES persons(id),
            PRIMARY KEY (encounter_id, person_id)
        );

        CREATE TABLE IF NOT EXISTS encounter_vehicles (
            encounter_id INTEGER NOT NULL REFERENCES encounters(id),
            vehicle_id INTEGER NOT NULL REFERENCES vehicles(id),
            PRIMARY KEY (encounter_id, vehicle_id)
        );

        CREATE TABLE IF NOT EXISTS incidents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            number TEXT NOT NULL UNIQUE,
            encounter_id INTEGER REFERENCES encounters(id),
            extracted_text TEXT,
            embedding BLOB,
            processed INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_incidents_tenant ON incidents(tenant_id, active, processed);

        CREATE TABLE IF NOT EXISTS statutes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            law_code TEXT NOT NULL,
            article TEXT NOT NULL,
            name TEXT,
            text TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            embedding BLOB,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (law_code, article)
        );

        CREATE TABLE IF NOT EXISTS relationships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person_a INTEGER NOT NULL,
            person_b INTEGER NOT NULL,
            weight INTEGER NOT NULL DEFAULT 1 CHECK (weight >= 1),
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            first_event_id INTEGER NOT NULL,
            last_event_id INTEGER NOT NULL,
            UNIQUE (person_a, person_b),
            CHECK (person_a < person_b)
        );
        CREATE INDEX IF NOT EXISTS idx_relationships_b ON relationships(person_b);

        CREATE TABLE IF NOT EXISTS embedding_cache (
            key TEXT PRIMARY KEY,
            vector BLOB NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_embedding_cache_expiry ON embedding_cache(expires_at);

        PRAGMA user_version = 1;
        ",
    )
    .map_err(|e| AppError::Storage(format!("initialize schema: {e}")))
}

// ── Connection helper ─────────────────────────────────────────────────────────

/// Open a SQLite connection to `db_path`, apply pragmas and register SQL functions.
///
/// `busy_timeout` is set first so the WAL switch itself waits on a locked file.
pub(crate) fn open_conn(db_path: &Path, busy_timeout_ms: u64) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Storage(format!("open {}: {e}", db_path.display())))?;

    conn.pragma_update(None, "busy_timeout", busy_timeout_ms as i64)
        .map_err(|e| AppError::Storage(format!("set busy_timeout: {e}")))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Storage(format!("set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Storage(format!("set foreign_keys ON: {e}")))?;

    register_cosine_distance(&conn)?;
    Ok(conn)
}

/// `cosine_distance(a BLOB, b BLOB) -> REAL`, `1 - cos(a, b)`.
///
/// NULL when either side is NULL or has zero norm; an error when the
/// dimensions differ.
fn register_cosine_distance(conn: &Connection) -> Result<(), AppError> {
    conn.create_scalar_function(
        "cosine_distance",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a = match ctx.get_raw(0) {
                ValueRef::Blob(b) => blob_to_vector(b),
                ValueRef::Null => return Ok(None),
                _ => return Err(user_error("cosine_distance: argument 1 is not a BLOB")),
            };
            let b = match ctx.get_raw(1) {
                ValueRef::Blob(b) => blob_to_vector(b),
                ValueRef::Null => return Ok(None),
                _ => return Err(user_error("cosine_distance: argument 2 is not a BLOB")),
            };
            let (a, b) = (a.map_err(user_error)?, b.map_err(user_error)?);
            if a.len() != b.len() {
                return Err(user_error(format!(
                    "cosine_distance: dimension mismatch {} vs {}",
                    a.len(),
                    b.len()
                )));
            }
            Ok(cosine_similarity(&a, &b).map(|s| 1.0 - s))
        },
    )
    .map_err(|e| AppError::Storage(format!("register cosine_distance: {e}")))
}

fn user_error(msg: impl Into<String>) -> rusqlite::Error {
    let msg: String = msg.into();
    rusqlite::Error::UserFunctionError(msg.into())
}

/// Handle to the single Argus database file.
///
/// Cheap to clone; every operation opens its own connection, so clones can be
/// moved into `spawn_blocking` closures freely.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout_ms: u64,
}

impl Database {
    /// Create the parent directory if needed and make sure the schema exists.
    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::Storage(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }
        let db = Self { path: path.to_path_buf(), busy_timeout_ms };
        let conn = db.conn()?;
        init_schema(&conn)?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<Connection, AppError> {
        open_conn(&self.path, self.busy_timeout_ms)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ── Vector codec ──────────────────────────────────────────────────────────────

/// Encode a vector as little-endian `f32` bytes.
pub(crate) fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian `f32` BLOB.
pub(crate) fn blob_to_vector(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.len() % 4 != 0 {
        return Err(format!("vector blob length {} is not a multiple of 4", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Cosine similarity, accumulated in `f64`. `None` when either norm is zero.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Read an optional embedding column.
pub(crate) fn read_embedding(blob: Option<Vec<u8>>) -> rusqlite::Result<Option<Vec<f32>>> {
    blob.map(|b| {
        blob_to_vector(&b).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Blob, e.into())
        })
    })
    .transpose()
}

// ── Utility functions ─────────────────────────────────────────────────────────

/// Return the lowercase hex-encoded SHA-256 digest of `content`.
pub(crate) fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Current UTC time as RFC 3339 with second precision, e.g. `"2025-04-01T12:00:00Z"`.
pub(crate) fn now_iso8601() -> String {
    to_iso8601(Utc::now())
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn to_iso8601(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
