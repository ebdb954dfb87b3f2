//! Minimal encounter registry: persons, vehicles and the field encounters
//! that bring them together. Every row is tenant-scoped.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;

use super::core::{now_iso8601, to_iso8601, Database};
use super::relationships::{pairs_of, upsert_pairs_tx};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Person {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub id: i64,
    pub tenant_id: i64,
    pub plate: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encounter {
    pub id: i64,
    pub tenant_id: i64,
    pub notes: Option<String>,
    pub occurred_at: String,
}

/// An encounter together with everyone and everything linked to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subject {
    pub encounter: Encounter,
    pub persons: Vec<Person>,
    pub vehicles: Vec<Vehicle>,
}

/// Input for [`EncounterStore::record_encounter`].
#[derive(Debug, Clone)]
pub struct NewEncounter {
    pub tenant_id: i64,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub person_ids: Vec<i64>,
    pub vehicle_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct EncounterStore {
    db: Database,
}

impl EncounterStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn add_person(&self, tenant_id: i64, name: &str) -> Result<Person, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("person name must not be empty".into()));
        }
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO persons (tenant_id, name, created_at) VALUES (?1, ?2, ?3)",
            params![tenant_id, name, now_iso8601()],
        )
        .map_err(|e| AppError::Storage(format!("persons: insert: {e}")))?;
        Ok(Person { id: conn.last_insert_rowid(), tenant_id, name: name.to_string() })
    }

    pub fn add_vehicle(&self, tenant_id: i64, plate: &str, model: Option<&str>) -> Result<Vehicle, AppError> {
        let plate = plate.trim().to_uppercase();
        if plate.is_empty() {
            return Err(AppError::InvalidInput("vehicle plate must not be empty".into()));
        }
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO vehicles (tenant_id, plate, model, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![tenant_id, plate, model, now_iso8601()],
        )
        .map_err(|e| AppError::Storage(format!("vehicles: insert: {e}")))?;
        Ok(Vehicle {
            id: conn.last_insert_rowid(),
            tenant_id,
            plate,
            model: model.map(str::to_string),
        })
    }

    /// Insert the encounter, its person/vehicle links and one relationship
    /// edge upsert per distinct person pair, all in one transaction.
    ///
    /// Every linked person and vehicle must belong to the same tenant.
    pub fn record_encounter(&self, new: &NewEncounter) -> Result<Encounter, AppError> {
        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::Storage(format!("encounters: begin tx: {e}")))?;

        for &pid in &new.person_ids {
            ensure_owned(&tx, "persons", pid, new.tenant_id)?;
        }
        for &vid in &new.vehicle_ids {
            ensure_owned(&tx, "vehicles", vid, new.tenant_id)?;
        }

        let occurred_at = to_iso8601(new.occurred_at);
        tx.execute(
            "INSERT INTO encounters (tenant_id, notes, occurred_at, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![new.tenant_id, new.notes, occurred_at, now_iso8601()],
        )
        .map_err(|e| AppError::Storage(format!("encounters: insert: {e}")))?;
        let id = tx.last_insert_rowid();

        for &pid in &new.person_ids {
            tx.execute(
                "INSERT OR IGNORE INTO encounter_persons (encounter_id, person_id) VALUES (?1, ?2)",
                params![id, pid],
            )
            .map_err(|e| AppError::Storage(format!("encounters: link person {pid}: {e}")))?;
        }
        for &vid in &new.vehicle_ids {
            tx.execute(
                "INSERT OR IGNORE INTO encounter_vehicles (encounter_id, vehicle_id) VALUES (?1, ?2)",
                params![id, vid],
            )
            .map_err(|e| AppError::Storage(format!("encounters: link vehicle {vid}: {e}")))?;
        }

        upsert_pairs_tx(&tx, &pairs_of(&new.person_ids), id, &occurred_at)?;

        tx.commit()
            .map_err(|e| AppError::Storage(format!("encounters: commit: {e}")))?;

        Ok(Encounter { id, tenant_id: new.tenant_id, notes: new.notes.clone(), occurred_at })
    }

    /// Load an active encounter of `tenant_id` with its linked records.
    ///
    /// `None` when it does not exist, was deleted, or belongs to another tenant.
    pub fn load_subject(&self, tenant_id: i64, encounter_id: i64) -> Result<Option<Subject>, AppError> {
        let conn = self.db.conn()?;
        let encounter = conn
            .query_row(
                "SELECT id, tenant_id, notes, occurred_at FROM encounters
                 WHERE id = ?1 AND tenant_id = ?2 AND active = 1",
                params![encounter_id, tenant_id],
                map_encounter,
            )
            .optional()
            .map_err(|e| AppError::Storage(format!("encounters: get {encounter_id}: {e}")))?;

        let Some(encounter) = encounter else {
            return Ok(None);
        };

        let persons = query_all(
            &conn,
            "SELECT p.id, p.tenant_id, p.name FROM persons p
             JOIN encounter_persons ep ON ep.person_id = p.id
             WHERE ep.encounter_id = ?1 AND p.active = 1 ORDER BY p.id",
            encounter_id,
            |r| Ok(Person { id: r.get(0)?, tenant_id: r.get(1)?, name: r.get(2)? }),
        )?;
        let vehicles = query_all(
            &conn,
            "SELECT v.id, v.tenant_id, v.plate, v.model FROM vehicles v
             JOIN encounter_vehicles ev ON ev.vehicle_id = v.id
             WHERE ev.encounter_id = ?1 AND v.active = 1 ORDER BY v.id",
            encounter_id,
            |r| Ok(Vehicle { id: r.get(0)?, tenant_id: r.get(1)?, plate: r.get(2)?, model: r.get(3)? }),
        )?;

        Ok(Some(Subject { encounter, persons, vehicles }))
    }

    /// `(encounters, persons, vehicles)` active counts for the status line.
    pub fn counts(&self) -> Result<(i64, i64, i64), AppError> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT (SELECT COUNT(*) FROM encounters WHERE active = 1),
                    (SELECT COUNT(*) FROM persons WHERE active = 1),
                    (SELECT COUNT(*) FROM vehicles WHERE active = 1)",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|e| AppError::Storage(format!("encounters: counts: {e}")))
    }
}

fn map_encounter(row: &Row<'_>) -> rusqlite::Result<Encounter> {
    Ok(Encounter {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        notes: row.get(2)?,
        occurred_at: row.get(3)?,
    })
}

fn ensure_owned(conn: &Connection, table: &str, id: i64, tenant_id: i64) -> Result<(), AppError> {
    let owner: Option<i64> = conn
        .query_row(
            &format!("SELECT tenant_id FROM {table} WHERE id = ?1 AND active = 1"),
            params![id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("{table}: lookup {id}: {e}")))?;
    match owner {
        Some(t) if t == tenant_id => Ok(()),
        _ => Err(AppError::NotFound(format!("{table} {id} in tenant {tenant_id}"))),
    }
}

fn query_all<T>(
    conn: &Connection,
    sql: &str,
    encounter_id: i64,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, AppError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| AppError::Storage(format!("encounters: prepare links: {e}")))?;
    let rows = stmt
        .query_map(params![encounter_id], map)
        .map_err(|e| AppError::Storage(format!("encounters: query links: {e}")))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| AppError::Storage(format!("encounters: map link row: {e}")))
}
