//! Statute collection: global legal articles, unique per `(law_code, article)`.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::core::{now_iso8601, read_embedding, vector_to_blob, Database};
use super::vector::{run_search, Scored};
use crate::config::SearchParams;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statute {
    pub id: i64,
    /// Law identifier, e.g. `"CP"` or `"Lei 11.343/2006"`.
    pub law_code: String,
    pub article: String,
    pub name: Option<String>,
    pub text: String,
    pub active: bool,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Statute {
    /// Text fed to the embedding model for this article.
    pub fn embedding_text(&self) -> String {
        format!("{} Art. {}: {}", self.law_code, self.article, self.text)
    }
}

/// Statute as it appears in a seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct NewStatute {
    pub law_code: String,
    pub article: String,
    #[serde(default)]
    pub name: Option<String>,
    pub text: String,
}

const COLUMNS: &str = "id, law_code, article, name, text, active, embedding";

fn map_statute(row: &Row<'_>) -> rusqlite::Result<Statute> {
    Ok(Statute {
        id: row.get("id")?,
        law_code: row.get("law_code")?,
        article: row.get("article")?,
        name: row.get("name")?,
        text: row.get("text")?,
        active: row.get("active")?,
        embedding: read_embedding(row.get("embedding")?)?,
    })
}

#[derive(Debug, Clone)]
pub struct StatuteStore {
    db: Database,
}

impl StatuteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or refresh an article and reactivate it.
    ///
    /// A changed text clears the stored embedding so the next embedding pass
    /// recomputes it; an unchanged text keeps it.
    pub fn upsert(&self, statute: &NewStatute) -> Result<Statute, AppError> {
        let law_code = statute.law_code.trim();
        let article = statute.article.trim();
        if law_code.is_empty() || article.is_empty() {
            return Err(AppError::InvalidInput("statute law code and article are required".into()));
        }
        let conn = self.db.conn()?;
        let now = now_iso8601();
        conn.execute(
            "INSERT INTO statutes (law_code, article, name, text, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(law_code, article) DO UPDATE SET
                name = excluded.name,
                embedding = CASE WHEN statutes.text = excluded.text THEN statutes.embedding ELSE NULL END,
                text = excluded.text,
                active = 1,
                updated_at = excluded.updated_at",
            params![law_code, article, statute.name, statute.text, now],
        )
        .map_err(|e| AppError::Storage(format!("statutes: upsert: {e}")))?;

        conn.query_row(
            &format!("SELECT {COLUMNS} FROM statutes WHERE law_code = ?1 AND article = ?2"),
            params![law_code, article],
            map_statute,
        )
        .map_err(|e| AppError::Storage(format!("statutes: reload after upsert: {e}")))
    }

    /// Deactivate an article. Returns `false` when it was unknown or already retired.
    pub fn retire(&self, law_code: &str, article: &str) -> Result<bool, AppError> {
        let conn = self.db.conn()?;
        let n = conn
            .execute(
                "UPDATE statutes SET active = 0, updated_at = ?3
                 WHERE law_code = ?1 AND article = ?2 AND active = 1",
                params![law_code, article, now_iso8601()],
            )
            .map_err(|e| AppError::Storage(format!("statutes: retire: {e}")))?;
        Ok(n > 0)
    }

    pub fn get_by_code_article(&self, law_code: &str, article: &str) -> Result<Option<Statute>, AppError> {
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM statutes WHERE law_code = ?1 AND article = ?2"),
            params![law_code, article],
            map_statute,
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("statutes: get: {e}")))
    }

    /// Active statutes with no embedding yet, in id order.
    pub fn pending_embeddings(&self, limit: usize) -> Result<Vec<Statute>, AppError> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM statutes
                 WHERE embedding IS NULL AND active = 1 ORDER BY id ASC LIMIT ?1"
            ))
            .map_err(|e| AppError::Storage(format!("statutes: prepare pending: {e}")))?;
        let rows = stmt
            .query_map(params![limit as i64], map_statute)
            .map_err(|e| AppError::Storage(format!("statutes: query pending: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| AppError::Storage(format!("statutes: map pending row: {e}")))
    }

    pub fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<(), AppError> {
        let conn = self.db.conn()?;
        let n = conn
            .execute(
                "UPDATE statutes SET embedding = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, vector_to_blob(embedding), now_iso8601()],
            )
            .map_err(|e| AppError::Storage(format!("statutes: set embedding: {e}")))?;
        if n == 0 {
            return Err(AppError::NotFound(format!("statute {id}")));
        }
        Ok(())
    }

    /// `(total, active, embedded)` counts for the status line.
    pub fn counts(&self) -> Result<(i64, i64, i64), AppError> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(active), 0),
                    COALESCE(SUM(CASE WHEN embedding IS NOT NULL AND active = 1 THEN 1 ELSE 0 END), 0)
             FROM statutes",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|e| AppError::Storage(format!("statutes: counts: {e}")))
    }

    /// Similarity search over active, embedded statutes.
    pub fn search(&self, embedding: &[f32], params: SearchParams) -> Result<Vec<Scored<Statute>>, AppError> {
        let conn = self.db.conn()?;
        let sql = format!(
            "SELECT {COLUMNS}, similarity FROM (
                 SELECT *, 1.0 - cosine_distance(embedding, ?1) AS similarity
                 FROM statutes
                 WHERE active = 1 AND embedding IS NOT NULL
             )
             WHERE similarity >= ?2
             ORDER BY similarity DESC, id ASC
             LIMIT ?3"
        );
        run_search(
            &conn,
            "statutes",
            &sql,
            params![vector_to_blob(embedding), params.threshold as f64, params.top_k as i64],
            map_statute,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_store() -> (TempDir, StatuteStore) {
        let temp = TempDir::new().expect("tempdir");
        let db = Database::open(&temp.path().join("argus.db"), 5000).expect("open db");
        (temp, StatuteStore::new(db))
    }

    fn art(code: &str, article: &str, text: &str) -> NewStatute {
        NewStatute { law_code: code.into(), article: article.into(), name: None, text: text.into() }
    }

    #[test]
    fn upsert_keeps_one_row_per_code_and_article() {
        let (_temp, store) = make_store();
        let a = store.upsert(&art("CP", "155", "Subtrair coisa alheia móvel")).unwrap();
        let b = store.upsert(&art("CP", "155", "Subtrair coisa alheia móvel")).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.counts().unwrap().0, 1);
    }

    #[test]
    fn text_change_clears_embedding() {
        let (_temp, store) = make_store();
        let s = store.upsert(&art("CP", "157", "old")).unwrap();
        store.set_embedding(s.id, &[1.0, 0.0]).unwrap();

        let same = store.upsert(&art("CP", "157", "old")).unwrap();
        assert!(same.embedding.is_some());

        let changed = store.upsert(&art("CP", "157", "new")).unwrap();
        assert!(changed.embedding.is_none());
        assert_eq!(store.pending_embeddings(10).unwrap().len(), 1);
    }

    #[test]
    fn retired_statute_is_not_pending_and_upsert_revives() {
        let (_temp, store) = make_store();
        store.upsert(&art("CP", "121", "Matar alguém")).unwrap();
        assert!(store.retire("CP", "121").unwrap());
        assert!(!store.retire("CP", "121").unwrap());
        assert!(store.pending_embeddings(10).unwrap().is_empty());

        let revived = store.upsert(&art("CP", "121", "Matar alguém")).unwrap();
        assert!(revived.active);
    }

    #[test]
    fn embedding_text_joins_code_article_and_text() {
        let (_temp, store) = make_store();
        let s = store.upsert(&art("CP", "155", "Subtrair")).unwrap();
        assert_eq!(s.embedding_text(), "CP Art. 155: Subtrair");
    }
}
