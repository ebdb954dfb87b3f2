//! Write paths that feed the corpora and the relationship graph.

use std::fs;
use std::path::Path;

use tokio::task;
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingService;
use crate::error::AppError;
use crate::relationships::pairs_of;
use crate::store::encounters::{Encounter, EncounterStore, NewEncounter};
use crate::store::incidents::IncidentStore;
use crate::store::statutes::{NewStatute, StatuteStore};

/// Only the head of a long report is embedded.
pub const MAX_EMBED_CHARS: usize = 5000;

/// Outcome of [`process_incident`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Text stored and embedded; the report is now searchable.
    Embedded,
    /// Text was blank: marked processed but never searchable.
    EmptyText,
    /// Already processed and `reprocess` was not requested.
    Skipped,
}

/// Record an encounter and link every pair of persons it names.
///
/// The encounter, its links and its relationship edges commit together.
pub async fn record_encounter(encounters: &EncounterStore, new: NewEncounter) -> Result<Encounter, AppError> {
    let store = encounters.clone();
    let pairs = pairs_of(&new.person_ids).len();
    let encounter = task::spawn_blocking(move || store.record_encounter(&new))
        .await
        .map_err(|e| AppError::Storage(format!("encounter task failed: {e}")))??;

    info!(encounter_id = encounter.id, pairs, "encounter recorded");
    Ok(encounter)
}

/// Store extracted text for an incident report and embed it.
pub async fn process_incident(
    incidents: &IncidentStore,
    embeddings: &EmbeddingService,
    incident_id: i64,
    text: &str,
    reprocess: bool,
) -> Result<ProcessOutcome, AppError> {
    let store = incidents.clone();
    let incident = task::spawn_blocking(move || store.get(incident_id))
        .await
        .map_err(|e| AppError::Storage(format!("incident task failed: {e}")))??
        .ok_or_else(|| AppError::NotFound(format!("incident {incident_id}")))?;

    if incident.processed && !reprocess {
        debug!(incident_id, "incident already processed; skipping");
        return Ok(ProcessOutcome::Skipped);
    }

    let text = text.trim().to_string();
    let (embedding, outcome) = if text.is_empty() {
        warn!(incident_id, "incident has no extractable text; it will not be searchable");
        (None, ProcessOutcome::EmptyText)
    } else {
        let head: String = text.chars().take(MAX_EMBED_CHARS).collect();
        (Some(embeddings.embed(&head).await?), ProcessOutcome::Embedded)
    };

    let store = incidents.clone();
    task::spawn_blocking(move || store.set_processed_text(incident_id, &text, embedding.as_deref()))
        .await
        .map_err(|e| AppError::Storage(format!("incident task failed: {e}")))??;

    info!(incident_id, number = %incident.number, ?outcome, "incident processed");
    Ok(outcome)
}

/// Embed every active statute still missing a vector, `batch_size` at a time.
/// Returns how many were embedded.
pub async fn embed_pending_statutes(
    statutes: &StatuteStore,
    embeddings: &EmbeddingService,
    batch_size: usize,
) -> Result<usize, AppError> {
    let batch_size = batch_size.max(1);
    let mut total = 0;
    loop {
        let store = statutes.clone();
        let pending = task::spawn_blocking(move || store.pending_embeddings(batch_size))
            .await
            .map_err(|e| AppError::Storage(format!("statute task failed: {e}")))??;
        if pending.is_empty() {
            break;
        }

        let texts: Vec<String> = pending.iter().map(|s| s.embedding_text()).collect();
        let vectors = embeddings.embed_batch(&texts).await?;

        let store = statutes.clone();
        let ids: Vec<i64> = pending.iter().map(|s| s.id).collect();
        task::spawn_blocking(move || {
            ids.iter()
                .zip(vectors.iter())
                .try_for_each(|(id, v)| store.set_embedding(*id, v))
        })
        .await
        .map_err(|e| AppError::Storage(format!("statute task failed: {e}")))??;

        total += pending.len();
        debug!(batch = pending.len(), total, "statute batch embedded");
        if pending.len() < batch_size {
            break;
        }
    }
    if total > 0 {
        info!(total, "statutes embedded");
    }
    Ok(total)
}

/// Parse a JSON array of `{law_code, article, name?, text}` objects.
pub fn load_seed_file(path: &Path) -> Result<Vec<NewStatute>, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read seed file {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| AppError::Config(format!("invalid seed file {}: {e}", path.display())))
}

/// Upsert every seed statute. Returns how many were written.
pub async fn seed_statutes(statutes: &StatuteStore, seed: Vec<NewStatute>) -> Result<usize, AppError> {
    let store = statutes.clone();
    task::spawn_blocking(move || -> Result<usize, AppError> {
        seed.iter().try_for_each(|s| store.upsert(s).map(|_| ()))?;
        Ok(seed.len())
    })
    .await
    .map_err(|e| AppError::Storage(format!("seed task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cache::CacheBackend;
    use crate::embedding::providers::hashing::HashingEmbedder;
    use crate::embedding::EmbeddingProvider;
    use crate::store::Database;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn setup() -> (TempDir, Database, EmbeddingService) {
        let temp = TempDir::new().expect("tempdir");
        let db = Database::open(&temp.path().join("argus.db"), 5000).expect("open db");
        let svc = EmbeddingService::new(
            EmbeddingProvider::Hashing(HashingEmbedder::new(32, 2)),
            CacheBackend::Disabled,
            32,
        );
        (temp, db, svc)
    }

    #[tokio::test]
    async fn blank_text_is_processed_but_unsearchable() {
        let (_temp, db, svc) = setup();
        let incidents = IncidentStore::new(db);
        let inc = incidents.create(1, "BO-1", None).unwrap();

        let outcome = process_incident(&incidents, &svc, inc.id, "   ", false).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::EmptyText);
        let inc = incidents.get(inc.id).unwrap().unwrap();
        assert!(inc.processed);
        assert!(inc.embedding.is_none());
    }

    #[tokio::test]
    async fn processed_incident_is_skipped_unless_reprocessed() {
        let (_temp, db, svc) = setup();
        let incidents = IncidentStore::new(db);
        let inc = incidents.create(1, "BO-1", None).unwrap();

        assert_eq!(
            process_incident(&incidents, &svc, inc.id, "furto de bicicleta", false).await.unwrap(),
            ProcessOutcome::Embedded
        );
        assert_eq!(
            process_incident(&incidents, &svc, inc.id, "outro texto", false).await.unwrap(),
            ProcessOutcome::Skipped
        );
        assert_eq!(
            incidents.get(inc.id).unwrap().unwrap().extracted_text.as_deref(),
            Some("furto de bicicleta")
        );
        assert_eq!(
            process_incident(&incidents, &svc, inc.id, "outro texto", true).await.unwrap(),
            ProcessOutcome::Embedded
        );
    }

    #[tokio::test]
    async fn missing_incident_is_not_found() {
        let (_temp, db, svc) = setup();
        let incidents = IncidentStore::new(db);
        let err = process_incident(&incidents, &svc, 404, "x", false).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn pending_statutes_are_embedded_in_batches() {
        let (_temp, db, svc) = setup();
        let statutes = StatuteStore::new(db);
        let seed: Vec<NewStatute> = (1..=5)
            .map(|i| NewStatute {
                law_code: "CP".into(),
                article: i.to_string(),
                name: None,
                text: format!("texto do artigo {i}"),
            })
            .collect();
        assert_eq!(seed_statutes(&statutes, seed).await.unwrap(), 5);

        assert_eq!(embed_pending_statutes(&statutes, &svc, 2).await.unwrap(), 5);
        assert!(statutes.pending_embeddings(10).unwrap().is_empty());
        assert_eq!(embed_pending_statutes(&statutes, &svc, 2).await.unwrap(), 0);
    }

    #[test]
    fn seed_file_parses_optional_name() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(
            br#"[{"law_code":"CP","article":"155","name":"Furto","text":"Subtrair"},
                 {"law_code":"CP","article":"157","text":"Subtrair mediante violencia"}]"#,
        )
        .unwrap();
        let seed = load_seed_file(f.path()).unwrap();
        assert_eq!(seed.len(), 2);
        assert_eq!(seed[0].name.as_deref(), Some("Furto"));
        assert!(seed[1].name.is_none());
    }
}
