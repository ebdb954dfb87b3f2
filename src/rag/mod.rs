//! Retrieval-augmented report engine.
//!
//! Pipeline per request:
//!   1. Load the encounter (tenant-scoped) through [`SubjectSource`]
//!   2. Describe it as plain text
//!   3. Embed the description once, through the cache
//!   4. Search incidents and statutes concurrently
//!   5. Assemble the grounded prompt
//!   6. Generate through the gateway
//!   7. Return text, cited sources and metrics
//!
//! A failing corpus search degrades to "no results" for that corpus; a
//! failing embedding or generation fails the request.

pub mod describe;
pub mod prompt;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task;
use tracing::{info, warn};

use crate::config::{RetrievalConfig, SearchParams};
use crate::embedding::EmbeddingService;
use crate::error::AppError;
use crate::llm::LlmProvider;
use crate::store::encounters::{EncounterStore, Subject};
use crate::store::incidents::Incident;
use crate::store::statutes::Statute;
use crate::store::vector::{Scored, VectorStore};

use prompt::{build_prompt, round4, PromptInput, GROUNDING_CONTRACT};

/// Source of encounters to report on.
pub trait SubjectSource: Send + Sync {
    /// `None` when the encounter is missing, deleted or owned by another tenant.
    fn load_subject(&self, tenant_id: i64, encounter_id: i64) -> Result<Option<Subject>, AppError>;
}

impl SubjectSource for EncounterStore {
    fn load_subject(&self, tenant_id: i64, encounter_id: i64) -> Result<Option<Subject>, AppError> {
        EncounterStore::load_subject(self, tenant_id, encounter_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentSource {
    pub id: i64,
    pub number: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatuteSource {
    pub id: i64,
    pub law_code: String,
    pub article: String,
    pub name: Option<String>,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetrics {
    pub elapsed_ms: u64,
    pub generation_ms: u64,
    pub incident_count: usize,
    pub statute_count: usize,
    /// Corpora whose search failed and were treated as empty.
    pub degraded_corpora: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub report_id: String,
    pub text: String,
    pub incident_sources: Vec<IncidentSource>,
    pub statute_sources: Vec<StatuteSource>,
    pub metrics: ReportMetrics,
}

/// Result of a free-text search over both corpora.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub incidents: Vec<Scored<Incident>>,
    pub statutes: Vec<Scored<Statute>>,
    pub degraded_corpora: Vec<String>,
}

/// Owns the shared singletons of the retrieval path.
pub struct ReportEngine {
    subjects: Arc<dyn SubjectSource>,
    embeddings: Arc<EmbeddingService>,
    vectors: VectorStore,
    llm: LlmProvider,
    policy: RetrievalConfig,
}

impl ReportEngine {
    pub fn new(
        subjects: Arc<dyn SubjectSource>,
        embeddings: Arc<EmbeddingService>,
        vectors: VectorStore,
        llm: LlmProvider,
        policy: RetrievalConfig,
    ) -> Self {
        Self { subjects, embeddings, vectors, llm, policy }
    }

    /// Produce a grounded report for one encounter of `tenant_id`.
    pub async fn generate_report(
        &self,
        tenant_id: i64,
        encounter_id: i64,
        instruction: Option<&str>,
    ) -> Result<Report, AppError> {
        let pipeline = self.run_report(tenant_id, encounter_id, instruction);
        match self.policy.pipeline_timeout_seconds {
            0 => pipeline.await,
            secs => tokio::time::timeout(Duration::from_secs(secs), pipeline)
                .await
                .map_err(|_| {
                    warn!(tenant_id, encounter_id, secs, "report pipeline timed out");
                    AppError::GenerationUnavailable(format!("report pipeline exceeded {secs}s"))
                })?,
        }
    }

    async fn run_report(
        &self,
        tenant_id: i64,
        encounter_id: i64,
        instruction: Option<&str>,
    ) -> Result<Report, AppError> {
        let started = Instant::now();

        let subjects = Arc::clone(&self.subjects);
        let subject = task::spawn_blocking(move || subjects.load_subject(tenant_id, encounter_id))
            .await
            .map_err(|e| AppError::Storage(format!("subject load task failed: {e}")))??
            .ok_or_else(|| AppError::NotFound(format!("encounter {encounter_id}")))?;

        let description = describe::describe(&subject);
        let retrieved = self
            .retrieve(&description, tenant_id, self.policy.incidents, self.policy.statutes)
            .await?;

        let prompt = build_prompt(&PromptInput {
            encounter_id,
            description: &description,
            incidents: &retrieved.incidents,
            statutes: &retrieved.statutes,
            instruction,
            incident_excerpt_chars: self.policy.incident_excerpt_chars,
            statute_excerpt_chars: self.policy.statute_excerpt_chars,
        });

        let gen_started = Instant::now();
        let text = self
            .llm
            .generate(&prompt, GROUNDING_CONTRACT, self.policy.max_output_tokens)
            .await?;
        let generation_ms = gen_started.elapsed().as_millis() as u64;

        let incident_sources: Vec<IncidentSource> = retrieved
            .incidents
            .iter()
            .map(|hit| IncidentSource {
                id: hit.record.id,
                number: hit.record.number.clone(),
                similarity: round4(hit.similarity),
            })
            .collect();
        let statute_sources: Vec<StatuteSource> = retrieved
            .statutes
            .iter()
            .map(|hit| StatuteSource {
                id: hit.record.id,
                law_code: hit.record.law_code.clone(),
                article: hit.record.article.clone(),
                name: hit.record.name.clone(),
                similarity: round4(hit.similarity),
            })
            .collect();

        let metrics = ReportMetrics {
            elapsed_ms: started.elapsed().as_millis() as u64,
            generation_ms,
            incident_count: incident_sources.len(),
            statute_count: statute_sources.len(),
            degraded_corpora: retrieved.degraded_corpora,
        };

        info!(
            tenant_id,
            encounter_id,
            provider = self.llm.name(),
            elapsed_ms = metrics.elapsed_ms,
            incidents = metrics.incident_count,
            statutes = metrics.statute_count,
            "report generated"
        );

        Ok(Report {
            report_id: uuid::Uuid::now_v7().to_string(),
            text,
            incident_sources,
            statute_sources,
            metrics,
        })
    }

    /// Free-text search over both corpora, `top_k` results each.
    pub async fn semantic_search(
        &self,
        query: &str,
        tenant_id: i64,
        top_k: usize,
    ) -> Result<SearchResults, AppError> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput("search query must not be empty".into()));
        }
        if top_k == 0 {
            return Err(AppError::InvalidInput("top_k must be >= 1".into()));
        }
        let incidents = SearchParams { top_k, ..self.policy.incidents };
        let statutes = SearchParams { top_k, ..self.policy.statutes };
        self.retrieve(query, tenant_id, incidents, statutes).await
    }

    /// One cached embedding, then both searches concurrently.
    async fn retrieve(
        &self,
        text: &str,
        tenant_id: i64,
        incident_params: SearchParams,
        statute_params: SearchParams,
    ) -> Result<SearchResults, AppError> {
        let embedding = self.embeddings.embed_cached(text).await?;

        let (incidents, statutes) = tokio::join!(
            self.vectors.search_incidents(embedding.clone(), tenant_id, incident_params),
            self.vectors.search_statutes(embedding, statute_params),
        );

        let mut degraded_corpora = Vec::new();
        let incidents = incidents.unwrap_or_else(|e| {
            warn!(tenant_id, error = %e, "incident search failed; continuing without incidents");
            degraded_corpora.push("incidents".to_string());
            Vec::new()
        });
        let statutes = statutes.unwrap_or_else(|e| {
            warn!(error = %e, "statute search failed; continuing without statutes");
            degraded_corpora.push("statutes".to_string());
            Vec::new()
        });

        Ok(SearchResults { incidents, statutes, degraded_corpora })
    }

    pub fn policy(&self) -> &RetrievalConfig {
        &self.policy
    }
}
