//! Startup wiring: one `App` holds every singleton the commands need.

use std::sync::Arc;

use tracing::info;

use crate::capabilities::Capabilities;
use crate::config::Config;
use crate::embedding::cache::CacheBackend;
use crate::embedding::{self, EmbeddingService};
use crate::error::AppError;
use crate::llm::providers::{self as llm_providers, ApiKeys};
use crate::rag::ReportEngine;
use crate::relationships::Materializer;
use crate::store::encounters::EncounterStore;
use crate::store::incidents::IncidentStore;
use crate::store::relationships::RelationshipStore;
use crate::store::statutes::StatuteStore;
use crate::store::vector::VectorStore;
use crate::store::Database;

pub struct App {
    pub config: Config,
    pub db: Database,
    pub encounters: EncounterStore,
    pub incidents: IncidentStore,
    pub statutes: StatuteStore,
    pub relationships: RelationshipStore,
    pub materializer: Materializer,
    pub embeddings: Arc<EmbeddingService>,
    pub engine: ReportEngine,
    pub capabilities: Capabilities,
}

impl App {
    /// Open the database and construct providers. Unknown provider or cache
    /// names fail here, before any request is served.
    pub fn build(config: Config) -> Result<Self, AppError> {
        let db = Database::open(&config.db_path(), config.storage.busy_timeout_ms)?;

        let provider = embedding::providers::build(&config.embedding, config.llm_api_key.clone())?;
        let cache = CacheBackend::from_config(&config.cache, &db)
            .map_err(|e| AppError::Config(e.to_string()))?;
        let embeddings = Arc::new(EmbeddingService::new(provider, cache, config.embedding.dimensions));

        let llm = llm_providers::build(
            &config.llm,
            ApiKeys {
                anthropic: config.anthropic_api_key.clone(),
                openai: config.llm_api_key.clone(),
            },
        )?;

        let encounters = EncounterStore::new(db.clone());
        let incidents = IncidentStore::new(db.clone());
        let statutes = StatuteStore::new(db.clone());
        let relationships = RelationshipStore::new(db.clone());
        let materializer = Materializer::new(relationships.clone());

        let vectors = VectorStore::new(incidents.clone(), statutes.clone(), config.embedding.dimensions);
        info!(
            embedding = embeddings.provider_name(),
            cache = embeddings.cache_name(),
            llm = llm.name(),
            dimensions = vectors.dimensions(),
            "providers ready"
        );
        let engine = ReportEngine::new(
            Arc::new(encounters.clone()),
            Arc::clone(&embeddings),
            vectors,
            llm,
            config.retrieval.clone(),
        );

        let capabilities = Capabilities::from_config(&config.capabilities);

        Ok(Self {
            config,
            db,
            encounters,
            incidents,
            statutes,
            relationships,
            materializer,
            embeddings,
            engine,
            capabilities,
        })
    }
}
