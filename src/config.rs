//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `ARGUS_DATA_DIR`, `ARGUS_LOG_LEVEL` and `ARGUS_LLM_PROVIDER`
//! overrides. Credentials come from the environment only, never from TOML.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// Dimensionality of the text embedding space shared by both corpora.
pub const EMBEDDING_DIM: usize = 384;

/// SQLite settings for the single core database.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// File name inside `data_dir`.
    pub db_filename: String,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

/// Remote embedding endpoint (`[embedding.remote]`).
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingConfig {
    /// Full `/v1/embeddings` endpoint URL.
    pub api_base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

/// Local ONNX sentence encoder (`[embedding.onnx]`).
///
/// Relative paths resolve against `data_dir`.
#[derive(Debug, Clone)]
pub struct OnnxEmbeddingConfig {
    pub model_path: PathBuf,
    /// HuggingFace `tokenizer.json` shipped with the model.
    pub tokenizer_path: PathBuf,
    /// Longer inputs are truncated to this many tokens.
    pub max_tokens: usize,
    pub token_type_ids: bool,
}

/// Embedding provider configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// `"onnx"` (default), `"remote"`, or `"hashing"` for offline use
    /// without model files.
    pub provider: String,
    pub dimensions: usize,
    /// Upper bound on concurrent CPU-bound encode jobs.
    pub max_concurrency: usize,
    pub onnx: OnnxEmbeddingConfig,
    pub remote: RemoteEmbeddingConfig,
}

/// Embedding cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// `"memory"`, `"sqlite"` or `"disabled"`.
    pub backend: String,
    pub ttl_seconds: u64,
    /// Capacity of the in-memory tier.
    pub max_entries: u64,
}

/// Per-corpus similarity search policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Minimum cosine similarity admitted, in `[0, 1]`.
    pub threshold: f32,
    pub top_k: usize,
}

/// Retrieval and report assembly policy.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub incidents: SearchParams,
    pub statutes: SearchParams,
    /// Max characters of incident text quoted in the prompt.
    pub incident_excerpt_chars: usize,
    /// Max characters of statute text quoted in the prompt.
    pub statute_excerpt_chars: usize,
    pub max_output_tokens: u32,
    /// Whole-pipeline deadline; `0` disables it.
    pub pipeline_timeout_seconds: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            incidents: SearchParams { threshold: 0.3, top_k: 5 },
            statutes: SearchParams { threshold: 0.3, top_k: 3 },
            incident_excerpt_chars: 500,
            statute_excerpt_chars: 300,
            max_output_tokens: 2000,
            pipeline_timeout_seconds: 0,
        }
    }
}

/// Anthropic Messages API (`[llm.anthropic]`).
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_url: String,
    pub model: String,
    pub api_version: String,
    pub timeout_seconds: u64,
}

/// Local Ollama server (`[llm.ollama]`).
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Server root, e.g. `http://localhost:11434`.
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

/// OpenAI / OpenAI-compatible provider (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

/// Generation gateway configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Active provider. Maps to `default` in `[llm]`.
    pub provider: String,
    pub anthropic: AnthropicConfig,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
}

/// Optional heavy ML capabilities present in this deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilitiesConfig {
    pub face: bool,
    pub ocr: bool,
}

/// Statute corpus seeding.
#[derive(Debug, Clone)]
pub struct StatutesConfig {
    /// JSON file with `[{law_code, article, name, text}]`.
    pub seed_file: Option<PathBuf>,
    pub embed_batch_size: usize,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    /// Directory for the database (already expanded, no `~`).
    pub data_dir: PathBuf,
    pub log_level: String,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub capabilities: CapabilitiesConfig,
    pub statutes: StatutesConfig,
    /// `LLM_API_KEY`: bearer key for OpenAI-compatible and remote embedding endpoints.
    pub llm_api_key: Option<String>,
    /// `ANTHROPIC_API_KEY`.
    pub anthropic_api_key: Option<String>,
}

impl Config {
    /// Absolute path of the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.db_filename)
    }
}

/// Env-sourced overrides. Tests pass these directly instead of mutating env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            data_dir: env::var("ARGUS_DATA_DIR").ok(),
            log_level: env::var("ARGUS_LOG_LEVEL").ok(),
            llm_provider: env::var("ARGUS_LLM_PROVIDER").ok(),
        }
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    app: RawApp,
    #[serde(default)]
    storage: RawStorage,
    #[serde(default)]
    embedding: RawEmbedding,
    #[serde(default)]
    cache: RawCache,
    #[serde(default)]
    retrieval: RawRetrieval,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    capabilities: RawCapabilities,
    #[serde(default)]
    statutes: RawStatutes,
}

#[derive(Deserialize)]
struct RawApp {
    name: String,
    data_dir: String,
    log_level: String,
}

#[derive(Deserialize)]
struct RawStorage {
    #[serde(default = "default_db_filename")]
    db_filename: String,
    #[serde(default = "default_busy_timeout_ms")]
    busy_timeout_ms: u64,
}

impl Default for RawStorage {
    fn default() -> Self {
        Self { db_filename: default_db_filename(), busy_timeout_ms: default_busy_timeout_ms() }
    }
}

#[derive(Deserialize)]
struct RawEmbedding {
    #[serde(default = "default_embedding_provider")]
    provider: String,
    #[serde(default = "default_dimensions")]
    dimensions: usize,
    #[serde(default = "default_max_concurrency")]
    max_concurrency: usize,
    #[serde(default)]
    onnx: RawOnnxEmbedding,
    #[serde(default)]
    remote: RawRemoteEmbedding,
}

impl Default for RawEmbedding {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dimensions: default_dimensions(),
            max_concurrency: default_max_concurrency(),
            onnx: RawOnnxEmbedding::default(),
            remote: RawRemoteEmbedding::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawOnnxEmbedding {
    #[serde(default = "default_onnx_model_path")]
    model_path: String,
    #[serde(default = "default_onnx_tokenizer_path")]
    tokenizer_path: String,
    #[serde(default = "default_onnx_max_tokens")]
    max_tokens: usize,
    #[serde(default = "default_true")]
    token_type_ids: bool,
}

impl Default for RawOnnxEmbedding {
    fn default() -> Self {
        Self {
            model_path: default_onnx_model_path(),
            tokenizer_path: default_onnx_tokenizer_path(),
            max_tokens: default_onnx_max_tokens(),
            token_type_ids: true,
        }
    }
}

#[derive(Deserialize)]
struct RawRemoteEmbedding {
    #[serde(default = "default_remote_embedding_url")]
    api_base_url: String,
    #[serde(default = "default_remote_embedding_model")]
    model: String,
    #[serde(default = "default_remote_embedding_timeout")]
    timeout_seconds: u64,
}

impl Default for RawRemoteEmbedding {
    fn default() -> Self {
        Self {
            api_base_url: default_remote_embedding_url(),
            model: default_remote_embedding_model(),
            timeout_seconds: default_remote_embedding_timeout(),
        }
    }
}

#[derive(Deserialize)]
struct RawCache {
    #[serde(default = "default_cache_backend")]
    backend: String,
    #[serde(default = "default_cache_ttl")]
    ttl_seconds: u64,
    #[serde(default = "default_cache_entries")]
    max_entries: u64,
}

impl Default for RawCache {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

#[derive(Deserialize, Default)]
struct RawRetrieval {
    #[serde(default)]
    incidents: RawSearchParams,
    #[serde(default)]
    statutes: Option<RawSearchParams>,
    incident_excerpt_chars: Option<usize>,
    statute_excerpt_chars: Option<usize>,
    max_output_tokens: Option<u32>,
    pipeline_timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Default)]
struct RawSearchParams {
    threshold: Option<f32>,
    top_k: Option<usize>,
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    anthropic: RawAnthropic,
    #[serde(default)]
    ollama: RawOllama,
    #[serde(default)]
    openai: RawOpenAi,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            anthropic: RawAnthropic::default(),
            ollama: RawOllama::default(),
            openai: RawOpenAi::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawAnthropic {
    #[serde(default = "default_anthropic_url")]
    api_url: String,
    #[serde(default = "default_anthropic_model")]
    model: String,
    #[serde(default = "default_anthropic_version")]
    api_version: String,
    #[serde(default = "default_anthropic_timeout")]
    timeout_seconds: u64,
}

impl Default for RawAnthropic {
    fn default() -> Self {
        Self {
            api_url: default_anthropic_url(),
            model: default_anthropic_model(),
            api_version: default_anthropic_version(),
            timeout_seconds: default_anthropic_timeout(),
        }
    }
}

#[derive(Deserialize)]
struct RawOllama {
    #[serde(default = "default_ollama_url")]
    base_url: String,
    #[serde(default = "default_ollama_model")]
    model: String,
    #[serde(default = "default_ollama_timeout")]
    timeout_seconds: u64,
}

impl Default for RawOllama {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
            timeout_seconds: default_ollama_timeout(),
        }
    }
}

#[derive(Deserialize)]
struct RawOpenAi {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAi {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize, Default)]
struct RawCapabilities {
    #[serde(default)]
    face: bool,
    #[serde(default)]
    ocr: bool,
}

#[derive(Deserialize)]
struct RawStatutes {
    #[serde(default)]
    seed_file: Option<String>,
    #[serde(default = "default_embed_batch_size")]
    embed_batch_size: usize,
}

impl Default for RawStatutes {
    fn default() -> Self {
        Self { seed_file: None, embed_batch_size: default_embed_batch_size() }
    }
}

fn default_db_filename() -> String { "argus.db".to_string() }
fn default_busy_timeout_ms() -> u64 { 5000 }
fn default_embedding_provider() -> String { "onnx".to_string() }
fn default_dimensions() -> usize { EMBEDDING_DIM }
fn default_max_concurrency() -> usize { 4 }
fn default_onnx_model_path() -> String { "models/paraphrase-multilingual-MiniLM-L12-v2/model.onnx".to_string() }
fn default_onnx_tokenizer_path() -> String { "models/paraphrase-multilingual-MiniLM-L12-v2/tokenizer.json".to_string() }
fn default_onnx_max_tokens() -> usize { 128 }
fn default_true() -> bool { true }
fn default_remote_embedding_url() -> String { "http://localhost:11434/v1/embeddings".to_string() }
fn default_remote_embedding_model() -> String { "paraphrase-multilingual-minilm".to_string() }
fn default_remote_embedding_timeout() -> u64 { 30 }
fn default_cache_backend() -> String { "memory".to_string() }
fn default_cache_ttl() -> u64 { 3600 }
fn default_cache_entries() -> u64 { 10_000 }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_anthropic_url() -> String { "https://api.anthropic.com/v1/messages".to_string() }
fn default_anthropic_model() -> String { "claude-sonnet-4-20250514".to_string() }
fn default_anthropic_version() -> String { "2023-06-01".to_string() }
fn default_anthropic_timeout() -> u64 { 60 }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_ollama_model() -> String { "deepseek-r1:8b".to_string() }
fn default_ollama_timeout() -> u64 { 120 }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.2 }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_embed_batch_size() -> usize { 50 }

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    load_from(Path::new("config/default.toml"), &Overrides::from_env())
}

/// Internal loader. Accepts an explicit path and overrides.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let data_dir_str = overrides.data_dir.as_deref().unwrap_or(&parsed.app.data_dir);
    let data_dir = expand_home(data_dir_str);
    let log_level = overrides.log_level.clone().unwrap_or(parsed.app.log_level);
    let llm_provider = overrides.llm_provider.clone().unwrap_or(parsed.llm.provider);

    let defaults = RetrievalConfig::default();
    let r = parsed.retrieval;
    let statutes_raw = r.statutes.unwrap_or_default();
    let retrieval = RetrievalConfig {
        incidents: SearchParams {
            threshold: r.incidents.threshold.unwrap_or(defaults.incidents.threshold),
            top_k: r.incidents.top_k.unwrap_or(defaults.incidents.top_k),
        },
        statutes: SearchParams {
            threshold: statutes_raw.threshold.unwrap_or(defaults.statutes.threshold),
            top_k: statutes_raw.top_k.unwrap_or(defaults.statutes.top_k),
        },
        incident_excerpt_chars: r.incident_excerpt_chars.unwrap_or(defaults.incident_excerpt_chars),
        statute_excerpt_chars: r.statute_excerpt_chars.unwrap_or(defaults.statute_excerpt_chars),
        max_output_tokens: r.max_output_tokens.unwrap_or(defaults.max_output_tokens),
        pipeline_timeout_seconds: r
            .pipeline_timeout_seconds
            .unwrap_or(defaults.pipeline_timeout_seconds),
    };

    let onnx = OnnxEmbeddingConfig {
        model_path: resolve_under(&data_dir, &parsed.embedding.onnx.model_path),
        tokenizer_path: resolve_under(&data_dir, &parsed.embedding.onnx.tokenizer_path),
        max_tokens: parsed.embedding.onnx.max_tokens,
        token_type_ids: parsed.embedding.onnx.token_type_ids,
    };

    let config = Config {
        app_name: parsed.app.name,
        data_dir,
        log_level,
        storage: StorageConfig {
            db_filename: parsed.storage.db_filename,
            busy_timeout_ms: parsed.storage.busy_timeout_ms,
        },
        embedding: EmbeddingConfig {
            provider: parsed.embedding.provider,
            dimensions: parsed.embedding.dimensions,
            max_concurrency: parsed.embedding.max_concurrency,
            onnx,
            remote: RemoteEmbeddingConfig {
                api_base_url: parsed.embedding.remote.api_base_url,
                model: parsed.embedding.remote.model,
                timeout_seconds: parsed.embedding.remote.timeout_seconds,
            },
        },
        cache: CacheConfig {
            backend: parsed.cache.backend,
            ttl_seconds: parsed.cache.ttl_seconds,
            max_entries: parsed.cache.max_entries,
        },
        retrieval,
        llm: LlmConfig {
            provider: llm_provider,
            anthropic: AnthropicConfig {
                api_url: parsed.llm.anthropic.api_url,
                model: parsed.llm.anthropic.model,
                api_version: parsed.llm.anthropic.api_version,
                timeout_seconds: parsed.llm.anthropic.timeout_seconds,
            },
            ollama: OllamaConfig {
                base_url: parsed.llm.ollama.base_url,
                model: parsed.llm.ollama.model,
                timeout_seconds: parsed.llm.ollama.timeout_seconds,
            },
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        capabilities: CapabilitiesConfig {
            face: parsed.capabilities.face,
            ocr: parsed.capabilities.ocr,
        },
        statutes: StatutesConfig {
            seed_file: parsed.statutes.seed_file.map(|p| expand_home(&p)),
            embed_batch_size: parsed.statutes.embed_batch_size,
        },
        llm_api_key: env::var("LLM_API_KEY").ok(),
        anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
    };

    validate(&config)?;
    Ok(config)
}

/// Reject values that would make retrieval meaningless.
fn validate(config: &Config) -> Result<(), AppError> {
    for (name, params) in [
        ("retrieval.incidents", config.retrieval.incidents),
        ("retrieval.statutes", config.retrieval.statutes),
    ] {
        if !(0.0..=1.0).contains(&params.threshold) {
            return Err(AppError::Config(format!(
                "{name}.threshold must be within [0, 1], got {}",
                params.threshold
            )));
        }
        if params.top_k == 0 {
            return Err(AppError::Config(format!("{name}.top_k must be >= 1")));
        }
    }
    if config.embedding.dimensions == 0 {
        return Err(AppError::Config("embedding.dimensions must be > 0".into()));
    }
    if config.embedding.max_concurrency == 0 {
        return Err(AppError::Config("embedding.max_concurrency must be >= 1".into()));
    }
    if config.embedding.onnx.max_tokens < 2 {
        return Err(AppError::Config("embedding.onnx.max_tokens must be >= 2".into()));
    }
    if config.statutes.embed_batch_size == 0 {
        return Err(AppError::Config("statutes.embed_batch_size must be >= 1".into()));
    }
    Ok(())
}

/// Expand `~`, then anchor a relative path at `base`.
fn resolve_under(base: &Path, path: &str) -> PathBuf {
    let p = expand_home(path);
    if p.is_absolute() { p } else { base.join(p) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
