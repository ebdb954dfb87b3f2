//! Argus: incident retrieval and correlation core.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > config, `RUST_LOG` otherwise)
//!   4. Init logger once
//!   5. Open the database and build providers
//!   6. Seed statutes from the configured file, embed anything pending
//!   7. Run the requested command
//!
//! # Usage
//!
//! ```text
//! argus [-v|-vv] [command]
//!
//! Commands:
//!   status                                   counts and provider summary (default)
//!   seed                                     re-run seeding and embedding, then exit
//!   incident <tenant> <number> <text-file>   register a report and embed its text
//!   report <tenant> <encounter-id> [text…]   grounded report for one encounter
//!   search <tenant> <query…>                 free-text search over both corpora
//!   links <person-id>                        relationship edges of a person
//! ```

use std::path::Path;
use std::process;

use tokio::task;
use tracing::{info, warn};

use argus::app::App;
use argus::error::AppError;
use argus::{config, ingest, logger};

/// Upper bound on unprocessed reports counted in the startup log line.
const STARTUP_INCIDENT_SCAN: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

// ── CLI arg parsing ────────────────────────────────────────────────────────

struct Args {
    log_level: Option<&'static str>,
    command: Option<String>,
    rest: Vec<String>,
}

fn parse_args() -> Args {
    let mut log_level = None;
    let mut command = None;
    let mut rest = Vec::new();

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-v" if command.is_none() => log_level = Some("debug"),
            "-vv" if command.is_none() => log_level = Some("trace"),
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            _ if command.is_none() => command = Some(arg),
            _ => rest.push(arg),
        }
    }

    Args { log_level, command, rest }
}

fn print_help() {
    eprintln!("usage: argus [-v|-vv] [command]");
    eprintln!();
    eprintln!("commands:");
    eprintln!("  status                                  counts and provider summary (default)");
    eprintln!("  seed                                    seed and embed statutes, then exit");
    eprintln!("  incident <tenant> <number> <text-file>  register a report and embed its text");
    eprintln!("  report <tenant> <encounter-id> [text]   grounded report for one encounter");
    eprintln!("  search <tenant> <query>                 free-text search over both corpora");
    eprintln!("  links <person-id>                       relationship edges of a person");
    eprintln!();
    eprintln!("environment:");
    eprintln!("  ARGUS_DATA_DIR, ARGUS_LOG_LEVEL, ARGUS_LLM_PROVIDER   config overrides");
    eprintln!("  ANTHROPIC_API_KEY, LLM_API_KEY                        provider credentials");
}

fn parse_id(name: &str, value: Option<&String>) -> Result<i64, AppError> {
    let value = value.ok_or_else(|| AppError::InvalidInput(format!("missing <{name}>")))?;
    value
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("<{name}> must be an integer, got '{value}'")))
}

// ── Entry ──────────────────────────────────────────────────────────────────

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_args();
    let config = config::load()?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        app = %config.app_name,
        data_dir = %config.data_dir.display(),
        log_level = %effective_log_level,
        "config loaded"
    );

    let app = App::build(config)?;
    prepare_corpora(&app).await?;

    match args.command.as_deref().unwrap_or("status") {
        "status" => status(&app).await,
        "seed" => Ok(()),
        "report" => {
            let tenant = parse_id("tenant", args.rest.first())?;
            let encounter = parse_id("encounter-id", args.rest.get(1))?;
            let instruction = args.rest.get(2..).map(|r| r.join(" ")).filter(|s| !s.is_empty());
            let report = app.engine.generate_report(tenant, encounter, instruction.as_deref()).await?;
            print_json(&report)
        }
        "search" => {
            let tenant = parse_id("tenant", args.rest.first())?;
            let query = args.rest.get(1..).map(|r| r.join(" ")).unwrap_or_default();
            let top_k = app.engine.policy().incidents.top_k;
            let results = app.engine.semantic_search(&query, tenant, top_k).await?;
            print_json(&results)
        }
        "incident" => {
            let tenant = parse_id("tenant", args.rest.first())?;
            let number = args
                .rest
                .get(1)
                .ok_or_else(|| AppError::InvalidInput("missing <number>".into()))?;
            let file = args
                .rest
                .get(2)
                .ok_or_else(|| AppError::InvalidInput("missing <text-file>".into()))?;
            let text = std::fs::read_to_string(file)?;
            let store = app.incidents.clone();
            let key = number.clone();
            let incident = blocking(move || match store.get_by_number(&key)? {
                Some(existing) if existing.tenant_id == tenant => Ok(existing),
                Some(_) => Err(AppError::InvalidInput(format!("report {key} belongs to another tenant"))),
                None => store.create(tenant, &key, None),
            })
            .await?;
            let outcome =
                ingest::process_incident(&app.incidents, &app.embeddings, incident.id, &text, true).await?;
            println!("✓ report {number} (id={}): {outcome:?}", incident.id);
            Ok(())
        }
        "links" => {
            let person = parse_id("person-id", args.rest.first())?;
            let edges = app.materializer.edges_for(person).await?;
            print_json(&edges)
        }
        other => {
            print_help();
            Err(AppError::InvalidInput(format!("unknown command '{other}'")))
        }
    }
}

/// Seed statutes (when configured) and embed any still missing a vector.
async fn prepare_corpora(app: &App) -> Result<(), AppError> {
    if let Some(path) = app.config.statutes.seed_file.as_deref() {
        seed_from(app, path).await?;
    }

    ingest::embed_pending_statutes(&app.statutes, &app.embeddings, app.config.statutes.embed_batch_size)
        .await?;

    let store = app.incidents.clone();
    let pending = blocking(move || store.unprocessed(STARTUP_INCIDENT_SCAN)).await?;
    if !pending.is_empty() {
        info!(pending = pending.len(), "incident reports awaiting text extraction");
    }
    Ok(())
}

async fn seed_from(app: &App, path: &Path) -> Result<(), AppError> {
    if !path.exists() {
        warn!(path = %path.display(), "statute seed file not found; skipping");
        return Ok(());
    }
    let seed = ingest::load_seed_file(path)?;
    let n = ingest::seed_statutes(&app.statutes, seed).await?;
    info!(path = %path.display(), statutes = n, "statutes seeded");
    Ok(())
}

async fn status(app: &App) -> Result<(), AppError> {
    let (statute_store, encounter_store, edge_store) =
        (app.statutes.clone(), app.encounters.clone(), app.relationships.clone());
    let ((statutes, active_statutes, embedded_statutes), (encounters, persons, vehicles), edges) =
        blocking(move || Ok((statute_store.counts()?, encounter_store.counts()?, edge_store.count()?))).await?;
    let caps: Vec<String> = app.capabilities.available().iter().map(|c| c.to_string()).collect();

    println!("✓ Argus ready: db={}", app.db.path().display());
    println!(
        "  statutes={statutes} active={active_statutes} embedded={embedded_statutes}"
    );
    println!("  encounters={encounters} persons={persons} vehicles={vehicles} links={edges}");
    println!(
        "  embedding={} cache={} capabilities=[{}]",
        app.embeddings.provider_name(),
        app.embeddings.cache_name(),
        caps.join(", ")
    );
    Ok(())
}

/// Run a synchronous store call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Storage(format!("blocking task failed: {e}")))?
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Io(std::io::Error::other(e)))?;
    println!("{json}");
    Ok(())
}
