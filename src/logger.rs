//! Tracing setup for the `argus` binary.
//!
//! One compact stderr subscriber, installed once. The filter comes from
//! either the resolved log level or `RUST_LOG`, see [`init`].

use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Install the global subscriber.
///
/// With `cli_override` set (a `-v` flag was given) `level` wins and
/// `RUST_LOG` only rescues an unparsable level. Otherwise `RUST_LOG`, when
/// set, wins over the configured level.
pub fn init(level: &str, cli_override: bool) -> Result<(), AppError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(level, cli_override, rust_log.as_deref())?;

    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("subscriber already installed: {e}")))
}

fn build_filter(level: &str, cli_override: bool, rust_log: Option<&str>) -> Result<EnvFilter, AppError> {
    let (first, second) = if cli_override { (Some(level), rust_log) } else { (rust_log, Some(level)) };

    let mut last_err = None;
    for directives in [first, second].into_iter().flatten() {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return Ok(filter),
            Err(e) => last_err = Some(format!("'{directives}': {e}")),
        }
    }
    Err(AppError::Logger(format!(
        "no usable log filter ({})",
        last_err.unwrap_or_else(|| "nothing configured".into())
    )))
}
