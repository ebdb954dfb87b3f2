//! Generation provider implementations.
//!
//! `build(config, keys)` is the factory, called at startup.
//! Adding a new backend = new module + new match arm.

pub mod anthropic;
pub mod dummy;
pub mod ollama;
pub mod openai_compatible;

use reqwest::Client;
use serde::Deserialize;
use tracing::error;

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Credentials sourced from the environment (never TOML).
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `ANTHROPIC_API_KEY`.
    pub anthropic: Option<String>,
    /// `LLM_API_KEY`, sent as a bearer token to OpenAI-compatible endpoints.
    pub openai: Option<String>,
}

/// Construct a `LlmProvider` from config and the available credentials.
pub fn build(config: &LlmConfig, keys: ApiKeys) -> Result<LlmProvider, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        "anthropic" => {
            let a = &config.anthropic;
            let p = anthropic::AnthropicProvider::new(
                a.api_url.clone(),
                a.model.clone(),
                a.api_version.clone(),
                a.timeout_seconds,
                keys.anthropic,
            )?;
            Ok(LlmProvider::Anthropic(p))
        }
        "ollama" => {
            let o = &config.ollama;
            let p = ollama::OllamaProvider::new(o.base_url.clone(), o.model.clone(), o.timeout_seconds)?;
            Ok(LlmProvider::Ollama(p))
        }
        "openai" | "openai-compatible" => {
            let oai = &config.openai;
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                oai.api_base_url.clone(),
                oai.model.clone(),
                oai.temperature,
                oai.timeout_seconds,
                keys.openai,
            )?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}

/// Shared client construction: every HTTP provider carries its own timeout.
pub(crate) fn http_client(timeout_seconds: u64) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))
}

/// Map a transport error, logging the target URL.
pub(crate) fn transport_error(url: &str, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        error!(%url, "generation request timed out");
        return ProviderError::Unavailable(format!("timeout: {e}"));
    }
    error!(%url, error = %e, "generation HTTP request failed (transport)");
    ProviderError::Unavailable(e.to_string())
}

// Error envelope used by OpenAI, Anthropic and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Consume the response and return it if successful, or a structured error.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(env) => {
            let kind = env.error.kind.map(|k| format!(" [{k}]")).unwrap_or_default();
            format!("HTTP {status}{kind}: {}", env.error.message)
        }
        Err(_) => format!("HTTP {status}: {body}"),
    };

    error!(%status, %message, "generation request returned HTTP error");
    Err(ProviderError::Unavailable(message))
}

/// Trim and reject empty generations.
pub(crate) fn non_empty(text: Option<String>) -> Result<String, ProviderError> {
    text.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::Unavailable("empty or missing content in response".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnthropicConfig, OllamaConfig, OpenAiConfig};

    fn llm_config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            anthropic: AnthropicConfig {
                api_url: "http://127.0.0.1:1/v1/messages".into(),
                model: "claude-test".into(),
                api_version: "2023-06-01".into(),
                timeout_seconds: 60,
            },
            ollama: OllamaConfig {
                base_url: "http://127.0.0.1:1".into(),
                model: "deepseek-r1:8b".into(),
                timeout_seconds: 120,
            },
            openai: OpenAiConfig {
                api_base_url: "http://127.0.0.1:1/v1/chat/completions".into(),
                model: "gpt-test".into(),
                temperature: 0.2,
                timeout_seconds: 60,
            },
        }
    }

    #[test]
    fn builds_each_known_provider() {
        for (name, expected) in [
            ("dummy", "dummy"),
            ("anthropic", "anthropic"),
            ("ollama", "ollama"),
            ("openai", "openai"),
            ("openai-compatible", "openai"),
        ] {
            let p = build(&llm_config(name), ApiKeys::default()).unwrap();
            assert_eq!(p.name(), expected);
        }
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = build(&llm_config("gemini"), ApiKeys::default()).unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(ref n) if n == "gemini"));
    }

    #[test]
    fn non_empty_trims_and_rejects_blank() {
        assert_eq!(non_empty(Some("  ok \n".into())).unwrap(), "ok");
        assert!(non_empty(Some("   ".into())).is_err());
        assert!(non_empty(None).is_err());
    }
}
