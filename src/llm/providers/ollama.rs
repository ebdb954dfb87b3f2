//! Local Ollama provider (`POST {base}/api/generate`, non-streaming).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_status, http_client, non_empty, transport_error};
use crate::llm::ProviderError;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String, timeout_seconds: u64) -> Result<Self, ProviderError> {
        let client = http_client(timeout_seconds)?;
        let endpoint = format!("{}/api/generate", base_url.trim_end_matches('/'));
        Ok(Self { client, endpoint, model })
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system: &str,
        max_output_tokens: u32,
    ) -> Result<String, ProviderError> {
        let payload = GenerateRequest {
            model: &self.model,
            prompt,
            system: (!system.is_empty()).then_some(system),
            stream: false,
            options: Options { num_predict: max_output_tokens },
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "sending ollama request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(&self.endpoint, e))?;

        let response = check_status(response).await?;

        let parsed = response.json::<GenerateResponse>().await.map_err(|e| {
            ProviderError::Unavailable(format!("failed to parse response body: {e}"))
        })?;

        non_empty(parsed.response)
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let p = OllamaProvider::new("http://localhost:11434/".into(), "m".into(), 120).unwrap();
        assert_eq!(p.endpoint, "http://localhost:11434/api/generate");
    }

    #[test]
    fn request_is_non_streaming() {
        let payload = GenerateRequest {
            model: "deepseek-r1:8b",
            prompt: "p",
            system: Some("s"),
            stream: false,
            options: Options { num_predict: 2000 },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["system"], "s");
        assert_eq!(json["options"]["num_predict"], 2000);
    }
}
