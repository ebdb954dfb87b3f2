//! Anthropic Messages API provider (`POST /v1/messages`).
//!
//! Wire types are private to this module. The API key travels in the
//! `x-api-key` header together with the pinned `anthropic-version`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{check_status, http_client, non_empty, transport_error};
use crate::llm::ProviderError;

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_url: String,
    model: String,
    api_version: String,
    api_key: Option<String>,
}

impl AnthropicProvider {
    /// A missing key is tolerated here so the binary can start; every
    /// `generate` call then fails as unavailable.
    pub fn new(
        api_url: String,
        model: String,
        api_version: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        if api_key.is_none() {
            warn!("ANTHROPIC_API_KEY not set; anthropic generation will fail");
        }
        let client = http_client(timeout_seconds)?;
        Ok(Self { client, api_url, model, api_version, api_key })
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system: &str,
        max_output_tokens: u32,
    ) -> Result<String, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("ANTHROPIC_API_KEY is not set".into()))?;

        let payload = MessagesRequest {
            model: &self.model,
            max_tokens: max_output_tokens,
            system: (!system.is_empty()).then_some(system),
            messages: vec![Message { role: "user", content: prompt }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), max_output_tokens, "sending anthropic request");

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", key)
            .header("anthropic-version", &self.api_version)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(&self.api_url, e))?;

        let response = check_status(response).await?;

        let parsed = response.json::<MessagesResponse>().await.map_err(|e| {
            ProviderError::Unavailable(format!("failed to parse response body: {e}"))
        })?;

        let text = parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text);
        non_empty(text)
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_unavailable_without_network() {
        let p = AnthropicProvider::new(
            "http://127.0.0.1:1/v1/messages".into(),
            "claude-test".into(),
            "2023-06-01".into(),
            5,
            None,
        )
        .unwrap();
        let err = p.generate("prompt", "system", 10).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(ref m) if m.contains("ANTHROPIC_API_KEY")));
    }

    #[test]
    fn request_omits_empty_system() {
        let payload = MessagesRequest {
            model: "m",
            max_tokens: 2000,
            system: None,
            messages: vec![Message { role: "user", content: "hi" }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["max_tokens"], 2000);
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
