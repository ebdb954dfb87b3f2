//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! All OpenAI wire types are private to this module; callers never see them.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{check_status, http_client, non_empty, transport_error};
use crate::llm::ProviderError;

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Covers OpenAI, OpenAI-compatible local servers (vLLM, LM Studio…),
/// and hosted alternatives. Cheap to clone because `reqwest::Client` is an
/// `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = http_client(timeout_seconds)?;
        Ok(Self { client, api_base_url, model, temperature, api_key })
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system: &str,
        max_output_tokens: u32,
    ) -> Result<String, ProviderError> {
        // gpt-5 family rejects a temperature parameter.
        let temperature = if self.model.starts_with("gpt-5") { None } else { Some(self.temperature) };

        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Message { role: "system", content: system });
        }
        messages.push(Message { role: "user", content: prompt });

        let payload = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens: max_output_tokens,
        };

        debug!(
            model = %payload.model,
            temperature = ?payload.temperature,
            prompt_len = prompt.len(),
            "sending chat completion request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| transport_error(&self.api_base_url, e))?;
        let response = check_status(response).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            ProviderError::Unavailable(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = parsed.choices.len(), "received chat completion");

        non_empty(parsed.choices.into_iter().next().and_then(|c| c.message.content))
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt5_request_has_no_temperature() {
        let payload = ChatCompletionRequest {
            model: "gpt-5-mini",
            messages: vec![Message { role: "user", content: "x" }],
            temperature: None,
            max_tokens: 10,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["max_tokens"], 10);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let p = OpenAiCompatibleProvider::new(
            "http://127.0.0.1:1/v1/chat/completions".into(),
            "gpt-test".into(),
            0.2,
            2,
            None,
        )
        .unwrap();
        let err = p.generate("p", "s", 10).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
