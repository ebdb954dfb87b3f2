//! OpenAI-compatible embeddings endpoint (`POST /v1/embeddings`).
//!
//! Works against OpenAI, Ollama's compatibility layer, or a local
//! text-embeddings server. Wire types are private to this module.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingError;

#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    client: Client,
    api_base_url: String,
    model: String,
    api_key: Option<String>,
}

impl RemoteEmbedder {
    pub fn new(
        api_base_url: String,
        model: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| EmbeddingError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_base_url, model, api_key })
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = texts.len();
        let payload = EmbeddingsRequest { model: &self.model, input: texts };

        debug!(model = %self.model, inputs = expected, "sending embeddings request");

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "embeddings request failed (transport)");
            EmbeddingError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            error!(%status, "embeddings request returned HTTP error");
            return Err(EmbeddingError::Request(format!("HTTP {status}: {body}")));
        }

        let mut parsed = response
            .json::<EmbeddingsResponse>()
            .await
            .map_err(|e| EmbeddingError::Request(format!("failed to parse response body: {e}")))?;

        if parsed.data.len() != expected {
            return Err(EmbeddingError::Request(format!(
                "expected {expected} embeddings, got {}",
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_out_of_order_indices() {
        let body = r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#;
        let mut parsed: EmbeddingsResponse = serde_json::from_str(body).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_error() {
        let r = RemoteEmbedder::new("http://127.0.0.1:1/v1/embeddings".into(), "m".into(), 2, None).unwrap();
        let err = r.embed_batch(vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Request(_)));
    }
}
