//! Embedding provider implementations.
//!
//! `build(config, api_key)` is the factory, called once at startup. The
//! ONNX model is loaded here, so a missing model fails startup rather than
//! the first request.

pub mod hashing;
pub mod onnx;
pub mod remote;

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingError, EmbeddingProvider};

/// Construct an `EmbeddingProvider` from config.
///
/// `api_key` comes from `LLM_API_KEY` and is only used by `remote`.
pub fn build(config: &EmbeddingConfig, api_key: Option<String>) -> Result<EmbeddingProvider, EmbeddingError> {
    match config.provider.as_str() {
        "onnx" => {
            let o = &config.onnx;
            let p = onnx::OnnxEmbedder::load(
                &o.model_path,
                &o.tokenizer_path,
                onnx::OnnxOptions {
                    dimensions: config.dimensions,
                    max_tokens: o.max_tokens,
                    token_type_ids: o.token_type_ids,
                    max_concurrency: config.max_concurrency,
                },
            )?;
            Ok(EmbeddingProvider::Onnx(p))
        }
        "hashing" => Ok(EmbeddingProvider::Hashing(hashing::HashingEmbedder::new(
            config.dimensions,
            config.max_concurrency,
        ))),
        "remote" => {
            let r = &config.remote;
            let p = remote::RemoteEmbedder::new(
                r.api_base_url.clone(),
                r.model.clone(),
                r.timeout_seconds,
                api_key,
            )?;
            Ok(EmbeddingProvider::Remote(p))
        }
        _ => Err(EmbeddingError::UnknownProvider(config.provider.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OnnxEmbeddingConfig, RemoteEmbeddingConfig};

    fn config(provider: &str, model_dir: &std::path::Path) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.into(),
            dimensions: 384,
            max_concurrency: 2,
            onnx: OnnxEmbeddingConfig {
                model_path: model_dir.join("model.onnx"),
                tokenizer_path: model_dir.join("tokenizer.json"),
                max_tokens: 128,
                token_type_ids: true,
            },
            remote: RemoteEmbeddingConfig {
                api_base_url: "http://localhost:11434/v1/embeddings".into(),
                model: "m".into(),
                timeout_seconds: 5,
            },
        }
    }

    #[test]
    fn onnx_without_model_files_fails_at_build() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = build(&config("onnx", temp.path()), None).unwrap_err();
        assert!(matches!(err, EmbeddingError::Model(_)));
    }

    #[test]
    fn hashing_needs_no_model_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let p = build(&config("hashing", temp.path()), None).unwrap();
        assert_eq!(p.name(), "hashing");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = build(&config("word2vec", temp.path()), None).unwrap_err();
        assert!(matches!(err, EmbeddingError::UnknownProvider(ref n) if n == "word2vec"));
    }
}
