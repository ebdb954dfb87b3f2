//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// HTTP-equivalent status for the outer surface.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::InvalidInput(_) => 400,
            AppError::GenerationUnavailable(_) => 503,
            AppError::CapabilityUnavailable(_) => 501,
            _ => 500,
        }
    }

    /// `true` when the caller may retry the same request later unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::GenerationUnavailable(_))
    }
}

impl From<crate::llm::ProviderError> for AppError {
    fn from(e: crate::llm::ProviderError) -> Self {
        use crate::llm::ProviderError;
        match e {
            ProviderError::UnknownProvider(name) => {
                AppError::Config(format!("unknown generation provider: {name}"))
            }
            ProviderError::Unavailable(msg) => AppError::GenerationUnavailable(msg),
        }
    }
}

impl From<crate::embedding::EmbeddingError> for AppError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        use crate::embedding::EmbeddingError;
        match e {
            EmbeddingError::UnknownProvider(name) => {
                AppError::Config(format!("unknown embedding provider: {name}"))
            }
            EmbeddingError::Model(msg) => AppError::Config(format!("embedding model: {msg}")),
            other => AppError::Embedding(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn not_found_maps_to_404() {
        let e = AppError::NotFound("encounter 7".into());
        assert_eq!(e.status_code(), 404);
        assert!(!e.is_retryable());
    }

    #[test]
    fn generation_unavailable_is_retryable_503() {
        let e = AppError::GenerationUnavailable("timeout".into());
        assert_eq!(e.status_code(), 503);
        assert!(e.is_retryable());
    }

    #[test]
    fn unknown_provider_becomes_config_error() {
        let e: AppError = crate::llm::ProviderError::UnknownProvider("gpt-x".into()).into();
        assert!(matches!(e, AppError::Config(ref m) if m.contains("gpt-x")));
    }

    #[test]
    fn missing_embedding_model_is_a_config_error() {
        let e: AppError = crate::embedding::EmbeddingError::Model("model file not found".into()).into();
        assert!(matches!(e, AppError::Config(ref m) if m.contains("model file not found")));
    }

    #[test]
    fn provider_unavailable_becomes_generation_unavailable() {
        let e: AppError = crate::llm::ProviderError::Unavailable("HTTP 500".into()).into();
        assert!(matches!(e, AppError::GenerationUnavailable(_)));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }
}
