//! Generation gateway.
//!
//! `LlmProvider` is an enum over concrete provider implementations, selected
//! once at startup by [`providers::build`]. Every variant takes the same
//! `(prompt, system, max_output_tokens)` triple and returns plain text.
//!
//! Provider instances are shared immutable values; clone them freely.

pub mod providers;

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    /// Transport failure, timeout, non-2xx status or an unusable body.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available generation backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new `generate` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Anthropic(providers::anthropic::AnthropicProvider),
    Ollama(providers::ollama::OllamaProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Dummy(providers::dummy::DummyProvider),
}

impl LlmProvider {
    /// One round-trip: send `prompt` with the `system` instruction and return
    /// the generated text.
    pub async fn generate(
        &self,
        prompt: &str,
        system: &str,
        max_output_tokens: u32,
    ) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Anthropic(p) => p.generate(prompt, system, max_output_tokens).await,
            LlmProvider::Ollama(p) => p.generate(prompt, system, max_output_tokens).await,
            LlmProvider::OpenAiCompatible(p) => p.generate(prompt, system, max_output_tokens).await,
            LlmProvider::Dummy(p) => p.generate(prompt, system, max_output_tokens).await,
        }
    }

    /// Short provider name for logs and the status line.
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic(_) => "anthropic",
            LlmProvider::Ollama(_) => "ollama",
            LlmProvider::OpenAiCompatible(_) => "openai",
            LlmProvider::Dummy(_) => "dummy",
        }
    }
}
