//! Dummy provider: echoes the prompt back prefixed with `[echo]`.
//! Used for exercising the full report pipeline without a real API key.

use crate::llm::ProviderError;

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn generate(
        &self,
        prompt: &str,
        _system: &str,
        _max_output_tokens: u32,
    ) -> Result<String, ProviderError> {
        Ok(format!("[echo] {prompt}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_prefixes_echo() {
        let p = DummyProvider;
        assert_eq!(p.generate("hello", "sys", 10).await.unwrap(), "[echo] hello");
    }

    #[tokio::test]
    async fn generate_empty_prompt() {
        let p = DummyProvider;
        assert_eq!(p.generate("", "", 10).await.unwrap(), "[echo] ");
    }
}
