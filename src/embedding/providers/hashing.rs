//! Local feature-hashing text encoder.
//!
//! Deterministic dense vectors built by hashing lowercase word tokens and
//! adjacent word pairs into fixed-dimension buckets (FNV-1a), weighted by term
//! frequency and L2-normalised. Needs no model files and no network, which
//! makes it the offline fallback and the encoder the test suites run on.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task;

use crate::embedding::EmbeddingError;

/// CPU-bound encoder. Encoding runs on the blocking pool, with at most
/// `max_concurrency` jobs in flight.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    permits: Arc<Semaphore>,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize, max_concurrency: usize) -> Self {
        Self { dimensions, permits: Arc::new(Semaphore::new(max_concurrency.max(1))) }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| EmbeddingError::Task(format!("encoder pool closed: {e}")))?;
        let dims = self.dimensions;
        task::spawn_blocking(move || texts.iter().map(|t| encode(t, dims)).collect())
            .await
            .map_err(|e| EmbeddingError::Task(format!("encoder task failed: {e}")))
    }
}

/// Hash a feature into a bucket index using FNV-1a.
fn bucket(feature: &str, dims: usize) -> usize {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in feature.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h % dims as u64) as usize
}

/// Lowercase alphanumeric words of at least two characters.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.chars().count() >= 2)
        .map(|s| s.to_lowercase())
        .collect()
}

pub(crate) fn encode(text: &str, dims: usize) -> Vec<f32> {
    let tokens = tokenize(text);
    let mut vec = vec![0.0f32; dims];
    if tokens.is_empty() || dims == 0 {
        return vec;
    }

    let mut tf: HashMap<String, f32> = HashMap::new();
    for tok in &tokens {
        *tf.entry(tok.clone()).or_default() += 1.0;
    }
    // Word pairs carry a little word-order signal at half weight.
    for pair in tokens.windows(2) {
        *tf.entry(format!("{} {}", pair[0], pair[1])).or_default() += 0.5;
    }

    let total = tokens.len() as f32;
    for (feature, count) in &tf {
        // Longer features are rarer; short ones are mostly stopwords.
        let idf = 1.0 + (feature.chars().count() as f32).ln();
        vec[bucket(feature, dims)] += (count / total) * idf;
    }

    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cos(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn output_is_unit_norm_with_requested_dimension() {
        let v = encode("furto de veículo na avenida central", 384);
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[test]
    fn blank_text_is_zero_vector() {
        assert!(encode("  . ", 64).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn related_texts_score_higher() {
        let a = encode("roubo de celular com arma de fogo", 384);
        let b = encode("roubo de celular mediante arma", 384);
        let c = encode("perturbação do sossego com som alto", 384);
        assert!(cos(&a, &b) > cos(&a, &c));
    }

    #[tokio::test]
    async fn batch_matches_individual_and_is_deterministic() {
        let enc = HashingEmbedder::new(128, 2);
        let texts = vec!["hello world".to_string(), "foo bar baz".to_string()];
        let batch = enc.embed_batch(texts.clone()).await.unwrap();
        let again = enc.embed_batch(texts.clone()).await.unwrap();
        assert_eq!(batch, again);
        for (i, t) in texts.iter().enumerate() {
            assert_eq!(batch[i], encode(t, 128));
        }
    }
}
