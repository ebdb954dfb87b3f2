//! Local sentence-transformer encoder on ONNX Runtime.
//!
//! Loads a BERT-style model (`model.onnx`) and its HuggingFace
//! `tokenizer.json` once at startup. Each text is tokenized, truncated to
//! `max_tokens`, run through the session, mean-pooled over the attention
//! mask and L2-normalised.
//!
//! `ort` is built with `load-dynamic`: the ONNX Runtime shared library is
//! resolved at load time from `ORT_DYLIB_PATH` or the system search path.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tokio::sync::Semaphore;
use tokio::task;
use tracing::{debug, info};

use crate::embedding::EmbeddingError;

/// Inference runs on the blocking pool with at most `max_concurrency`
/// batches in flight. `Session::run` needs `&mut`, so one batch holds the
/// session at a time.
#[derive(Clone)]
pub struct OnnxEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    model_name: String,
    dimensions: usize,
    max_tokens: usize,
    token_type_ids: bool,
    permits: Arc<Semaphore>,
}

impl fmt::Debug for OnnxEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxEmbedder")
            .field("model", &self.model_name)
            .field("dimensions", &self.dimensions)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

/// Load-time settings for [`OnnxEmbedder::load`].
#[derive(Debug, Clone)]
pub struct OnnxOptions {
    pub dimensions: usize,
    pub max_tokens: usize,
    /// Feed an all-zero `token_type_ids` input (BERT exports expect it).
    pub token_type_ids: bool,
    pub max_concurrency: usize,
}

impl OnnxEmbedder {
    pub fn load(model_path: &Path, tokenizer_path: &Path, opts: OnnxOptions) -> Result<Self, EmbeddingError> {
        for (what, path) in [("model", model_path), ("tokenizer", tokenizer_path)] {
            if !path.is_file() {
                return Err(EmbeddingError::Model(format!("{what} file not found: {}", path.display())));
            }
        }

        let session = Session::builder()
            .map_err(|e| EmbeddingError::Model(format!("onnx runtime: {e}")))?
            .with_intra_threads(2)
            .map_err(|e| EmbeddingError::Model(format!("onnx runtime: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| EmbeddingError::Model(format!("{}: {e}", model_path.display())))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EmbeddingError::Model(format!("{}: {e}", tokenizer_path.display())))?;

        let model_name = model_path
            .parent()
            .and_then(|p| p.file_name())
            .or_else(|| model_path.file_stem())
            .and_then(|s| s.to_str())
            .unwrap_or("onnx-model")
            .to_string();

        info!(model = %model_name, dims = opts.dimensions, max_tokens = opts.max_tokens, "onnx embedder loaded");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            model_name,
            dimensions: opts.dimensions,
            max_tokens: opts.max_tokens.max(2),
            token_type_ids: opts.token_type_ids,
            permits: Arc::new(Semaphore::new(opts.max_concurrency.max(1))),
        })
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| EmbeddingError::Task(format!("encoder pool closed: {e}")))?;
        let this = self.clone();
        task::spawn_blocking(move || texts.iter().map(|t| this.infer(t)).collect())
            .await
            .map_err(|e| EmbeddingError::Task(format!("onnx task failed: {e}")))?
    }

    fn infer(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Request(format!("tokenize: {e}")))?;

        let len = encoding.get_ids().len().min(self.max_tokens);
        let ids: Vec<i64> = encoding.get_ids()[..len].iter().map(|&id| id as i64).collect();
        let mask: Vec<i64> = encoding.get_attention_mask()[..len].iter().map(|&m| m as i64).collect();
        let shape = vec![1i64, len as i64];

        let tensor = |data: Vec<i64>| {
            Tensor::from_array((shape.clone(), data))
                .map_err(|e| EmbeddingError::Request(format!("tensor creation: {e}")))
        };
        let ids_tensor = tensor(ids)?;
        let mask_tensor = tensor(mask.clone())?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbeddingError::Task(format!("session lock poisoned: {e}")))?;

        let outputs = if self.token_type_ids {
            let types_tensor = tensor(vec![0i64; len])?;
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => types_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            ])
        }
        .map_err(|e| EmbeddingError::Request(format!("inference: {e}")))?;

        let (_name, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| EmbeddingError::Request("model produced no output".into()))?;
        let (out_shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::Request(format!("tensor extraction: {e}")))?;

        let pooled = mean_pool(out_shape, data, &mask)?;
        debug!(tokens = len, dims = pooled.len(), "onnx inference");
        Ok(pooled)
    }
}

/// Pool a single-item model output into one unit vector.
///
/// `[1, seq, dims]` token states are averaged over positions whose mask is
/// non-zero; `[1, dims]` is taken as already pooled.
pub(crate) fn mean_pool(shape: &[i64], data: &[f32], mask: &[i64]) -> Result<Vec<f32>, EmbeddingError> {
    let mut pooled = match *shape {
        [1, seq, dims] => {
            let (seq, dims) = (seq as usize, dims as usize);
            if dims == 0 || data.len() < seq * dims || mask.len() < seq {
                return Err(EmbeddingError::Request(format!(
                    "output {shape:?} does not match {} values and {} mask positions",
                    data.len(),
                    mask.len()
                )));
            }
            let mut sum = vec![0.0f32; dims];
            let mut kept = 0usize;
            for (row, &m) in data.chunks_exact(dims).take(seq).zip(mask) {
                if m == 0 {
                    continue;
                }
                kept += 1;
                for (acc, v) in sum.iter_mut().zip(row) {
                    *acc += v;
                }
            }
            if kept > 0 {
                for v in &mut sum {
                    *v /= kept as f32;
                }
            }
            sum
        }
        [1, dims] if data.len() >= dims as usize => data[..dims as usize].to_vec(),
        _ => return Err(EmbeddingError::Request(format!("unexpected output shape {shape:?}"))),
    };

    let norm: f32 = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut pooled {
            *v /= norm;
        }
    }
    Ok(pooled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> OnnxOptions {
        OnnxOptions { dimensions: 384, max_tokens: 128, token_type_ids: true, max_concurrency: 1 }
    }

    #[test]
    fn padding_positions_are_ignored() {
        // Two real tokens and one padded position carrying garbage.
        let data = [1.0, 0.0, 3.0, 0.0, 100.0, 100.0];
        let v = mean_pool(&[1, 3, 2], &data, &[1, 1, 0]).unwrap();
        assert!((v[0] - 1.0).abs() < 1e-6);
        assert!(v[1].abs() < 1e-6);
    }

    #[test]
    fn pooled_output_passes_through_normalised() {
        let v = mean_pool(&[1, 2], &[3.0, 4.0], &[1]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn odd_shapes_are_rejected() {
        assert!(mean_pool(&[2, 3, 2], &[0.0; 12], &[1, 1, 1]).is_err());
        assert!(mean_pool(&[1, 4, 2], &[0.0; 4], &[1; 4]).is_err());
    }

    #[test]
    fn missing_model_file_is_a_model_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = OnnxEmbedder::load(&temp.path().join("model.onnx"), &temp.path().join("tokenizer.json"), opts())
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Model(ref m) if m.contains("model file not found")));
    }

    #[test]
    fn missing_tokenizer_is_reported_before_the_runtime_loads() {
        let temp = tempfile::TempDir::new().unwrap();
        let model = temp.path().join("model.onnx");
        std::fs::write(&model, b"not a model").unwrap();
        let err = OnnxEmbedder::load(&model, &temp.path().join("tokenizer.json"), opts()).unwrap_err();
        assert!(matches!(err, EmbeddingError::Model(ref m) if m.contains("tokenizer file not found")));
    }
}
