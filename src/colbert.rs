use std::sync::Mutex;

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    vector_index::normalize,
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "DOCFINDER_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn provider_error(e: impl std::fmt::Display) -> Error {
    Error::EmbeddingProvider(e.to_string())
}

/// Single-vector embeddings from a ColBERT model.
///
/// ColBERT produces one vector per token; those are mean-pooled over the
/// sequence and L2-normalized so chunks and queries can be compared by
/// cosine similarity. The model is loaded (and downloaded if necessary) on
/// first use.
///
/// Encoding needs exclusive access to the model, so concurrent callers
/// are serialized. The lock is taken per chunk rather than per file, so a
/// query embedding waits for at most one chunk of an in-flight index run.
pub struct ColbertEmbedder {
    model_id: String,
    model: Mutex<Option<ColBERT>>,
}

impl ColbertEmbedder {
    /// The model id is taken from `model_id`, then `DOCFINDER_MODEL`, then
    /// the default model.
    pub fn new(model_id: Option<&str>) -> Self {
        let model_id = model_id
            .map(str::to_string)
            .or_else(|| std::env::var(MODEL_ENV_VAR).ok())
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());
        Self {
            model_id,
            model: Mutex::new(None),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    /// Run `f` against the loaded model, loading it first if needed.
    fn with_model<T>(&self, f: impl FnOnce(&mut ColBERT) -> Result<T>) -> Result<T> {
        let mut guard = self.model.lock().map_err(|_| Error::Poisoned("model"))?;
        if guard.is_none() {
            tracing::info!(model = %self.model_id, "loading embedding model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(provider_error)?;
            *guard = Some(colbert);
        }
        let Some(model) = guard.as_mut() else {
            return Err(Error::EmbeddingProvider("model failed to load".into()));
        };
        f(model)
    }
}

/// Mean over the token axis of a `[tokens, dim]` tensor, normalized.
fn pool(tokens: &Tensor) -> Result<Vec<f32>> {
    let pooled = tokens
        .mean(0)
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(provider_error)?;
    Ok(normalize(&pooled))
}

impl Embedder for ColbertEmbedder {
    fn name(&self) -> &str {
        &self.model_id
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // One text per call so padding never enters the mean.
        texts
            .iter()
            .map(|text| {
                self.with_model(|model| {
                    let batch = model
                        .encode(std::slice::from_ref(text), false)
                        .map_err(provider_error)?;
                    pool(&batch.squeeze(0).map_err(provider_error)?)
                })
            })
            .collect()
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.with_model(|model| {
            let batch = model
                .encode(&[query.to_string()], true)
                .map_err(provider_error)?;
            // Squeeze the batch dimension: [1, Q, D] -> [Q, D]
            pool(&batch.squeeze(0).map_err(provider_error)?)
        })
    }
}

impl std::fmt::Debug for ColbertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColbertEmbedder")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}
