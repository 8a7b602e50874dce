//! Static local embeddings via model2vec-rs.
//!
//! `Embedder::embed`/`embed_batch` produce L2-normalized vectors of a fixed,
//! model-determined dimension. Model load happens once in `Embedder::load`; the
//! resulting handle is safe to share across threads for concurrent inference.

use crate::error::{RagError, Result};
use model2vec_rs::model::StaticModel;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::info;

/// Deterministic for a fixed model and input, thread-safe for concurrent reads,
/// batch-bounded. Pulled out as a trait so the ingestion orchestrator and
/// chunker callers can be exercised in tests against a fake embedding function
/// instead of loading a real model.
pub trait EmbedBackend: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dim(&self) -> usize;
    fn model_id(&self) -> &str;
}

/// Wraps a loaded model2vec static model behind `EmbedBackend`: deterministic,
/// thread-safe, batch-bounded.
#[derive(Clone)]
pub struct Embedder {
    model: Arc<StaticModel>,
    model_id: String,
    batch_size: usize,
    dim: usize,
}

impl Embedder {
    /// Loads the model identified by `model_id` (a HuggingFace repo id). The
    /// `cache_dir` config field is advisory — model2vec-rs manages its own
    /// HuggingFace Hub cache and is not parameterized on it here. `normalize =
    /// Some(true)` asks the model to L2-normalize on our behalf; `l2_normalize`
    /// below still runs afterwards so the unit-norm invariant holds even if a
    /// future model/version stops normalizing internally. Model load happens
    /// exactly once per `Embedder`.
    pub fn load(model_id: &str, _cache_dir: Option<&std::path::Path>, batch_size: usize) -> Result<Self> {
        info!(model = model_id, "loading embedding model");
        let model = StaticModel::from_pretrained(model_id, None, Some(true), None)
            .map_err(|e| RagError::model(format!("failed to load model {model_id}: {e}")))?;
        let dim = model
            .encode(&["dimension probe".to_string()])
            .first()
            .map(|v| v.len())
            .ok_or_else(|| RagError::model("model produced no embeddings during probe"))?;
        Ok(Self {
            model: Arc::new(model),
            model_id: model_id.to_string(),
            batch_size: batch_size.max(1),
            dim,
        })
    }

    /// Model identity string, exposed for status/debugging.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Fixed output dimensionality D for this model.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embeds a single text, L2-normalized.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(std::slice::from_ref(&text.to_string()))?;
        out.pop()
            .ok_or_else(|| RagError::model("embedder returned no vector"))
    }

    /// Embeds a batch of texts, splitting into `batch_size`-sized sub-batches
    /// run concurrently via rayon (batch size is bounded; the
    /// embedder's internal batching is an implementation detail) and
    /// L2-normalizing every output vector.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let out: Vec<Vec<f32>> = texts
            .par_chunks(self.batch_size)
            .flat_map_iter(|chunk| {
                self.model
                    .encode(chunk)
                    .iter()
                    .map(|v| l2_normalize(v))
                    .collect::<Vec<_>>()
            })
            .collect();
        Ok(out)
    }
}

impl EmbedBackend for Embedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Embedder::embed(self, text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Embedder::embed_batch(self, texts)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Deterministic, offline `EmbedBackend` over feature-hashed tokens (xxh3),
/// with no model download and no external state. Exists so the CLI binary
/// can run hermetically in tests (`RAGDB_EMBED_BACKEND=hash`) instead of
/// always reaching out to the HuggingFace Hub via `Embedder::load`; not
/// intended to produce retrieval-quality embeddings.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl EmbedBackend for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_embed(text, self.dim))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dim)).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_id(&self) -> &str {
        "hash-feature-embedder"
    }
}

fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0f32; dim];
    for token in text.split_whitespace() {
        let h = xxhash_rust::xxh3::xxh3_64(token.as_bytes());
        let bucket = (h as usize) % dim;
        let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign;
    }
    l2_normalize(&v)
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Cosine similarity between two vectors. Assumes neither is the zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    dot / (na * nb)
}
