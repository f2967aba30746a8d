//! Embedders implementing [`citerag_core::traits::Embedder`].
//!
//! [`HashEmbedder`] is a deterministic signed feature-hashing encoder. It needs
//! no model files, so it serves offline use and tests. [`CandleEmbedder`] runs
//! a local XLM-RoBERTa model (e.g. BGE-M3) on Metal or CPU.

pub mod device;
pub mod model;
pub mod pool;
pub mod tokenize;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::info;
use twox_hash::XxHash64;

use citerag_core::config::{expand_path, EmbeddingProvider, EmbeddingSettings};
use citerag_core::text::tokenize;
use citerag_core::traits::Embedder;

pub use model::CandleEmbedder;
pub use pool::masked_mean_l2;

pub const DEFAULT_DIM: usize = 384;

/// Bag-of-words vectors: each lowercased word hashes to one signed bucket,
/// then the vector is L2-normalized. Texts with no words map to the zero vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    seed: u64,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1), seed: 0 }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in tokenize(text) {
            let mut hasher = XxHash64::with_seed(self.seed);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Builds the configured embedder. The candle model's hidden size must equal
/// `settings.dim`, since collections are created with that width.
pub fn embedder_from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    match settings.provider {
        EmbeddingProvider::Hash => {
            info!(dim = settings.dim, "using hash embedder");
            Ok(Arc::new(HashEmbedder::new(settings.dim)))
        }
        EmbeddingProvider::Candle => {
            let dir = expand_path(&settings.model_dir);
            let model = CandleEmbedder::load(&dir)?;
            if model.dim() != settings.dim {
                bail!(
                    "embedding.dim is {} but the model in {} produces {}-dim vectors",
                    settings.dim,
                    dir.display(),
                    model.dim()
                );
            }
            Ok(Arc::new(model))
        }
    }
}
