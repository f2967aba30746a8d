//! XLM-RoBERTa sentence encoder (BGE-M3 and relatives) run through candle.
use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use citerag_core::traits::Embedder;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

pub const DEFAULT_MAX_TOKENS: usize = 256;
// XLM-R's `<pad>`.
const FALLBACK_PAD_ID: u32 = 1;

pub struct CandleEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    pad_id: u32,
    max_tokens: usize,
}

impl CandleEmbedder {
    /// Loads `tokenizer.json`, `config.json` and the weights from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self> {
        if !model_dir.is_dir() {
            bail!("embedding model directory {} not found", model_dir.display());
        }
        let device = select_device();

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", tokenizer_path.display()))?;

        let config_path = model_dir.join("config.json");
        let raw = fs::read_to_string(&config_path).with_context(|| format!("failed to read {}", config_path.display()))?;
        let config: XLMRobertaConfig = serde_json::from_str(&raw)?;
        let dim = hidden_size(&raw)?;

        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;

        let pad_id = tokenizer
            .get_padding()
            .map(|p| p.pad_id)
            .or_else(|| tokenizer.token_to_id("<pad>"))
            .unwrap_or(FALLBACK_PAD_ID);
        info!(dir = %model_dir.display(), dim, "embedding model loaded");
        Ok(Self { model, tokenizer, device, dim, pad_id, max_tokens: DEFAULT_MAX_TOKENS })
    }

    /// Longer inputs are truncated to this many tokens.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }
}

impl Embedder for CandleEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let (input_ids, attention_mask) =
            tokenize_batch(&self.tokenizer, texts, self.max_tokens, self.pad_id, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dim) {
            bail!("model produced {}-dim vectors, expected {}", v.len(), self.dim);
        }
        debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "embedded batch");
        Ok(vectors)
    }
}

fn hidden_size(config_json: &str) -> Result<usize> {
    let value: serde_json::Value = serde_json::from_str(config_json)?;
    value
        .get("hidden_size")
        .and_then(serde_json::Value::as_u64)
        .and_then(|h| usize::try_from(h).ok())
        .ok_or_else(|| anyhow!("config.json has no hidden_size"))
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    if pickle.exists() {
        return Ok(candle_core::pickle::read_all(&pickle)?.into_iter().collect());
    }
    bail!("no model.safetensors or pytorch_model.bin in {}", model_dir.display())
}
