// engine.rs — Candle BERT embedding engine.
//
// Loads a BERT-family checkpoint from safetensors and turns a batch of texts into
// L2-normalized sentence vectors. Two pooling strategies are supported:
// attention-mask-aware mean pooling (padding never contributes) and CLS pooling.

use std::path::Path;

use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::config;

/// How per-token hidden states are reduced to one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    /// Average over real (non-padding) tokens.
    Mean,
    /// Hidden state of the first ([CLS]) token.
    Cls,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub pooling: Pooling,
    pub max_tokens: usize,
    pub expected_dims: usize,
}

/// The embedding engine holds the loaded model and tokenizer.
pub struct EmbeddingEngine {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    options: EngineOptions,
}

impl EmbeddingEngine {
    /// Load the model from a local directory containing model.safetensors,
    /// tokenizer.json, and config.json.
    pub fn load(model_dir: &Path, options: EngineOptions) -> anyhow::Result<Self> {
        let device = Device::Cpu;

        let config_path = model_dir.join(config::embedding::CONFIG_FILE);
        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("read {}", config_path.display()))?;
        let bert_config: BertConfig = serde_json::from_str(&config_str)
            .with_context(|| format!("parse {}", config_path.display()))?;

        log::info!(
            "Loading embedding model: hidden_size={}, layers={}, heads={}, pooling={:?}",
            bert_config.hidden_size,
            bert_config.num_hidden_layers,
            bert_config.num_attention_heads,
            options.pooling,
        );

        if bert_config.hidden_size != options.expected_dims {
            bail!(
                "model hidden size {} does not match expected embedding dims {}",
                bert_config.hidden_size,
                options.expected_dims
            );
        }

        let weights_path = model_dir.join(config::embedding::WEIGHTS_FILE);
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.clone()], DType::F32, &device)
                .with_context(|| format!("load weights from {}", weights_path.display()))?
        };

        let model = BertModel::load(vb, &bert_config).context("load BERT model")?;

        let tokenizer_path = model_dir.join(config::embedding::TOKENIZER_FILE);
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: options.max_tokens,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;

        // Pad each batch to its longest member; the attention mask hides the padding.
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        log::info!("Embedding model loaded successfully (dims={})", bert_config.hidden_size);

        Ok(Self {
            model,
            tokenizer,
            device,
            options,
        })
    }

    /// Embed a batch of texts in one forward pass. Returns one vector per text,
    /// in input order. Blank texts map to the zero vector without touching the model.
    pub fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        embed_non_blank(texts, self.options.expected_dims, |inputs| self.forward_pooled(inputs))
    }

    /// Tokenize, run one padded forward pass, pool, and normalize.
    fn forward_pooled(&self, inputs: Vec<&str>) -> anyhow::Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        let batch = encodings.len();
        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);

        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            let enc_ids = encoding.get_ids();
            let enc_mask = encoding.get_attention_mask();
            for j in 0..seq_len {
                ids.push(enc_ids.get(j).copied().unwrap_or(0) as i64);
                mask.push(enc_mask.get(j).copied().unwrap_or(0) as i64);
            }
        }

        // [batch, seq_len]
        let token_ids_t = Tensor::from_vec(ids, (batch, seq_len), &self.device)?;
        let attention_mask_t = Tensor::from_vec(mask, (batch, seq_len), &self.device)?;
        let token_type_ids = token_ids_t.zeros_like()?;

        // Forward pass → [batch, seq_len, hidden_size]
        let output = self
            .model
            .forward(&token_ids_t, &token_type_ids, Some(&attention_mask_t))?;

        let pooled = match self.options.pooling {
            Pooling::Mean => mean_pooling(&output, &attention_mask_t)?,
            Pooling::Cls => cls_pooling(&output)?,
        };
        let pooled = l2_normalize(&pooled)?;

        Ok(pooled.to_vec2()?)
    }
}

/// Send only non-blank texts to `encode` and place each vector back at its input
/// position. Blank texts get the zero vector.
fn embed_non_blank<F>(texts: &[String], dims: usize, encode: F) -> anyhow::Result<Vec<Vec<f32>>>
where
    F: FnOnce(Vec<&str>) -> anyhow::Result<Vec<Vec<f32>>>,
{
    let mut out = vec![vec![0.0f32; dims]; texts.len()];

    let live: Vec<usize> = texts
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.trim().is_empty())
        .map(|(i, _)| i)
        .collect();

    if live.is_empty() {
        return Ok(out);
    }

    let rows = encode(live.iter().map(|&i| texts[i].as_str()).collect())?;
    if rows.len() != live.len() {
        bail!("model returned {} vectors for {} texts", rows.len(), live.len());
    }

    for (idx, row) in live.into_iter().zip(rows) {
        if row.len() != dims {
            bail!("unexpected embedding dims: got {}, expected {}", row.len(), dims);
        }
        out[idx] = row;
    }

    Ok(out)
}

/// Attention-mask-aware mean pooling.
///
/// input_embeds: [batch, seq_len, hidden_size]
/// attention_mask: [batch, seq_len] (1 for real tokens, 0 for padding)
/// output: [batch, hidden_size]
fn mean_pooling(input_embeds: &Tensor, attention_mask: &Tensor) -> anyhow::Result<Tensor> {
    // [batch, seq_len] → [batch, seq_len, hidden_size]
    let mask_expanded = attention_mask
        .to_dtype(DType::F32)?
        .unsqueeze(2)?
        .broadcast_as(input_embeds.shape())?;

    let sum_embeddings = (input_embeds * &mask_expanded)?.sum(1)?;

    // Clamp to avoid div by zero on an all-padding row.
    let sum_mask = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;

    Ok((sum_embeddings / sum_mask)?)
}

/// First-token pooling: [batch, seq_len, hidden_size] → [batch, hidden_size].
fn cls_pooling(input_embeds: &Tensor) -> anyhow::Result<Tensor> {
    Ok(input_embeds.narrow(1, 0, 1)?.squeeze(1)?)
}

/// L2 normalize a tensor along the last dimension.
fn l2_normalize(tensor: &Tensor) -> anyhow::Result<Tensor> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?;
    let norm = norm.clamp(1e-12, f64::MAX)?;
    Ok(tensor.broadcast_div(&norm)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hidden() -> anyhow::Result<Tensor> {
        // batch=2, seq_len=3, hidden=2
        let data: Vec<f32> = vec![
            1.0, 2.0, //
            3.0, 4.0, //
            100.0, 100.0, //
            -1.0, 0.0, //
            5.0, 6.0, //
            7.0, 8.0,
        ];
        Ok(Tensor::from_vec(data, (2, 3, 2), &Device::Cpu)?)
    }

    #[test]
    fn test_mean_pooling_ignores_padding() -> anyhow::Result<()> {
        let mask = Tensor::from_vec(vec![1i64, 1, 0, 1, 1, 1], (2, 3), &Device::Cpu)?;
        let pooled: Vec<Vec<f32>> = mean_pooling(&hidden()?, &mask)?.to_vec2()?;

        // First row: the padded (100, 100) token must not contribute.
        assert_eq!(pooled[0], vec![2.0, 3.0]);
        assert!((pooled[1][0] - 11.0 / 3.0).abs() < 1e-6);
        assert!((pooled[1][1] - 14.0 / 3.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_cls_pooling_takes_first_token() -> anyhow::Result<()> {
        let pooled: Vec<Vec<f32>> = cls_pooling(&hidden()?)?.to_vec2()?;
        assert_eq!(pooled, vec![vec![1.0, 2.0], vec![-1.0, 0.0]]);
        Ok(())
    }

    #[test]
    fn test_embed_non_blank_keeps_positions() -> anyhow::Result<()> {
        let texts: Vec<String> = ["", "a", "  ", "bb"].iter().map(|s| s.to_string()).collect();
        let mut seen = Vec::new();
        let out = embed_non_blank(&texts, 2, |inputs| {
            seen = inputs.iter().map(|s| s.to_string()).collect();
            Ok(inputs.iter().map(|s| vec![s.len() as f32, 1.0]).collect())
        })?;

        assert_eq!(seen, vec!["a", "bb"]);
        assert_eq!(out, vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![0.0, 0.0], vec![2.0, 1.0]]);
        Ok(())
    }

    #[test]
    fn test_embed_non_blank_all_blank_skips_model() -> anyhow::Result<()> {
        let texts = vec![String::new(), " \n".to_string()];
        let out = embed_non_blank(&texts, 3, |_| anyhow::bail!("model must not run"))?;
        assert_eq!(out, vec![vec![0.0; 3]; 2]);
        Ok(())
    }

    #[test]
    fn test_embed_non_blank_rejects_wrong_shapes() {
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(embed_non_blank(&texts, 2, |_| Ok(vec![vec![0.0, 0.0]])).is_err());
        assert!(embed_non_blank(&texts, 2, |_| Ok(vec![vec![0.0]; 2])).is_err());
    }

    #[test]
    fn test_l2_normalize_unit_rows() -> anyhow::Result<()> {
        let t = Tensor::from_vec(vec![3.0f32, 4.0, 0.0, 0.0], (2, 2), &Device::Cpu)?;
        let rows: Vec<Vec<f32>> = l2_normalize(&t)?.to_vec2()?;
        assert!((rows[0][0] - 0.6).abs() < 1e-6);
        assert!((rows[0][1] - 0.8).abs() < 1e-6);
        // Zero row stays zero instead of becoming NaN.
        assert_eq!(rows[1], vec![0.0, 0.0]);
        Ok(())
    }
}
