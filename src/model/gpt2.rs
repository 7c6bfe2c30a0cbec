// Location: src/model/gpt2.rs

//! GPT-2 family decoder on candle.
//!
//! Learned absolute position embeddings, pre-norm blocks, fused QKV
//! projection stored in Conv1D layout (`[in, out]`) and an LM head tied to
//! the token embeddings. The KV cache is owned by the caller so concurrent
//! generations never share state.

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{embedding, layer_norm, Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Gpt2Config {
    pub vocab_size: usize,
    #[serde(default = "default_n_positions")]
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

fn default_n_positions() -> usize {
    1024
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

impl Gpt2Config {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }
}

/// Load a Conv1D weight (`[in, out]`) as a regular linear layer.
fn conv1d(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get((in_dim, out_dim), "weight")?.t()?.contiguous()?;
    let bias = vb.get(out_dim, "bias")?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Per-layer key/value tensors of one generation call
#[derive(Debug, Clone)]
pub struct Gpt2Cache {
    layers: Vec<Option<(Tensor, Tensor)>>,
}

impl Gpt2Cache {
    pub fn new(config: &Gpt2Config) -> Self {
        Self {
            layers: vec![None; config.n_layer],
        }
    }

    /// Number of positions already held in the cache
    pub fn seq_len(&self) -> usize {
        self.layers
            .first()
            .and_then(|layer| layer.as_ref())
            .and_then(|(k, _)| k.dim(2).ok())
            .unwrap_or(0)
    }
}

struct Attention {
    c_attn: Linear,
    c_proj: Linear,
    n_head: usize,
    head_dim: usize,
}

impl Attention {
    fn load(config: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let n_embd = config.n_embd;
        Ok(Self {
            c_attn: conv1d(n_embd, 3 * n_embd, vb.pp("c_attn"))?,
            c_proj: conv1d(n_embd, n_embd, vb.pp("c_proj"))?,
            n_head: config.n_head,
            head_dim: config.head_dim(),
        })
    }

    fn split_heads(&self, x: &Tensor, b: usize, t: usize) -> Result<Tensor> {
        x.reshape((b, t, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(
        &self,
        x: &Tensor,
        cache: &mut Option<(Tensor, Tensor)>,
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (b, t, c) = x.dims3()?;
        let qkv = self.c_attn.forward(x)?;
        let q = self.split_heads(&qkv.narrow(D::Minus1, 0, c)?, b, t)?;
        let k = self.split_heads(&qkv.narrow(D::Minus1, c, c)?, b, t)?;
        let v = self.split_heads(&qkv.narrow(D::Minus1, 2 * c, c)?, b, t)?;

        let (k, v) = match cache.take() {
            Some((past_k, past_v)) => (
                Tensor::cat(&[&past_k, &k], 2)?,
                Tensor::cat(&[&past_v, &v], 2)?,
            ),
            None => (k, v),
        };
        *cache = Some((k.clone(), v.clone()));

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? / scale)?;
        let scores = match mask {
            Some(mask) => scores.broadcast_add(mask)?,
            None => scores,
        };
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let y = weights.matmul(&v)?.transpose(1, 2)?.reshape((b, t, c))?;
        self.c_proj.forward(&y)
    }
}

struct Mlp {
    c_fc: Linear,
    c_proj: Linear,
}

impl Mlp {
    fn load(config: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let n_embd = config.n_embd;
        Ok(Self {
            c_fc: conv1d(n_embd, 4 * n_embd, vb.pp("c_fc"))?,
            c_proj: conv1d(4 * n_embd, n_embd, vb.pp("c_proj"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // GPT-2 uses the tanh approximation of GELU.
        self.c_proj.forward(&self.c_fc.forward(x)?.gelu()?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(config: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let eps = config.layer_norm_epsilon;
        Ok(Self {
            ln_1: layer_norm(config.n_embd, eps, vb.pp("ln_1"))?,
            attn: Attention::load(config, vb.pp("attn"))?,
            ln_2: layer_norm(config.n_embd, eps, vb.pp("ln_2"))?,
            mlp: Mlp::load(config, vb.pp("mlp"))?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        cache: &mut Option<(Tensor, Tensor)>,
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let x = (x + self.attn.forward(&self.ln_1.forward(x)?, cache, mask)?)?;
        &x + self.mlp.forward(&self.ln_2.forward(&x)?)?
    }
}

pub struct Gpt2Model {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    config: Gpt2Config,
    device: Device,
}

impl Gpt2Model {
    /// Build the model from weights named as in the Hugging Face checkpoints.
    /// Checkpoints saved from the LM-head wrapper carry a `transformer.` prefix.
    pub fn load(vb: VarBuilder, config: &Gpt2Config) -> Result<Self> {
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };

        let wte = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let wpe = embedding(config.n_positions, config.n_embd, vb.pp("wpe"))?;
        let blocks = (0..config.n_layer)
            .map(|i| Block::load(config, vb.pp(format!("h.{}", i))))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = layer_norm(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_f"))?;
        let lm_head = Linear::new(wte.embeddings().clone(), None);

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
            config: config.clone(),
            device: vb.device().clone(),
        })
    }

    pub fn config(&self) -> &Gpt2Config {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Run `input_ids` (`[batch, seq]`, u32) after the positions already in
    /// `cache` and return the logits of the last position, `[batch, vocab]`.
    pub fn forward(&self, input_ids: &Tensor, cache: &mut Gpt2Cache) -> Result<Tensor> {
        let (_b, t) = input_ids.dims2()?;
        let offset = cache.seq_len();
        if offset + t > self.config.n_positions {
            candle_core::bail!(
                "sequence of {} positions exceeds the context window of {}",
                offset + t,
                self.config.n_positions
            );
        }

        let positions = Tensor::arange(offset as u32, (offset + t) as u32, &self.device)?;
        let mut x = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;

        let mask = if t > 1 {
            Some(causal_mask(t, offset, &self.device)?)
        } else {
            None
        };

        for (block, layer_cache) in self.blocks.iter().zip(cache.layers.iter_mut()) {
            x = block.forward(&x, layer_cache, mask.as_ref())?;
        }

        let last = self.ln_f.forward(&x)?.narrow(1, t - 1, 1)?.squeeze(1)?;
        self.lm_head.forward(&last)?.to_dtype(DType::F32)
    }
}

/// `[t, offset + t]` additive mask hiding future positions.
fn causal_mask(t: usize, offset: usize, device: &Device) -> Result<Tensor> {
    let total = offset + t;
    let values: Vec<f32> = (0..t)
        .flat_map(|i| {
            (0..total).map(move |j| {
                if j > offset + i {
                    f32::NEG_INFINITY
                } else {
                    0.0
                }
            })
        })
        .collect();
    Tensor::from_vec(values, (t, total), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> Gpt2Config {
        Gpt2Config {
            vocab_size: 8,
            n_positions: 16,
            n_embd: 4,
            n_layer: 2,
            n_head: 2,
            layer_norm_epsilon: 1e-5,
            eos_token_id: Some(7),
        }
    }

    fn tiny_model() -> Gpt2Model {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        Gpt2Model::load(vb, &tiny_config()).unwrap()
    }

    #[test]
    fn test_config_from_json() {
        let config = Gpt2Config::from_json(
            r#"{
                "vocab_size": 50257,
                "n_ctx": 1024,
                "n_positions": 1024,
                "n_embd": 768,
                "n_layer": 12,
                "n_head": 12,
                "layer_norm_epsilon": 1e-5,
                "eos_token_id": 50256,
                "activation_function": "gelu_new"
            }"#,
        )
        .unwrap();
        assert_eq!(config.n_positions, 1024);
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.eos_token_id, Some(50256));
    }

    #[test]
    fn test_forward_shapes_with_cache() -> Result<()> {
        let model = tiny_model();
        let mut cache = Gpt2Cache::new(model.config());

        let prompt = Tensor::new(&[[1u32, 2, 3], [1, 2, 3]], &Device::Cpu)?;
        let logits = model.forward(&prompt, &mut cache)?;
        assert_eq!(logits.dims(), &[2, 8]);
        assert_eq!(cache.seq_len(), 3);

        let next = Tensor::new(&[[4u32], [5]], &Device::Cpu)?;
        let logits = model.forward(&next, &mut cache)?;
        assert_eq!(logits.dims(), &[2, 8]);
        assert_eq!(cache.seq_len(), 4);
        Ok(())
    }

    #[test]
    fn test_forward_rejects_overlong_sequence() {
        let model = tiny_model();
        let mut cache = Gpt2Cache::new(model.config());
        let ids = Tensor::zeros((1, 17), DType::U32, &Device::Cpu).unwrap();
        assert!(model.forward(&ids, &mut cache).is_err());
    }

    #[test]
    fn test_causal_mask_layout() -> Result<()> {
        let mask = causal_mask(2, 1, &Device::Cpu)?.to_vec2::<f32>()?;
        assert_eq!(mask[0], vec![0.0, 0.0, f32::NEG_INFINITY]);
        assert_eq!(mask[1], vec![0.0, 0.0, 0.0]);
        Ok(())
    }
}
