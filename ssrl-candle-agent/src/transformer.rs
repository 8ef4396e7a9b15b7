//! Pre-norm transformer blocks.
use anyhow::Result;
use candle_core::{ModuleT, Tensor, D};
use candle_nn::{
    layer_norm, linear, linear_no_bias, ops::softmax, Dropout, LayerNorm, Linear, Module, VarBuilder,
};
use ssrl_core::SsrlError;

/// Value written to forbidden attention logits.
const MASK_VALUE: f32 = -1e9;

/// Multi-head self-attention.
pub struct Attention {
    to_qkv: Linear,
    to_out: Linear,
    heads: usize,
    scale: f64,
    dropout: Dropout,
}

impl Attention {
    /// Builds the layer. `dim` must be divisible by `heads`.
    pub fn build(vb: VarBuilder, dim: usize, heads: usize, dropout: f32) -> Result<Self> {
        if heads == 0 || dim % heads != 0 {
            return Err(SsrlError::config(format!("width {} is not divisible by {} heads", dim, heads)).into());
        }
        Ok(Self {
            to_qkv: linear_no_bias(dim, dim * 3, vb.pp("to_qkv"))?,
            to_out: linear(dim, dim, vb.pp("to_out"))?,
            heads,
            scale: ((dim / heads) as f64).powf(-0.5),
            dropout: Dropout::new(dropout),
        })
    }

    /// `x` is `(n, t, dim)`; `attn_mask` is `(n, t, t)` `u8` with 1 at
    /// forbidden (query, key) pairs.
    pub fn forward(&self, x: &Tensor, attn_mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let (n, t, dim) = x.dims3()?;
        let h = self.heads;
        let qkv = self.to_qkv.forward(x)?.chunk(3, D::Minus1)?;
        let split = |t_: &Tensor| -> Result<Tensor> {
            Ok(t_
                .reshape((n, t, h, dim / h))?
                .transpose(1, 2)?
                .contiguous()?)
        };
        let (q, k, v) = (split(&qkv[0])?, split(&qkv[1])?, split(&qkv[2])?);

        let dots = (q.matmul(&k.t()?.contiguous()?)? * self.scale)?;
        let dots = match attn_mask {
            Some(mask) => {
                let mask = mask.unsqueeze(1)?.broadcast_as((n, h, t, t))?.contiguous()?;
                let fill = Tensor::new(MASK_VALUE, x.device())?
                    .to_dtype(dots.dtype())?
                    .broadcast_as((n, h, t, t))?;
                mask.where_cond(&fill, &dots)?
            }
            None => dots,
        };

        let attn = softmax(&dots, D::Minus1)?;
        let attn = self.dropout.forward_t(&attn, train)?;
        let out = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((n, t, dim))?;
        let out = self.to_out.forward(&out)?;
        Ok(self.dropout.forward_t(&out, train)?)
    }
}

/// Position-wise feed-forward sublayer.
pub struct FeedForward {
    fc1: Linear,
    fc2: Linear,
    dropout: Dropout,
}

impl FeedForward {
    /// Builds the layer.
    pub fn build(vb: VarBuilder, dim: usize, hidden_dim: usize, dropout: f32) -> Result<Self> {
        Ok(Self {
            fc1: linear(dim, hidden_dim, vb.pp("fc1"))?,
            fc2: linear(hidden_dim, dim, vb.pp("fc2"))?,
            dropout: Dropout::new(dropout),
        })
    }

    /// Applies `Linear → GELU → Dropout → Linear → Dropout`.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.fc1.forward(x)?.gelu_erf()?;
        let x = self.dropout.forward_t(&x, train)?;
        let x = self.fc2.forward(&x)?;
        Ok(self.dropout.forward_t(&x, train)?)
    }
}

struct Block {
    attn_norm: LayerNorm,
    attn: Attention,
    ff_norm: LayerNorm,
    ff: FeedForward,
}

/// Stack of pre-norm attention and feed-forward blocks with residuals.
pub struct Transformer {
    blocks: Vec<Block>,
}

impl Transformer {
    /// Builds `depth` blocks of width `dim`.
    pub fn build(
        vb: VarBuilder,
        dim: usize,
        depth: usize,
        heads: usize,
        mlp_dim: usize,
        dropout: f32,
    ) -> Result<Self> {
        let blocks = (0..depth)
            .map(|i| {
                let vb = vb.pp(format!("layers.{}", i));
                Ok(Block {
                    attn_norm: layer_norm(dim, 1e-5, vb.pp("attn_norm"))?,
                    attn: Attention::build(vb.pp("attn"), dim, heads, dropout)?,
                    ff_norm: layer_norm(dim, 1e-5, vb.pp("ff_norm"))?,
                    ff: FeedForward::build(vb.pp("ff"), dim, mlp_dim, dropout)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    /// Forward pass over `(n, t, dim)`.
    pub fn forward(&self, x: &Tensor, attn_mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let mut x = x.clone();
        for b in self.blocks.iter() {
            let y = b.attn.forward(&b.attn_norm.forward(&x)?, attn_mask, train)?;
            x = (x + y)?;
            let y = b.ff.forward(&b.ff_norm.forward(&x)?, train)?;
            x = (x + y)?;
        }
        Ok(x)
    }

    /// Number of blocks.
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }
}

/// Lower-triangular causal mask `(n, len, len)`, 1 above the diagonal.
pub fn causal_mask(n: usize, len: usize, device: &candle_core::Device) -> Result<Tensor> {
    let data = (0..len)
        .flat_map(|i| (0..len).map(move |j| (j > i) as u8))
        .collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, (1, len, len), device)?
        .broadcast_as((n, len, len))?
        .contiguous()?)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(dim: usize, heads: usize) -> Result<(VarMap, Transformer)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let tr = Transformer::build(vb, dim, 2, heads, 16, 0.0)?;
        Ok((varmap, tr))
    }

    #[test]
    fn test_shape_is_preserved() -> Result<()> {
        let (_vm, tr) = build(8, 2)?;
        let x = Tensor::randn(0f32, 1.0, (3, 5, 8), &Device::Cpu)?;
        let y = tr.forward(&x, None, false)?;
        assert_eq!(y.dims(), &[3, 5, 8]);
        assert_eq!(tr.depth(), 2);
        Ok(())
    }

    #[test]
    fn test_heads_must_divide_width() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(Transformer::build(vb, 10, 1, 3, 16, 0.0).is_err());
    }

    #[test]
    fn test_causal_mask_blocks_future() -> Result<()> {
        // With a causal mask, the output at a position does not depend on
        // later positions.
        let (_vm, tr) = build(8, 2)?;
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1.0, (1, 4, 8), &device)?;
        let x2 = Tensor::cat(&[x.narrow(1, 0, 2)?, Tensor::randn(0f32, 1.0, (1, 2, 8), &device)?], 1)?;
        let mask = causal_mask(1, 4, &device)?;

        let y1 = tr.forward(&x, Some(&mask), false)?.narrow(1, 0, 2)?;
        let y2 = tr.forward(&x2, Some(&mask), false)?.narrow(1, 0, 2)?;
        let diff = (y1 - y2)?.abs()?.max_keepdim(2)?.max_keepdim(1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(diff[0] < 1e-5);
        Ok(())
    }

    #[test]
    fn test_dropout_only_in_training() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let ff = FeedForward::build(vb, 8, 16, 0.5)?;
        let x = Tensor::randn(0f32, 1.0, (2, 3, 8), &Device::Cpu)?;
        let a = ff.forward(&x, false)?;
        let b = ff.forward(&x, false)?;
        let diff = (&a - b)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);

        let c = ff.forward(&x, true)?;
        let diff = (a - c)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert!(diff > 0.0);
        Ok(())
    }

    #[test]
    fn test_forbidden_keys_are_ignored() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attn = Attention::build(vb, 8, 2, 0.0)?;
        let device = Device::Cpu;

        // token 1 is visible to itself only
        let mask = Tensor::new(
            &[[[0u8, 1, 0, 0], [0, 0, 0, 0], [0, 1, 0, 0], [1, 1, 0, 0]]],
            &device,
        )?;
        let x = Tensor::randn(0f32, 1.0, (1, 4, 8), &device)?;
        let noise = Tensor::randn(0f32, 10.0, (1, 1, 8), &device)?;
        let x2 = Tensor::cat(
            &[
                x.narrow(1, 0, 1)?,
                (x.narrow(1, 1, 1)? + noise)?,
                x.narrow(1, 2, 2)?,
            ],
            1,
        )?;

        let y1 = attn.forward(&x, Some(&mask), false)?;
        let y2 = attn.forward(&x2, Some(&mask), false)?;
        let diff = (y1 - y2)?.abs()?.max_keepdim(2)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(diff[0] < 1e-5 && diff[2] < 1e-5 && diff[3] < 1e-5);
        assert!(diff[1] > 1e-3);
        Ok(())
    }
}
