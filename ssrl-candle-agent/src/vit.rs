//! Masked-sequence ViT backbones.
//!
//! Observations `(n, t, frame, channel, height, width)` are cut into patches,
//! encoded with fixed spatial and temporal sin-cos embeddings and decoded
//! under a causal attention mask that does not look across episode
//! boundaries. [`VitKind::VitAction`] interleaves one action token after the
//! patches of every time step.
use crate::{
    mask::{gather_masked, patchify, scatter_restore, MaskTensors},
    model::{Backbone, BackboneMask, BackbonePrediction},
    pos_embed::{sincos_1d_tensor, sincos_2d_tensor},
    transformer::Transformer,
};
use anyhow::Result;
use candle_core::{DType, Device, ModuleT, Tensor};
use candle_nn::{embedding, layer_norm, linear, Dropout, Embedding, Init, LayerNorm, Linear, Module, VarBuilder};
use log::info;
use serde::{Deserialize, Serialize};
use ssrl_core::SsrlError;
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
    str::FromStr,
};

/// Variant of the backbone.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum VitKind {
    /// Patch tokens only.
    Vit,

    /// Patch tokens plus one action token per time step.
    VitAction,
}

/// Pooling of the patch tokens of a time step.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    /// Mean over patches.
    Mean,
}

impl FromStr for Pool {
    type Err = SsrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(Self::Mean),
            _ => Err(SsrlError::config(format!("Unsupported pooling: {}", s))),
        }
    }
}

/// Configuration of [`Vit`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct VitConfig {
    /// Variant.
    pub kind: VitKind,

    /// `(frame, channel, height, width)` of one time step.
    pub obs_shape: (usize, usize, usize, usize),

    /// Number of discrete actions.
    pub action_size: usize,

    /// `(height, width)` of a patch.
    pub patch_size: (usize, usize),

    /// Number of time steps in a sequence.
    pub t_step: usize,

    /// Pooling used by [`Vit::embed`].
    pub pool: Pool,

    /// Encoder depth.
    pub enc_depth: usize,

    /// Encoder width.
    pub enc_dim: usize,

    /// Encoder feed-forward width.
    pub enc_mlp_dim: usize,

    /// Encoder attention heads.
    pub enc_heads: usize,

    /// Decoder depth.
    pub dec_depth: usize,

    /// Decoder width.
    pub dec_dim: usize,

    /// Decoder feed-forward width.
    pub dec_mlp_dim: usize,

    /// Decoder attention heads.
    pub dec_heads: usize,

    /// Dropout on the embedded tokens.
    pub emb_dropout: f32,

    /// Dropout inside the transformer blocks.
    pub dropout: f32,
}

impl Default for VitConfig {
    fn default() -> Self {
        Self {
            kind: VitKind::Vit,
            obs_shape: (1, 4, 84, 84),
            action_size: 18,
            patch_size: (12, 12),
            t_step: 4,
            pool: Pool::Mean,
            enc_depth: 2,
            enc_dim: 128,
            enc_mlp_dim: 256,
            enc_heads: 2,
            dec_depth: 1,
            dec_dim: 128,
            dec_mlp_dim: 256,
            dec_heads: 2,
            emb_dropout: 0.0,
            dropout: 0.0,
        }
    }
}

impl VitConfig {
    /// Sets the variant.
    pub fn kind(mut self, v: VitKind) -> Self {
        self.kind = v;
        self
    }

    /// Sets `(frame, channel, height, width)`.
    pub fn obs_shape(mut self, v: (usize, usize, usize, usize)) -> Self {
        self.obs_shape = v;
        self
    }

    /// Sets the number of actions.
    pub fn action_size(mut self, v: usize) -> Self {
        self.action_size = v;
        self
    }

    /// Sets the patch size.
    pub fn patch_size(mut self, v: (usize, usize)) -> Self {
        self.patch_size = v;
        self
    }

    /// Sets the sequence length.
    pub fn t_step(mut self, v: usize) -> Self {
        self.t_step = v;
        self
    }

    /// Sets depth, width, feed-forward width and heads of the encoder.
    pub fn encoder(mut self, depth: usize, dim: usize, mlp_dim: usize, heads: usize) -> Self {
        self.enc_depth = depth;
        self.enc_dim = dim;
        self.enc_mlp_dim = mlp_dim;
        self.enc_heads = heads;
        self
    }

    /// Sets depth, width, feed-forward width and heads of the decoder.
    pub fn decoder(mut self, depth: usize, dim: usize, mlp_dim: usize, heads: usize) -> Self {
        self.dec_depth = depth;
        self.dec_dim = dim;
        self.dec_mlp_dim = mlp_dim;
        self.dec_heads = heads;
        self
    }

    /// Sets the dropout probabilities.
    pub fn dropout(mut self, emb_dropout: f32, dropout: f32) -> Self {
        self.emb_dropout = emb_dropout;
        self.dropout = dropout;
        self
    }

    /// Patch grid `(height / ph, width / pw)`.
    pub fn grid(&self) -> (usize, usize) {
        let (_, _, h, w) = self.obs_shape;
        let (ph, pw) = self.patch_size;
        (h / ph, w / pw)
    }

    /// Number of patches per time step.
    pub fn num_patches(&self) -> usize {
        let (nh, nw) = self.grid();
        nh * nw
    }

    /// Length of a flattened patch.
    pub fn patch_dim(&self) -> usize {
        let (f, c, _, _) = self.obs_shape;
        let (ph, pw) = self.patch_size;
        f * c * ph * pw
    }

    /// Checks shape divisibility.
    pub fn validate(&self) -> Result<()> {
        let (_, _, h, w) = self.obs_shape;
        let (ph, pw) = self.patch_size;
        if ph == 0 || pw == 0 || h % ph != 0 || w % pw != 0 {
            return Err(SsrlError::config(format!(
                "Image {}x{} must be divisible by the patch size {}x{}",
                h, w, ph, pw
            ))
            .into());
        }
        if self.t_step == 0 {
            return Err(SsrlError::config("t_step must be positive").into());
        }
        for (name, dim, heads) in [
            ("encoder", self.enc_dim, self.enc_heads),
            ("decoder", self.dec_dim, self.dec_heads),
        ] {
            if dim % 4 != 0 {
                return Err(SsrlError::config(format!("{} width {} must be divisible by 4", name, dim)).into());
            }
            if heads == 0 || dim % heads != 0 {
                return Err(SsrlError::config(format!(
                    "{} width {} must be divisible by {} heads",
                    name, dim, heads
                ))
                .into());
            }
        }
        if self.kind == VitKind::VitAction && self.action_size == 0 {
            return Err(SsrlError::config("action_size must be positive").into());
        }
        Ok(())
    }

    /// Constructs [`VitConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of ViT from {}", path_.to_str().unwrap_or_default());
        Ok(b)
    }

    /// Saves [`VitConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of ViT into {}", path_.to_str().unwrap_or_default());
        Ok(())
    }
}

struct ActionTokens {
    embed: Embedding,
    mask_token: Tensor,
    pred: Linear,
}

/// Encoder-decoder transformer over patch sequences.
pub struct Vit {
    config: VitConfig,
    num_patches: usize,

    patch_embed: Linear,
    enc_pos: Tensor,
    emb_dropout: Dropout,
    encoder: Transformer,
    enc_norm: LayerNorm,

    decoder_embed: Linear,
    patch_mask_token: Tensor,
    dec_pos: Tensor,
    dec_temporal: Tensor,
    decoder: Transformer,
    dec_norm: LayerNorm,
    patch_pred: Linear,

    act: Option<ActionTokens>,
}

/// Spatial embedding repeated over time plus temporal embedding repeated over patches.
fn spatiotemporal_embed(dim: usize, grid: (usize, usize), t: usize, device: &Device) -> Result<Tensor> {
    let p = grid.0 * grid.1;
    let spatial = sincos_2d_tensor(dim, grid, device)?.repeat((1, t, 1))?;
    let temporal = sincos_1d_tensor(dim, t, device)?
        .unsqueeze(2)?
        .broadcast_as((1, t, p, dim))?
        .reshape((1, t * p, dim))?;
    Ok((spatial + temporal)?)
}

impl Vit {
    /// Builds the backbone, failing with [`SsrlError::Config`] on invalid shapes.
    pub fn build(vb: VarBuilder, config: VitConfig) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();
        let grid = config.grid();
        let num_patches = config.num_patches();
        let patch_dim = config.patch_dim();
        let t = config.t_step;
        let (enc_dim, dec_dim) = (config.enc_dim, config.dec_dim);
        let token_init = Init::Randn {
            mean: 0.0,
            stdev: 0.02,
        };

        let act = match config.kind {
            VitKind::Vit => None,
            VitKind::VitAction => Some(ActionTokens {
                embed: embedding(config.action_size, dec_dim, vb.pp("act_embed"))?,
                mask_token: vb.get_with_hints((1, 1, dec_dim), "act_mask_token", token_init)?,
                pred: linear(dec_dim, config.action_size, vb.pp("act_pred"))?,
            }),
        };

        Ok(Self {
            num_patches,
            patch_embed: linear(patch_dim, enc_dim, vb.pp("patch_embed"))?,
            enc_pos: spatiotemporal_embed(enc_dim, grid, t, &device)?,
            emb_dropout: Dropout::new(config.emb_dropout),
            encoder: Transformer::build(
                vb.pp("encoder"),
                enc_dim,
                config.enc_depth,
                config.enc_heads,
                config.enc_mlp_dim,
                config.dropout,
            )?,
            enc_norm: layer_norm(enc_dim, 1e-5, vb.pp("enc_norm"))?,
            decoder_embed: linear(enc_dim, dec_dim, vb.pp("decoder_embed"))?,
            patch_mask_token: vb.get_with_hints((1, 1, dec_dim), "patch_mask_token", token_init)?,
            dec_pos: spatiotemporal_embed(dec_dim, grid, t, &device)?,
            dec_temporal: sincos_1d_tensor(dec_dim, t, &device)?,
            decoder: Transformer::build(
                vb.pp("decoder"),
                dec_dim,
                config.dec_depth,
                config.dec_heads,
                config.dec_mlp_dim,
                config.dropout,
            )?,
            dec_norm: layer_norm(dec_dim, 1e-5, vb.pp("dec_norm"))?,
            patch_pred: linear(dec_dim, patch_dim, vb.pp("patch_pred"))?,
            act,
            config,
        })
    }

    /// Configuration of the backbone.
    pub fn config(&self) -> &VitConfig {
        &self.config
    }

    /// Number of patches per time step.
    pub fn num_patches(&self) -> usize {
        self.num_patches
    }

    /// Number of decoder tokens per time step.
    pub fn tokens_per_step(&self) -> usize {
        match self.act {
            None => self.num_patches,
            Some(_) => self.num_patches + 1,
        }
    }

    /// Width of the flattened output of [`Vit::embed`].
    pub fn embed_dim(&self) -> usize {
        self.config.t_step * self.config.enc_dim
    }

    fn check_obs(&self, obs: &Tensor) -> Result<()> {
        let (f, c, h, w) = self.config.obs_shape;
        match obs.dims() {
            [_, t, f_, c_, h_, w_] if (*t, *f_, *c_, *h_, *w_) == (self.config.t_step, f, c, h, w) => Ok(()),
            dims => Err(SsrlError::shape(format!(
                "expected observations (n, {}, {}, {}, {}, {}), got {:?}",
                self.config.t_step, f, c, h, w, dims
            ))
            .into()),
        }
    }

    /// Scales pixel values in `[0, 255]` to `[0, 1]` and cuts them into patches.
    pub fn patchify(&self, obs: &Tensor) -> Result<Tensor> {
        self.check_obs(obs)?;
        let x = (obs.to_dtype(DType::F32)? / 255.0)?;
        patchify(&x, self.config.patch_size)
    }

    /// Encodes unmasked observations and pools the patch tokens of every
    /// time step into `(n, t_step, enc_dim)`.
    pub fn embed(&self, obs: &Tensor, train: bool) -> Result<Tensor> {
        self.embed_patches(&self.patchify(obs)?, train)
    }

    /// As [`Vit::embed`] for inputs already cut by [`Vit::patchify`].
    pub fn embed_patches(&self, patches: &Tensor, train: bool) -> Result<Tensor> {
        let (n, _, _) = patches.dims3()?;
        let y = self.encode(patches, None, train)?.reshape((
            n,
            self.config.t_step,
            self.num_patches,
            self.config.enc_dim,
        ))?;
        match self.config.pool {
            Pool::Mean => Ok(y.mean(2)?),
        }
    }
}

/// Attention mask of the decoder, `(n, t * tokens_per_step, t * tokens_per_step)`.
///
/// 1 forbids a (query, key) pair. Keys after the query are forbidden. For a
/// query at step `t_q`, let `b` be the latest step `<= t_q` with `done`; every
/// key at a step `<= b` is forbidden too, so the most recent episode boundary
/// dominates.
pub fn decoder_attn_mask(done: &Tensor, tokens_per_step: usize) -> Result<Tensor> {
    let (n, t) = done.dims2()?;
    let device = done.device().clone();
    let done = done.to_dtype(DType::F32)?.to_vec2::<f32>()?;
    let l = t * tokens_per_step;
    let mut data = Vec::with_capacity(n * l * l);

    for row in done.iter() {
        let mut last = Vec::with_capacity(t);
        let mut cur = None;
        for (ti, d) in row.iter().enumerate() {
            if *d != 0.0 {
                cur = Some(ti);
            }
            last.push(cur);
        }

        for qi in 0..l {
            let boundary = last[qi / tokens_per_step];
            data.extend((0..l).map(|kj| {
                let forbid = kj > qi || boundary.map_or(false, |b| kj / tokens_per_step <= b);
                forbid as u8
            }));
        }
    }

    Ok(Tensor::from_vec(data, (n, l, l), &device)?)
}

impl Backbone for Vit {
    fn encode(&self, patches: &Tensor, mask: Option<&MaskTensors>, train: bool) -> Result<Tensor> {
        let (_, l, d) = patches.dims3()?;
        if l != self.config.t_step * self.num_patches || d != self.config.patch_dim() {
            return Err(SsrlError::shape(format!(
                "expected patches (n, {}, {}), got {:?}",
                self.config.t_step * self.num_patches,
                self.config.patch_dim(),
                patches.dims()
            ))
            .into());
        }

        let x = self.patch_embed.forward(patches)?.broadcast_add(&self.enc_pos)?;
        let x = match mask {
            Some(mask) => gather_masked(&x, &mask.ids_keep)?,
            None => x,
        };
        let x = self.emb_dropout.forward_t(&x, train)?;
        let x = self.encoder.forward(&x, None, train)?;
        Ok(self.enc_norm.forward(&x)?)
    }

    fn decode(
        &self,
        latent: &Tensor,
        done: &Tensor,
        mask: Option<&BackboneMask>,
        act: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let t = self.config.t_step;
        let p = self.num_patches;
        let d = self.config.dec_dim;

        let x = self.decoder_embed.forward(latent)?;
        let x = match mask {
            Some(mask) => scatter_restore(&x, &mask.patch.ids_restore, Some(&self.patch_mask_token))?,
            None => x,
        };
        let (n, l, _) = x.dims3()?;
        if l != t * p || done.dims() != [n, t] {
            return Err(SsrlError::shape(format!(
                "decoder expects {} tokens and done (n, {}), got {:?} and {:?}",
                t * p,
                t,
                x.dims(),
                done.dims()
            ))
            .into());
        }
        let x = x.broadcast_add(&self.dec_pos)?;

        let x = match &self.act {
            None => x,
            Some(tokens) => {
                let act = act.ok_or_else(|| SsrlError::shape("action tokens are required by vit_action"))?;
                let x_act = tokens.embed.forward(act)?;
                let x_act = match mask.and_then(|m| m.act.as_ref()) {
                    Some(m) => scatter_restore(
                        &gather_masked(&x_act, &m.ids_keep)?,
                        &m.ids_restore,
                        Some(&tokens.mask_token),
                    )?,
                    None => x_act,
                };
                let x_act = x_act.broadcast_add(&self.dec_temporal)?;
                Tensor::cat(&[x.reshape((n, t, p, d))?, x_act.unsqueeze(2)?], 2)?
                    .reshape((n, t * (p + 1), d))?
            }
        };

        let attn_mask = decoder_attn_mask(done, self.tokens_per_step())?;
        let x = self.emb_dropout.forward_t(&x, train)?;
        let x = self.decoder.forward(&x, Some(&attn_mask), train)?;
        Ok(self.dec_norm.forward(&x)?)
    }

    fn predict(&self, decoded: &Tensor) -> Result<BackbonePrediction> {
        match &self.act {
            None => Ok(BackbonePrediction {
                patch: self.patch_pred.forward(decoded)?,
                act: None,
            }),
            Some(tokens) => {
                let t = self.config.t_step;
                let p = self.num_patches;
                let device = decoded.device();
                let patch_ids = (0..t)
                    .flat_map(|ti| (0..p).map(move |pi| (ti * (p + 1) + pi) as u32))
                    .collect::<Vec<_>>();
                let act_ids = (0..t).map(|ti| (ti * (p + 1) + p) as u32).collect::<Vec<_>>();
                let patch_ids = Tensor::from_vec(patch_ids, (t * p,), device)?;
                let act_ids = Tensor::from_vec(act_ids, (t,), device)?;

                let x_patch = decoded.index_select(&patch_ids, 1)?;
                let x_act = decoded.index_select(&act_ids, 1)?;
                Ok(BackbonePrediction {
                    patch: self.patch_pred.forward(&x_patch)?,
                    act: Some(tokens.pred.forward(&x_act)?),
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mask::{random_mask, MaskShape, MaskStrategy};
    use candle_nn::VarMap;
    use rand::{rngs::SmallRng, SeedableRng};

    fn small_config(kind: VitKind) -> VitConfig {
        VitConfig::default()
            .kind(kind)
            .obs_shape((1, 2, 8, 8))
            .patch_size((4, 4))
            .action_size(3)
            .t_step(3)
            .encoder(1, 8, 16, 2)
            .decoder(1, 8, 16, 2)
    }

    fn build(config: VitConfig) -> Result<(VarMap, Vit)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let vit = Vit::build(vb, config)?;
        Ok((varmap, vit))
    }

    fn mask_rows(mask: &Tensor) -> Result<Vec<Vec<Vec<u8>>>> {
        Ok(mask.to_vec3::<u8>()?)
    }

    #[test]
    fn test_num_patches_of_atari_frames() -> Result<()> {
        let config = VitConfig::default().patch_size((7, 7));
        config.validate()?;
        assert_eq!(config.num_patches(), 144);
        assert_eq!(config.patch_dim(), 4 * 7 * 7);

        let err = VitConfig::default().patch_size((5, 5)).validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SsrlError>(),
            Some(SsrlError::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn test_unknown_pool_is_rejected() {
        assert_eq!("mean".parse::<Pool>().ok(), Some(Pool::Mean));
        assert!("cls".parse::<Pool>().is_err());
    }

    #[test]
    fn test_attn_mask_without_done_is_causal() -> Result<()> {
        let done = Tensor::zeros((1, 3), DType::F32, &Device::Cpu)?;
        let m = mask_rows(&decoder_attn_mask(&done, 2)?)?;
        for (i, row) in m[0].iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                assert_eq!(*v, (j > i) as u8);
            }
        }
        Ok(())
    }

    #[test]
    fn test_attn_mask_hides_previous_episode() -> Result<()> {
        // done at step 1: queries at steps 1 and 2 see nothing up to step 1.
        let done = Tensor::new(&[[0f32, 1., 0.]], &Device::Cpu)?;
        let m = mask_rows(&decoder_attn_mask(&done, 1)?)?;
        assert_eq!(m[0][0], vec![0, 1, 1]);
        assert_eq!(m[0][1], vec![1, 1, 1]);
        assert_eq!(m[0][2], vec![1, 1, 0]);
        Ok(())
    }

    #[test]
    fn test_attn_mask_latest_boundary_dominates() -> Result<()> {
        let done = Tensor::new(&[[1f32, 0., 1., 0.]], &Device::Cpu)?;
        let m = mask_rows(&decoder_attn_mask(&done, 1)?)?;
        assert_eq!(m[0][1], vec![1, 0, 1, 1]);
        assert_eq!(m[0][3], vec![1, 1, 1, 0]);
        Ok(())
    }

    #[test]
    fn test_masked_encode_decode_shapes() -> Result<()> {
        let (_vm, vit) = build(small_config(VitKind::Vit))?;
        let device = Device::Cpu;
        let obs = Tensor::rand(0f32, 255.0, (2, 3, 1, 2, 8, 8), &device)?;
        let patches = vit.patchify(&obs)?;
        assert_eq!(patches.dims(), &[2, 12, 32]);

        let mut rng = SmallRng::seed_from_u64(42);
        let shape = MaskShape {
            batch: 2,
            time: 3,
            num_patches: 4,
        };
        let mask = random_mask(shape, 0.5, MaskStrategy::Uniform, &mut rng)?.to_tensors(&device)?;
        let latent = vit.encode(&patches, Some(&mask), true)?;
        assert_eq!(latent.dims(), &[2, 6, 8]);

        let done = Tensor::zeros((2, 3), DType::F32, &device)?;
        let mask = BackboneMask {
            patch: mask,
            act: None,
        };
        let decoded = vit.decode(&latent, &done, Some(&mask), None, true)?;
        assert_eq!(decoded.dims(), &[2, 12, 8]);
        let pred = vit.predict(&decoded)?;
        assert_eq!(pred.patch.dims(), &[2, 12, 32]);
        assert!(pred.act.is_none());
        Ok(())
    }

    #[test]
    fn test_embed_pools_patches_per_step() -> Result<()> {
        let (_vm, vit) = build(small_config(VitKind::Vit))?;
        let obs = Tensor::rand(0f32, 255.0, (2, 3, 1, 2, 8, 8), &Device::Cpu)?;
        assert_eq!(vit.embed(&obs, false)?.dims(), &[2, 3, 8]);
        assert_eq!(vit.embed_dim(), 24);

        let bad = Tensor::zeros((2, 3, 1, 2, 8, 4), DType::F32, &Device::Cpu)?;
        assert!(vit.embed(&bad, false).is_err());
        Ok(())
    }

    #[test]
    fn test_action_tokens() -> Result<()> {
        let (_vm, vit) = build(small_config(VitKind::VitAction))?;
        let device = Device::Cpu;
        assert_eq!(vit.tokens_per_step(), 5);

        let obs = Tensor::rand(0f32, 255.0, (2, 3, 1, 2, 8, 8), &device)?;
        let latent = vit.encode(&vit.patchify(&obs)?, None, false)?;
        let done = Tensor::zeros((2, 3), DType::F32, &device)?;
        assert!(vit.decode(&latent, &done, None, None, false).is_err());

        let act = Tensor::new(&[[0u32, 1, 2], [2, 2, 0]], &device)?;
        let mut rng = SmallRng::seed_from_u64(0);
        let act_mask = random_mask(MaskShape::temporal(2, 3), 0.5, MaskStrategy::Uniform, &mut rng)?
            .to_tensors(&device)?;
        let patch_mask = random_mask(
            MaskShape {
                batch: 2,
                time: 3,
                num_patches: 4,
            },
            0.0,
            MaskStrategy::Uniform,
            &mut rng,
        )?
        .to_tensors(&device)?;
        let mask = BackboneMask {
            patch: patch_mask,
            act: Some(act_mask),
        };
        let decoded = vit.decode(&latent, &done, Some(&mask), Some(&act), false)?;
        assert_eq!(decoded.dims(), &[2, 15, 8]);

        let pred = vit.predict(&decoded)?;
        assert_eq!(pred.patch.dims(), &[2, 12, 32]);
        assert_eq!(pred.act.map(|a| a.dims().to_vec()), Some(vec![2, 3, 3]));
        Ok(())
    }
}
