//! Representation heads decoding interleaved modality sequences.
use crate::{
    model::Head,
    pos_embed::sincos_1d_tensor,
    transformer::{causal_mask, Transformer},
};
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::{
    batch_norm, embedding, layer_norm, linear, BatchNorm, Embedding, Init, LayerNorm, Linear, Module,
    ModuleT, VarBuilder,
};
use log::info;
use serde::{Deserialize, Serialize};
use ssrl_core::SsrlError;
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
    str::FromStr,
};

/// Which modalities a sequence carries.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    /// `(o_1, o_2, ...)`.
    Video,

    /// `(o_1, a_1, o_2, a_2, ...)`.
    Demonstration,

    /// `(o_1, a_1, r_1, R_1, o_2, ...)`.
    Trajectory,
}

impl DatasetType {
    /// Number of interleaved tokens per time step.
    pub fn multiplier(&self) -> usize {
        match self {
            Self::Video => 1,
            Self::Demonstration => 2,
            Self::Trajectory => 4,
        }
    }
}

impl FromStr for DatasetType {
    type Err = SsrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(Self::Video),
            "demonstration" => Ok(Self::Demonstration),
            "trajectory" => Ok(Self::Trajectory),
            _ => Err(SsrlError::config(format!("Unknown dataset type: {}", s))),
        }
    }
}

/// Per-modality streams.
///
/// As input of [`Head::decode`], `obs` is `(n, t, d)`, `act` holds action
/// ids `(n, t)`, and `rew`, `rtg` are `(n, t)` floats. As output, `act` holds
/// logits `(n, t, action_size)` and `rew`, `rtg` are `(n, t)` predictions.
#[derive(Debug, Clone)]
pub struct Modalities {
    pub obs: Tensor,
    pub act: Option<Tensor>,
    pub rew: Option<Tensor>,
    pub rtg: Option<Tensor>,
}

impl Modalities {
    /// Observation stream only.
    pub fn from_obs(obs: Tensor) -> Self {
        Self {
            obs,
            act: None,
            rew: None,
            rtg: None,
        }
    }

    /// Sets the action stream.
    pub fn act(mut self, act: Tensor) -> Self {
        self.act = Some(act);
        self
    }

    /// Sets the reward and return-to-go streams.
    pub fn rew_rtg(mut self, rew: Tensor, rtg: Tensor) -> Self {
        self.rew = Some(rew);
        self.rtg = Some(rtg);
        self
    }
}

fn require<'a>(x: &'a Option<Tensor>, name: &str, (n, t): (usize, usize)) -> Result<&'a Tensor> {
    match x {
        None => Err(SsrlError::shape(format!("modality {} is missing", name)).into()),
        Some(x) if x.dims().len() < 2 || x.dims()[..2] != [n, t] => Err(SsrlError::shape(format!(
            "modality {} must start with ({}, {}), got {:?}",
            name,
            n,
            t,
            x.dims()
        ))
        .into()),
        Some(x) => Ok(x),
    }
}

/// Tokens at `stride * i + offset` for `i` in `0..t`.
fn select(x: &Tensor, t: usize, stride: usize, offset: usize) -> Result<Tensor> {
    let ids = (0..t).map(|i| (stride * i + offset) as u32).collect::<Vec<_>>();
    let ids = Tensor::from_vec(ids, (t,), x.device())?;
    Ok(x.index_select(&ids, 1)?)
}

/// Parameters shared by the head variants.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct HeadParams {
    /// Number of discrete actions.
    pub action_size: usize,

    /// Width of the backbone features.
    pub in_dim: usize,

    /// Width of the head.
    pub proj_dim: usize,

    /// Depth of the causal decoder.
    pub dec_num_layers: usize,

    /// Attention heads of the causal decoder.
    pub dec_heads: usize,

    /// Feed-forward width of the causal decoder.
    pub dec_mlp_dim: usize,

    /// Dropout of the causal decoder.
    pub dropout: f32,
}

impl Default for HeadParams {
    fn default() -> Self {
        Self {
            action_size: 18,
            in_dim: 128,
            proj_dim: 128,
            dec_num_layers: 1,
            dec_heads: 2,
            dec_mlp_dim: 256,
            dropout: 0.0,
        }
    }
}

impl HeadParams {
    /// Sets the number of actions.
    pub fn action_size(mut self, v: usize) -> Self {
        self.action_size = v;
        self
    }

    /// Sets the input and head widths.
    pub fn dims(mut self, in_dim: usize, proj_dim: usize) -> Self {
        self.in_dim = in_dim;
        self.proj_dim = proj_dim;
        self
    }

    /// Sets depth, heads and feed-forward width of the decoder.
    pub fn decoder(mut self, num_layers: usize, heads: usize, mlp_dim: usize) -> Self {
        self.dec_num_layers = num_layers;
        self.dec_heads = heads;
        self.dec_mlp_dim = mlp_dim;
        self
    }
}

/// Selects a head variant.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum HeadConfig {
    Clt(HeadParams),
    Mlr(HeadParams),
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self::Mlr(HeadParams::default())
    }
}

impl HeadConfig {
    /// Parameters of the selected variant.
    pub fn params(&self) -> &HeadParams {
        match self {
            Self::Clt(p) | Self::Mlr(p) => p,
        }
    }

    /// Builds the selected head.
    pub fn build(&self, vb: VarBuilder) -> Result<AnyHead> {
        Ok(match self {
            Self::Clt(p) => AnyHead::Clt(CltHead::build(vb, p)?),
            Self::Mlr(p) => AnyHead::Mlr(MlrHead::build(vb, p)?),
        })
    }

    /// Constructs [`HeadConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of head from {}", path_.to_str().unwrap_or_default());
        Ok(b)
    }

    /// Saves [`HeadConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of head into {}", path_.to_str().unwrap_or_default());
        Ok(())
    }
}

/// Causal transformer over interleaved modality tokens.
pub struct CausalDecoder {
    transformer: Transformer,
    norm: LayerNorm,
}

impl CausalDecoder {
    fn build(vb: VarBuilder, p: &HeadParams) -> Result<Self> {
        Ok(Self {
            transformer: Transformer::build(
                vb.pp("transformer"),
                p.proj_dim,
                p.dec_num_layers,
                p.dec_heads,
                p.dec_mlp_dim,
                p.dropout,
            )?,
            norm: layer_norm(p.proj_dim, 1e-5, vb.pp("norm"))?,
        })
    }

    /// Interleaves `streams`, each `(n, t, d)`, into `(n, t * k, d)` and
    /// decodes it with a full causal mask.
    pub fn forward(&self, streams: &[&Tensor], train: bool) -> Result<Tensor> {
        let first = streams
            .first()
            .ok_or_else(|| SsrlError::shape("no stream to decode"))?;
        let (n, t, d) = first.dims3()?;
        if let Some(s) = streams.iter().find(|s| s.dims() != [n, t, d]) {
            return Err(SsrlError::shape(format!(
                "streams must share shape {:?}, got {:?}",
                (n, t, d),
                s.dims()
            ))
            .into());
        }
        let len = t * streams.len();
        let device = first.device();

        let x = Tensor::stack(streams, 2)?.reshape((n, len, d))?;
        let x = x.broadcast_add(&sincos_1d_tensor(d, len, device)?)?;
        let mask = causal_mask(n, len, device)?;
        let x = self.transformer.forward(&x, Some(&mask), train)?;
        Ok(self.norm.forward(&x)?)
    }
}

/// `Linear → BatchNorm1d → ReLU → Linear`, applied to rows.
struct BnMlp {
    fc1: Linear,
    bn: BatchNorm,
    fc2: Linear,
}

impl BnMlp {
    fn build(vb: VarBuilder, dim: usize) -> Result<Self> {
        Ok(Self {
            fc1: linear(dim, dim, vb.pp("fc1"))?,
            bn: batch_norm(dim, 1e-5, vb.pp("bn"))?,
            fc2: linear(dim, dim, vb.pp("fc2"))?,
        })
    }

    /// `(n, t, d) -> (n, t, d)` through `(n * t, d)`.
    fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (n, t, d) = x.dims3()?;
        let x = self.fc1.forward(&x.reshape((n * t, d))?)?;
        let x = self.bn.forward_t(&x, train)?.relu()?;
        let x = self.fc2.forward(&x)?;
        let d = x.dim(1)?;
        Ok(x.reshape((n, t, d))?)
    }

    /// As `forward` in training mode, but the running statistics of the
    /// batch norm are left as they are.
    fn forward_batch_stats(&self, x: &Tensor) -> Result<Tensor> {
        let (n, t, d) = x.dims3()?;
        let x = self.fc1.forward(&x.reshape((n * t, d))?)?;
        let xc = x.broadcast_sub(&x.mean_keepdim(0)?)?;
        let var = xc.sqr()?.mean_keepdim(0)?;
        let mut x = xc.broadcast_div(&(var + self.bn.eps())?.sqrt()?)?;
        if let Some((w, b)) = self.bn.weight_and_bias() {
            x = x.broadcast_mul(w)?.broadcast_add(b)?;
        }
        let x = self.fc2.forward(&x.relu()?)?;
        let d = x.dim(1)?;
        Ok(x.reshape((n, t, d))?)
    }
}

/// `Linear → ReLU → Linear`.
struct Mlp {
    fc1: Linear,
    fc2: Linear,
}

impl Mlp {
    fn build(vb: VarBuilder, in_dim: usize, hidden_dim: usize, out_dim: usize) -> Result<Self> {
        Ok(Self {
            fc1: linear(in_dim, hidden_dim, vb.pp("fc1"))?,
            fc2: linear(hidden_dim, out_dim, vb.pp("fc2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.fc2.forward(&self.fc1.forward(x)?.relu()?)?)
    }
}

/// Input projection shared by both heads.
struct ObsIn {
    obs_in: Linear,
    dec_norm: LayerNorm,
}

impl ObsIn {
    fn build(vb: &VarBuilder, p: &HeadParams) -> Result<Self> {
        Ok(Self {
            obs_in: linear(p.in_dim, p.proj_dim, vb.pp("obs_in"))?,
            dec_norm: layer_norm(p.proj_dim, 1e-5, vb.pp("dec_norm"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.dec_norm.forward(&self.obs_in.forward(x)?)?)
    }
}

/// Head predicting the next modality token of a causal sequence.
///
/// Observations always pass the input projection, also when `in_dim`
/// equals `proj_dim`, so that [`Head::decode`] and [`Head::obs_to_latent`]
/// see the same latents.
pub struct CltHead {
    obs_in: ObsIn,
    act_in: Embedding,
    rew_in: Linear,
    rtg_in: Linear,
    decoder: CausalDecoder,
    projector: BnMlp,
    predictor: BnMlp,
    act_predictor: Mlp,
    rew_predictor: Mlp,
    rtg_predictor: Mlp,
}

impl CltHead {
    /// Builds the head.
    pub fn build(vb: VarBuilder, p: &HeadParams) -> Result<Self> {
        let d = p.proj_dim;
        Ok(Self {
            obs_in: ObsIn::build(&vb, p)?,
            act_in: embedding(p.action_size, d, vb.pp("act_in"))?,
            rew_in: linear(1, d, vb.pp("rew_in"))?,
            rtg_in: linear(1, d, vb.pp("rtg_in"))?,
            decoder: CausalDecoder::build(vb.pp("decoder"), p)?,
            projector: BnMlp::build(vb.pp("projector"), d)?,
            predictor: BnMlp::build(vb.pp("predictor"), d)?,
            act_predictor: Mlp::build(vb.pp("act_predictor"), d, d, p.action_size)?,
            rew_predictor: Mlp::build(vb.pp("rew_predictor"), d, d, 1)?,
            rtg_predictor: Mlp::build(vb.pp("rtg_predictor"), d, d, 1)?,
        })
    }
}

impl Head for CltHead {
    fn decode(&self, x: &Modalities, dataset_type: DatasetType, train: bool) -> Result<Modalities> {
        let (n, t, _) = x.obs.dims3()?;
        let obs = self.obs_in.forward(&x.obs)?;
        let scalar_in = |layer: &Linear, v: &Tensor| -> Result<Tensor> {
            Ok(layer.forward(&v.to_dtype(obs.dtype())?.unsqueeze(D::Minus1)?)?)
        };

        match dataset_type {
            DatasetType::Video => {
                let y = self.decoder.forward(&[&obs], train)?;
                Ok(Modalities::from_obs(y))
            }
            DatasetType::Demonstration => {
                let act = self.act_in.forward(require(&x.act, "act", (n, t))?)?;
                let y = self.decoder.forward(&[&obs, &act], train)?;
                Ok(Modalities::from_obs(select(&y, t, 2, 1)?)
                    .act(self.act_predictor.forward(&select(&y, t, 2, 0)?)?))
            }
            DatasetType::Trajectory => {
                let act = self.act_in.forward(require(&x.act, "act", (n, t))?)?;
                let rew = scalar_in(&self.rew_in, require(&x.rew, "rew", (n, t))?)?;
                let rtg = scalar_in(&self.rtg_in, require(&x.rtg, "rtg", (n, t))?)?;
                let y = self.decoder.forward(&[&obs, &act, &rew, &rtg], train)?;

                let rew = self
                    .rew_predictor
                    .forward(&select(&y, t, 4, 1)?)?
                    .tanh()?
                    .squeeze(D::Minus1)?;
                let rtg = self
                    .rtg_predictor
                    .forward(&select(&y, t, 4, 2)?)?
                    .squeeze(D::Minus1)?;
                Ok(Modalities::from_obs(select(&y, t, 4, 3)?)
                    .act(self.act_predictor.forward(&select(&y, t, 4, 0)?)?)
                    .rew_rtg(rew, rtg))
            }
        }
    }

    fn obs_to_latent(&self, x: &Tensor) -> Result<Tensor> {
        self.obs_in.forward(x)
    }

    fn project(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        self.projector.forward(x, train)
    }

    fn project_target(&self, x: &Tensor) -> Result<Tensor> {
        self.projector.forward_batch_stats(x)
    }

    fn predict(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        self.predictor.forward(x, train)
    }
}

/// Head reconstructing masked observation latents from
/// `(o_1, a_1, o_2, a_2, ...)`.
pub struct MlrHead {
    mask_token: Tensor,
    obs_in: ObsIn,
    act_in: Embedding,
    decoder: CausalDecoder,
    projector: BnMlp,
    predictor: BnMlp,
}

impl MlrHead {
    /// Builds the head.
    pub fn build(vb: VarBuilder, p: &HeadParams) -> Result<Self> {
        let d = p.proj_dim;
        Ok(Self {
            mask_token: vb.get_with_hints((1, 1, d), "mask_token", Init::Const(0.0))?,
            obs_in: ObsIn::build(&vb, p)?,
            act_in: embedding(p.action_size, d, vb.pp("act_in"))?,
            decoder: CausalDecoder::build(vb.pp("decoder"), p)?,
            projector: BnMlp::build(vb.pp("projector"), d)?,
            predictor: BnMlp::build(vb.pp("predictor"), d)?,
        })
    }

    /// Placeholder `(1, 1, proj_dim)` for masked latents.
    pub fn mask_token(&self) -> &Tensor {
        &self.mask_token
    }

    /// Decodes head-width latents `(n, t, proj_dim)` with action ids `(n, t)`
    /// and returns the tokens at the observation positions.
    pub fn decode_latent(&self, obs: &Tensor, act: &Tensor, train: bool) -> Result<Tensor> {
        let (n, t, _) = obs.dims3()?;
        if act.dims() != [n, t] {
            return Err(SsrlError::shape(format!(
                "actions must be ({}, {}), got {:?}",
                n,
                t,
                act.dims()
            ))
            .into());
        }
        let act = self.act_in.forward(act)?;
        let y = self.decoder.forward(&[obs, &act], train)?;
        select(&y, t, 2, 0)
    }
}

impl Head for MlrHead {
    fn decode(&self, x: &Modalities, dataset_type: DatasetType, train: bool) -> Result<Modalities> {
        if dataset_type != DatasetType::Demonstration {
            return Err(SsrlError::config(format!(
                "mlr head decodes demonstrations only, got {:?}",
                dataset_type
            ))
            .into());
        }
        let (n, t, _) = x.obs.dims3()?;
        let act = require(&x.act, "act", (n, t))?;
        let obs = self.obs_in.forward(&x.obs)?;
        Ok(Modalities::from_obs(self.decode_latent(&obs, act, train)?))
    }

    fn obs_to_latent(&self, x: &Tensor) -> Result<Tensor> {
        self.obs_in.forward(x)
    }

    fn project(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        self.projector.forward(x, train)
    }

    fn project_target(&self, x: &Tensor) -> Result<Tensor> {
        self.projector.forward_batch_stats(x)
    }

    fn predict(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        self.predictor.forward(x, train)
    }
}

/// Enum dispatcher over the head variants.
pub enum AnyHead {
    Clt(CltHead),
    Mlr(MlrHead),
}

impl Head for AnyHead {
    fn decode(&self, x: &Modalities, dataset_type: DatasetType, train: bool) -> Result<Modalities> {
        match self {
            Self::Clt(h) => h.decode(x, dataset_type, train),
            Self::Mlr(h) => h.decode(x, dataset_type, train),
        }
    }

    fn obs_to_latent(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Clt(h) => h.obs_to_latent(x),
            Self::Mlr(h) => h.obs_to_latent(x),
        }
    }

    fn project(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Clt(h) => h.project(x, train),
            Self::Mlr(h) => h.project(x, train),
        }
    }

    fn project_target(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Clt(h) => h.project_target(x),
            Self::Mlr(h) => h.project_target(x),
        }
    }

    fn predict(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Clt(h) => h.predict(x, train),
            Self::Mlr(h) => h.predict(x, train),
        }
    }
}
