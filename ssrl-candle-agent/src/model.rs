//! Interfaces of the neural networks composed by agents and trainers.
//!
//! Components do not own their [`VarMap`]. They are built from a
//! [`VarBuilder`] of the owner, so an online model and its target are two
//! independent var maps built from the same configuration.
//!
//! [`VarMap`]: candle_nn::VarMap
//! [`VarBuilder`]: candle_nn::VarBuilder
use crate::{head::{DatasetType, Modalities}, mask::MaskTensors};
use anyhow::Result;
use candle_core::Tensor;

/// Masks applied by a backbone.
#[derive(Debug, Clone)]
pub struct BackboneMask {
    /// Mask over the `time * num_patches` patch tokens.
    pub patch: MaskTensors,

    /// Mask over the `time` action tokens, used by action-conditioned backbones.
    pub act: Option<MaskTensors>,
}

/// Read-out of a backbone.
#[derive(Debug, Clone)]
pub struct BackbonePrediction {
    /// `(batch, time * num_patches, patch_dim)`.
    pub patch: Tensor,

    /// `(batch, time, action_size)`, only for action-conditioned backbones.
    pub act: Option<Tensor>,
}

/// Encoder-decoder over patch sequences.
pub trait Backbone {
    /// Encodes `(batch, time * num_patches, patch_dim)` patches.
    ///
    /// With `mask`, only the kept patches are encoded and the output has
    /// `n_keep` tokens.
    fn encode(&self, patches: &Tensor, mask: Option<&MaskTensors>, train: bool) -> Result<Tensor>;

    /// Decodes encoder output under the causal, episode-aware attention mask
    /// derived from `done` `(batch, time)`.
    fn decode(
        &self,
        latent: &Tensor,
        done: &Tensor,
        mask: Option<&BackboneMask>,
        act: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor>;

    /// Linear read-out of the decoded tokens.
    fn predict(&self, decoded: &Tensor) -> Result<BackbonePrediction>;
}

/// Representation head on top of a backbone.
pub trait Head {
    /// Interleaves the modality streams, decodes them causally and applies
    /// the per-modality prediction heads.
    fn decode(&self, x: &Modalities, dataset_type: DatasetType, train: bool) -> Result<Modalities>;

    /// Maps backbone features `(n, t, in_dim)` to the head width.
    fn obs_to_latent(&self, x: &Tensor) -> Result<Tensor>;

    /// Projector MLP, applied to head-width latents `(n, t, proj_dim)`.
    fn project(&self, x: &Tensor, train: bool) -> Result<Tensor>;

    /// Projector of a target branch: normalizes with batch statistics like
    /// `project(x, true)` without updating any running statistic.
    fn project_target(&self, x: &Tensor) -> Result<Tensor>;

    /// Predictor MLP, applied to the output of [`Head::project`].
    fn predict(&self, x: &Tensor, train: bool) -> Result<Tensor>;
}

/// Value network with factorised noise.
pub trait PolicyNet {
    /// Atom probabilities (or log-probabilities with `log`) of shape
    /// `(batch, action_size, num_atoms)`.
    fn forward(&self, x: &Tensor, log: bool, train: bool) -> Result<Tensor>;

    /// Resamples the noise of every noisy layer.
    fn reset_noise(&mut self) -> Result<()>;
}
