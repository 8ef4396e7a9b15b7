use super::{config::RainbowConfig, policy::RainbowPolicy};
use crate::{
    model::PolicyNet,
    opt::Optimizer,
    vit::Vit,
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use std::path::Path;

/// ViT frame encoder followed by [`RainbowPolicy`].
///
/// Observations `(n, t, f, c, h, w)` with pixel values in `[0, 255]` are
/// encoded per time step, pooled over patches and flattened over time.
pub struct RainbowModel {
    varmap: VarMap,
    backbone: Vit,
    policy: RainbowPolicy,
    opt: Optimizer,
}

impl RainbowModel {
    /// Constructs [`RainbowModel`] with its own var map.
    pub fn build(config: &RainbowConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let backbone = Vit::build(vb.pp("backbone"), config.vit_config.clone())?;
        let policy = RainbowPolicy::build(
            vb.pp("policy"),
            backbone.embed_dim(),
            config.hid_dim,
            config.action_size(),
            config.num_atoms,
            config.noisy_std,
        )?;
        let opt = config
            .opt_config
            .build(varmap.all_vars(), config.clip_grad_norm)?;

        Ok(Self {
            varmap,
            backbone,
            policy,
            opt,
        })
    }

    /// Atom probabilities `(n, action_size, num_atoms)`, log-probabilities with `log`.
    pub fn forward(&self, obs: &Tensor, log: bool, train: bool) -> Result<Tensor> {
        let x = self.backbone.embed(obs, train)?.flatten_from(1)?;
        self.policy.forward(&x, log, train)
    }

    /// Resamples the noise of the policy.
    pub fn reset_noise(&mut self) -> Result<()> {
        self.policy.reset_noise()
    }

    /// Backpropagates `loss` and updates the parameters, returning the gradient norm.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<f32> {
        self.opt.backward_step(loss)
    }

    pub fn get_varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.varmap.save(&path)?;
        info!("Save rainbow model to {:?}", path.as_ref());
        Ok(())
    }

    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.varmap.load(&path)?;
        info!("Load rainbow model from {:?}", path.as_ref());
        Ok(())
    }
}
