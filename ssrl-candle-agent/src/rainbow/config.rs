//! Configuration of Rainbow agent.
use crate::{augment::Augmentation, opt::OptimizerConfig, vit::VitConfig, Device};
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use ssrl_core::SsrlError;
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Rainbow`](super::Rainbow) agent.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct RainbowConfig {
    /// Backbone. `action_size` of the backbone is the number of actions.
    pub vit_config: VitConfig,

    /// Width of the hidden noisy layers.
    pub hid_dim: usize,

    /// Number of atoms of the value distribution.
    pub num_atoms: usize,

    /// Lowest atom.
    pub v_min: f64,

    /// Highest atom.
    pub v_max: f64,

    /// Discount factor of a single step.
    pub gamma: f64,

    /// Selects the next action with the online network.
    pub double: bool,

    /// Initial scale of the noise of the noisy layers.
    pub noisy_std: f64,

    /// Exploration rate of the greedy evaluation policy.
    pub eval_eps: f64,

    /// Batch size.
    pub batch_size: usize,

    /// Number of optimization steps between two hard target updates.
    pub target_update_interval: usize,

    /// Maximum global norm of the gradients.
    pub clip_grad_norm: Option<f64>,

    /// Augmentation of the sampled observations.
    pub augmentation: Augmentation,

    /// Optimizer.
    pub opt_config: OptimizerConfig,

    /// Device.
    pub device: Device,

    /// Seed of the agent's random number generator.
    pub seed: u64,
}

impl Default for RainbowConfig {
    fn default() -> Self {
        Self {
            vit_config: VitConfig::default(),
            hid_dim: 512,
            num_atoms: 51,
            v_min: -10.0,
            v_max: 10.0,
            gamma: 0.99,
            double: true,
            noisy_std: 0.1,
            eval_eps: 0.001,
            batch_size: 32,
            target_update_interval: 1,
            clip_grad_norm: Some(10.0),
            augmentation: Augmentation::default(),
            opt_config: OptimizerConfig::default(),
            device: Device::Cpu,
            seed: 42,
        }
    }
}

impl RainbowConfig {
    /// Sets the backbone.
    pub fn vit_config(mut self, v: VitConfig) -> Self {
        self.vit_config = v;
        self
    }

    /// Sets the width of the hidden noisy layers.
    pub fn hid_dim(mut self, v: usize) -> Self {
        self.hid_dim = v;
        self
    }

    /// Sets the support `(num_atoms, v_min, v_max)`.
    pub fn support(mut self, num_atoms: usize, v_min: f64, v_max: f64) -> Self {
        self.num_atoms = num_atoms;
        self.v_min = v_min;
        self.v_max = v_max;
        self
    }

    /// Sets the discount factor.
    pub fn gamma(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Enables or disables double Q-learning.
    pub fn double(mut self, v: bool) -> Self {
        self.double = v;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the interval of hard target updates.
    pub fn target_update_interval(mut self, v: usize) -> Self {
        self.target_update_interval = v;
        self
    }

    /// Sets the augmentation.
    pub fn augmentation(mut self, v: Augmentation) -> Self {
        self.augmentation = v;
        self
    }

    /// Sets the optimizer.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = v;
        self
    }

    /// Sets the seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Number of actions.
    pub fn action_size(&self) -> usize {
        self.vit_config.action_size
    }

    /// Checks the hyperparameters.
    pub fn validate(&self) -> Result<()> {
        if self.num_atoms < 2 {
            return Err(SsrlError::config(format!("num_atoms must be at least 2, got {}", self.num_atoms)).into());
        }
        if self.v_min >= self.v_max {
            return Err(SsrlError::config(format!(
                "v_min ({}) must be lower than v_max ({})",
                self.v_min, self.v_max
            ))
            .into());
        }
        if self.action_size() == 0 {
            return Err(SsrlError::config("the agent needs at least one action").into());
        }
        if self.batch_size == 0 || self.target_update_interval == 0 {
            return Err(SsrlError::config("batch_size and target_update_interval must be positive").into());
        }
        if !(0.0..=1.0).contains(&self.eval_eps) {
            return Err(SsrlError::config(format!("eval_eps must be in [0, 1], got {}", self.eval_eps)).into());
        }
        self.vit_config.validate()
    }

    /// Constructs [`RainbowConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of Rainbow agent from {}", path_.to_str().unwrap_or_default());
        Ok(b)
    }

    /// Saves [`RainbowConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of Rainbow agent into {}", path_.to_str().unwrap_or_default());
        Ok(())
    }
}
