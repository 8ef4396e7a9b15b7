//! Configuration of MLR trainer.
use crate::{
    augment::Augmentation,
    head::HeadParams,
    mask::MaskStrategy,
    opt::OptimizerConfig,
    vit::VitConfig,
    Device,
};
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use ssrl_core::{LinearScheduler, SsrlError};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
    str::FromStr,
};

/// Where the online branch is corrupted.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum MaskType {
    /// Patches are zeroed before the backbone.
    Pixel,

    /// Per-step latents are replaced by the mask token after the backbone.
    Latent,
}

impl FromStr for MaskType {
    type Err = SsrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pixel" => Ok(Self::Pixel),
            "latent" => Ok(Self::Latent),
            _ => Err(SsrlError::config(format!("Unknown mask type: {}", s))),
        }
    }
}

/// Configuration of [`MlrTrainer`](super::MlrTrainer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct MlrConfig {
    /// Backbone.
    pub vit_config: VitConfig,

    /// Head. `in_dim` must match the encoder width of the backbone.
    pub head_params: HeadParams,

    /// Corruption of the online branch.
    pub mask_type: MaskType,

    /// Fraction of masked tokens.
    pub mask_ratio: f64,

    /// Strategy of pixel masking. Latent masking is always uniform over time steps.
    pub mask_strategy: MaskStrategy,

    /// Schedule of the EMA coefficient of the target model.
    pub tau_scheduler: LinearScheduler,

    /// Weak augmentation applied to both branches.
    pub augmentation: Augmentation,

    /// Optimizer.
    pub opt_config: OptimizerConfig,

    /// Maximum global norm of the gradients.
    pub clip_grad_norm: Option<f64>,

    /// Device.
    pub device: Device,

    /// Seed of augmentation and masking.
    pub seed: u64,
}

impl Default for MlrConfig {
    fn default() -> Self {
        let vit_config = VitConfig::default();
        let head_params = HeadParams::default()
            .action_size(vit_config.action_size)
            .dims(vit_config.enc_dim, vit_config.enc_dim);
        Self {
            vit_config,
            head_params,
            mask_type: MaskType::Latent,
            mask_ratio: 0.5,
            mask_strategy: MaskStrategy::Uniform,
            tau_scheduler: LinearScheduler::new(0.99, 1.0, 100_000),
            augmentation: Augmentation::default(),
            opt_config: OptimizerConfig::AdamW {
                lr: 3e-4,
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-8,
                weight_decay: 1e-5,
            },
            clip_grad_norm: Some(0.5),
            device: Device::Cpu,
            seed: 42,
        }
    }
}

impl MlrConfig {
    /// Sets the backbone and the matching head dimensions.
    pub fn vit_config(mut self, v: VitConfig) -> Self {
        self.head_params.action_size = v.action_size;
        self.head_params.in_dim = v.enc_dim;
        self.vit_config = v;
        self
    }

    /// Sets the head.
    pub fn head_params(mut self, v: HeadParams) -> Self {
        self.head_params = v;
        self
    }

    /// Sets the corruption.
    pub fn mask(mut self, mask_type: MaskType, mask_ratio: f64, mask_strategy: MaskStrategy) -> Self {
        self.mask_type = mask_type;
        self.mask_ratio = mask_ratio;
        self.mask_strategy = mask_strategy;
        self
    }

    /// Sets the schedule of the EMA coefficient.
    pub fn tau_scheduler(mut self, v: LinearScheduler) -> Self {
        self.tau_scheduler = v;
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

    /// Sets the seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Checks the hyperparameters.
    pub fn validate(&self) -> Result<()> {
        self.vit_config.validate()?;
        if self.head_params.in_dim != self.vit_config.enc_dim {
            return Err(SsrlError::config(format!(
                "head in_dim {} differs from the encoder width {}",
                self.head_params.in_dim, self.vit_config.enc_dim
            ))
            .into());
        }
        if self.head_params.action_size != self.vit_config.action_size {
            return Err(SsrlError::config("head and backbone disagree on the number of actions").into());
        }
        if !(0.0..1.0).contains(&self.mask_ratio) {
            return Err(SsrlError::config(format!("mask_ratio must be in [0, 1), got {}", self.mask_ratio)).into());
        }
        Ok(())
    }

    /// Constructs [`MlrConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of MLR trainer from {}", path_.to_str().unwrap_or_default());
        Ok(b)
    }

    /// Saves [`MlrConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of MLR trainer into {}", path_.to_str().unwrap_or_default());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_mask_type_from_str() {
        assert_eq!("pixel".parse::<MaskType>().ok(), Some(MaskType::Pixel));
        assert_eq!("latent".parse::<MaskType>().ok(), Some(MaskType::Latent));
        assert!(matches!(
            "patch".parse::<MaskType>(),
            Err(SsrlError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_mask_type_in_yaml() -> Result<()> {
        let dir = TempDir::new("mlr_config")?;
        let path = dir.path().join("mlr.yaml");
        let yaml = serde_yaml::to_string(&MlrConfig::default())?.replace("mask_type: latent", "mask_type: patch");
        std::fs::write(&path, yaml)?;
        assert!(MlrConfig::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_config_roundtrip() -> Result<()> {
        let dir = TempDir::new("mlr_config")?;
        let path = dir.path().join("mlr.yaml");
        let config = MlrConfig::default().mask(MaskType::Pixel, 0.75, MaskStrategy::Tube);
        config.save(&path)?;
        assert_eq!(MlrConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_validate() {
        assert!(MlrConfig::default().validate().is_ok());
        let config = MlrConfig::default().mask(MaskType::Latent, 1.0, MaskStrategy::Uniform);
        assert!(config.validate().is_err());
        let config = MlrConfig::default().head_params(HeadParams::default().dims(64, 64));
        assert!(config.validate().is_err());
    }
}
