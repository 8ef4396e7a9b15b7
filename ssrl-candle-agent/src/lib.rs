//! Sample-efficient RL components implemented with [candle](https://crates.io/crates/candle-core).
//!
//! The crate provides masked-sequence ViT backbones, representation heads,
//! a Rainbow (C51) agent and a self-predictive (MLR) trainer. Agents and
//! trainers talk to environments, replay buffers and loggers only through the
//! traits of [`ssrl_core`].
pub mod augment;
pub mod head;
pub mod mask;
pub mod mlr;
pub mod model;
pub mod opt;
pub mod pos_embed;
pub mod rainbow;
pub mod transformer;
pub mod util;
pub mod vit;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq, Eq)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The GPU device with the given ordinal.
    Cuda(usize),
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl Device {
    /// Creates the corresponding [`candle_core::Device`].
    ///
    /// Fails when a CUDA device is requested but candle was built without
    /// CUDA support or the ordinal does not exist.
    pub fn to_candle(self) -> Result<candle_core::Device> {
        match self {
            Self::Cpu => Ok(candle_core::Device::Cpu),
            Self::Cuda(n) => Ok(candle_core::Device::new_cuda(n)?),
        }
    }
}

impl From<&candle_core::Device> for Device {
    fn from(device: &candle_core::Device) -> Self {
        match device.location() {
            candle_core::DeviceLocation::Cuda { gpu_id } => Self::Cuda(gpu_id),
            _ => Self::Cpu,
        }
    }
}
