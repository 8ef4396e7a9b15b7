//! Image augmentations on observation sequences.
use anyhow::Result;
use candle_core::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};
use ssrl_core::SsrlError;

/// Augmentation of `(n, t, f, c, h, w)` observations.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Augmentation {
    /// No-op.
    Identity,

    /// Pads every frame by `pad` pixels replicating the border and crops back
    /// at a random offset, shared by all frames of a sample.
    RandomShift { pad: usize },
}

impl Default for Augmentation {
    fn default() -> Self {
        Self::RandomShift { pad: 4 }
    }
}

impl Augmentation {
    /// Applies the augmentation.
    pub fn apply(&self, x: &Tensor, rng: &mut impl Rng) -> Result<Tensor> {
        match *self {
            Self::Identity => Ok(x.clone()),
            Self::RandomShift { pad } => random_shift(x, pad, rng),
        }
    }
}

fn random_shift(x: &Tensor, pad: usize, rng: &mut impl Rng) -> Result<Tensor> {
    let dims = x.dims();
    if dims.len() != 6 {
        return Err(SsrlError::shape(format!(
            "random shift expects (n, t, f, c, h, w), got {:?}",
            dims
        ))
        .into());
    }
    if pad == 0 {
        return Ok(x.clone());
    }
    let (n, h, w) = (dims[0], dims[4], dims[5]);
    let padded = x.pad_with_same(4, pad, pad)?.pad_with_same(5, pad, pad)?;

    let crops = (0..n)
        .map(|i| {
            let dy = rng.gen_range(0..=2 * pad);
            let dx = rng.gen_range(0..=2 * pad);
            Ok(padded.narrow(0, i, 1)?.narrow(4, dy, h)?.narrow(5, dx, w)?)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::cat(&crops, 0)?)
}
