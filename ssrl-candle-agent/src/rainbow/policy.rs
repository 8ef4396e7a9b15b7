//! Dueling distributional head with noisy layers.
use super::noisy::{scale_grad, NoisyLinear};
use crate::model::PolicyNet;
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::{ops::log_softmax, VarBuilder};

/// Scale of the gradient flowing back into the backbone.
const GRAD_SCALE: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Dueling C51 head.
///
/// Value and advantage streams are two noisy layers each. The output is a
/// distribution over `num_atoms` atoms per action.
pub struct RainbowPolicy {
    fc_v1: NoisyLinear,
    fc_v2: NoisyLinear,
    fc_adv1: NoisyLinear,
    fc_adv2: NoisyLinear,
    action_size: usize,
    num_atoms: usize,
}

impl RainbowPolicy {
    /// Builds the head.
    pub fn build(
        vb: VarBuilder,
        in_dim: usize,
        hid_dim: usize,
        action_size: usize,
        num_atoms: usize,
        noisy_std: f64,
    ) -> Result<Self> {
        Ok(Self {
            fc_v1: NoisyLinear::build(vb.pp("fc_v1"), in_dim, hid_dim, noisy_std)?,
            fc_v2: NoisyLinear::build(vb.pp("fc_v2"), hid_dim, num_atoms, noisy_std)?,
            fc_adv1: NoisyLinear::build(vb.pp("fc_adv1"), in_dim, hid_dim, noisy_std)?,
            fc_adv2: NoisyLinear::build(vb.pp("fc_adv2"), hid_dim, action_size * num_atoms, noisy_std)?,
            action_size,
            num_atoms,
        })
    }

    /// Number of atoms.
    pub fn num_atoms(&self) -> usize {
        self.num_atoms
    }

    /// Number of actions.
    pub fn action_size(&self) -> usize {
        self.action_size
    }

    fn noisy_layers_mut(&mut self) -> [&mut NoisyLinear; 4] {
        [
            &mut self.fc_v1,
            &mut self.fc_v2,
            &mut self.fc_adv1,
            &mut self.fc_adv2,
        ]
    }
}

impl PolicyNet for RainbowPolicy {
    fn forward(&self, x: &Tensor, log: bool, train: bool) -> Result<Tensor> {
        let n = x.dim(0)?;
        let x = scale_grad(x, GRAD_SCALE)?;
        let v = self.fc_v2.forward(&self.fc_v1.forward(&x, train)?.relu()?, train)?;
        let adv = self.fc_adv2.forward(&self.fc_adv1.forward(&x, train)?.relu()?, train)?;

        let v = v.reshape((n, 1, self.num_atoms))?;
        let adv = adv.reshape((n, self.action_size, self.num_atoms))?;
        let q = v.broadcast_add(&adv.broadcast_sub(&adv.mean_keepdim(1)?)?)?;

        let q = log_softmax(&q, D::Minus1)?;
        if log {
            Ok(q)
        } else {
            Ok(q.exp()?)
        }
    }

    fn reset_noise(&mut self) -> Result<()> {
        for layer in self.noisy_layers_mut() {
            layer.reset_noise()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_probabilities_sum_to_one() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut policy = RainbowPolicy::build(vb, 6, 8, 4, 51, 0.1)?;
        let x = Tensor::randn(0f32, 1.0, (5, 6), &Device::Cpu)?;

        for train in [true, false] {
            policy.reset_noise()?;
            let p = policy.forward(&x, false, train)?;
            assert_eq!(p.dims(), &[5, 4, 51]);
            for row in p.sum(D::Minus1)?.flatten_all()?.to_vec1::<f32>()? {
                assert!((row - 1.0).abs() < 1e-5);
            }
        }

        let log_p = policy.forward(&x, true, false)?;
        let p = policy.forward(&x, false, false)?;
        let diff = (log_p.exp()? - p)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }
}
