//! Noisy linear layer and gradient scaling.
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

/// Linear layer with factorised Gaussian noise on weights and biases.
///
/// The noise is held outside of the var map, so it is neither optimized nor
/// copied by target updates. In evaluation mode only the means are used.
pub struct NoisyLinear {
    weight_mu: Tensor,
    weight_sigma: Tensor,
    bias_mu: Tensor,
    bias_sigma: Tensor,
    weight_epsilon: Tensor,
    bias_epsilon: Tensor,
    in_dim: usize,
    out_dim: usize,
}

/// `sign(x) * sqrt(|x|)` of standard normal samples.
fn scaled_noise(size: usize, device: &Device) -> Result<Tensor> {
    let x = Tensor::randn(0f32, 1.0, size, &Device::Cpu)?
        .to_vec1::<f32>()?
        .into_iter()
        .map(|x| x.signum() * x.abs().sqrt())
        .collect::<Vec<_>>();
    Ok(Tensor::from_vec(x, size, device)?)
}

impl NoisyLinear {
    /// Builds the layer. `std_init` scales the initial noise.
    pub fn build(vb: VarBuilder, in_dim: usize, out_dim: usize, std_init: f64) -> Result<Self> {
        let mu_range = 1.0 / (in_dim as f64).sqrt();
        let mu_init = Init::Uniform {
            lo: -mu_range,
            up: mu_range,
        };
        let device = vb.device().clone();

        let mut layer = Self {
            weight_mu: vb.get_with_hints((out_dim, in_dim), "weight_mu", mu_init)?,
            weight_sigma: vb.get_with_hints(
                (out_dim, in_dim),
                "weight_sigma",
                Init::Const(std_init / (in_dim as f64).sqrt()),
            )?,
            bias_mu: vb.get_with_hints(out_dim, "bias_mu", mu_init)?,
            bias_sigma: vb.get_with_hints(out_dim, "bias_sigma", Init::Const(std_init / (out_dim as f64).sqrt()))?,
            weight_epsilon: Tensor::zeros((out_dim, in_dim), DType::F32, &device)?,
            bias_epsilon: Tensor::zeros(out_dim, DType::F32, &device)?,
            in_dim,
            out_dim,
        };
        layer.reset_noise()?;
        Ok(layer)
    }

    /// Resamples the noise.
    pub fn reset_noise(&mut self) -> Result<()> {
        let device = self.weight_mu.device().clone();
        let eps_in = scaled_noise(self.in_dim, &device)?;
        let eps_out = scaled_noise(self.out_dim, &device)?;
        self.weight_epsilon = eps_out.unsqueeze(1)?.broadcast_mul(&eps_in.unsqueeze(0)?)?;
        self.bias_epsilon = eps_out;
        Ok(())
    }

    /// `(n, in_dim) -> (n, out_dim)`.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (w, b) = if train {
            (
                (&self.weight_mu + (&self.weight_sigma * &self.weight_epsilon)?)?,
                (&self.bias_mu + (&self.bias_sigma * &self.bias_epsilon)?)?,
            )
        } else {
            (self.weight_mu.clone(), self.bias_mu.clone())
        };
        Ok(Linear::new(w, Some(b)).forward(x)?)
    }
}

/// Returns the value of `x`, scaling the gradient flowing back into `x` by
/// `scale`.
///
/// Computed as `detach(x) * (1 - scale) + x * scale`, so the value matches
/// `x` up to rounding on every device.
pub fn scale_grad(x: &Tensor, scale: f64) -> Result<Tensor> {
    Ok(((x.detach() * (1.0 - scale))? + (x * scale)?)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Var;
    use candle_nn::VarMap;

    #[test]
    fn test_scale_grad() -> Result<()> {
        let x = Var::new(&[1f32, -2.0, 3.0], &Device::Cpu)?;
        let y = scale_grad(x.as_tensor(), 0.5)?;
        assert_eq!(y.to_vec1::<f32>()?, vec![1.0, -2.0, 3.0]);

        let loss = (y * 4.0)?.sum_all()?;
        let grads = loss.backward()?;
        let g = grads
            .get(x.as_tensor())
            .ok_or_else(|| anyhow::anyhow!("no gradient"))?
            .to_vec1::<f32>()?;
        assert_eq!(g, vec![2.0, 2.0, 2.0]);

        let y = scale_grad(x.as_tensor(), std::f64::consts::FRAC_1_SQRT_2)?;
        let diff = (y - x.as_tensor())?.abs()?.max(0)?.to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn test_noise_only_in_training() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut layer = NoisyLinear::build(vb, 4, 3, 0.5)?;
        let x = Tensor::randn(0f32, 1.0, (2, 4), &Device::Cpu)?;

        let a = layer.forward(&x, false)?;
        layer.reset_noise()?;
        let b = layer.forward(&x, false)?;
        assert_eq!((a - b)?.abs()?.sum_all()?.to_scalar::<f32>()?, 0.0);

        let c = layer.forward(&x, true)?;
        let d = layer.forward(&x, true)?;
        assert_eq!((c - d)?.abs()?.sum_all()?.to_scalar::<f32>()?, 0.0);
        assert_eq!(varmap.all_vars().len(), 4);
        Ok(())
    }
}
