//! Categorical projection of C51.
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use ssrl_core::SsrlError;

/// Fixed, evenly spaced atoms `v_min, ..., v_max`.
#[derive(Debug, Clone)]
pub struct Support {
    atoms: Tensor,
    v_min: f64,
    v_max: f64,
    num_atoms: usize,
}

impl Support {
    /// Builds the support.
    pub fn new(v_min: f64, v_max: f64, num_atoms: usize, device: &Device) -> Result<Self> {
        if num_atoms < 2 || v_min >= v_max {
            return Err(SsrlError::config(format!(
                "invalid support: {} atoms in [{}, {}]",
                num_atoms, v_min, v_max
            ))
            .into());
        }
        let delta_z = (v_max - v_min) / (num_atoms - 1) as f64;
        let atoms = (0..num_atoms)
            .map(|i| (v_min + delta_z * i as f64) as f32)
            .collect::<Vec<_>>();
        Ok(Self {
            atoms: Tensor::from_vec(atoms, num_atoms, device)?,
            v_min,
            v_max,
            num_atoms,
        })
    }

    /// Atom values `(num_atoms,)`.
    pub fn atoms(&self) -> &Tensor {
        &self.atoms
    }

    /// Number of atoms.
    pub fn num_atoms(&self) -> usize {
        self.num_atoms
    }

    /// Distance between two neighbouring atoms.
    pub fn delta_z(&self) -> f64 {
        (self.v_max - self.v_min) / (self.num_atoms - 1) as f64
    }

    /// Expected values `(n, a)` of distributions `(n, a, num_atoms)`.
    pub fn expectation(&self, probs: &Tensor) -> Result<Tensor> {
        Ok(probs
            .broadcast_mul(&self.atoms.reshape((1, 1, self.num_atoms))?)?
            .sum(D::Minus1)?)
    }
}

/// Projects the distribution of `returns + gamma_n * z * (1 - done)` onto
/// `support`.
///
/// `probs` is the target distribution `(n, num_atoms)`, `returns` the n-step
/// returns `(n,)`, `done` is 1 where the episode ended within the n steps and
/// `gamma_n` is the discount factor raised to the power n.
///
/// A fractional atom index `b` splits the mass between `floor(b)` and
/// `ceil(b)`. When `b` is an integer the two indices are moved apart by one,
/// so the whole mass lands on `b`. The projected mass of every row sums to 1.
pub fn categorical_projection(
    probs: &Tensor,
    returns: &Tensor,
    done: &Tensor,
    gamma_n: f64,
    support: &Support,
) -> Result<Tensor> {
    let k = support.num_atoms();
    let (n, k_) = probs.dims2()?;
    if k != k_ || returns.dims() != [n] || done.dims() != [n] {
        return Err(SsrlError::shape(format!(
            "cannot project {:?} with returns {:?} and done {:?}",
            probs.dims(),
            returns.dims(),
            done.dims()
        ))
        .into());
    }

    let not_done = (1.0 - done.to_dtype(DType::F32)?)?;
    let tz = support
        .atoms()
        .unsqueeze(0)?
        .broadcast_mul(&not_done.unsqueeze(1)?)?;
    let tz = (tz * gamma_n)?
        .broadcast_add(&returns.to_dtype(DType::F32)?.unsqueeze(1)?)?
        .clamp(support.v_min as f32, support.v_max as f32)?;
    let b = ((tz - support.v_min)? * (1.0 / support.delta_z()))?;

    let l = b.floor()?;
    let u = b.ceil()?;
    let nudge_l = (l.eq(&u)? * u.gt(0f32)?)?.to_dtype(DType::F32)?;
    let l = (l - nudge_l)?;
    let nudge_u = (l.eq(&u)? * l.lt((k - 1) as f32)?)?.to_dtype(DType::F32)?;
    let u = (u + nudge_u)?;

    let m_l = (probs * (&u - &b)?)?;
    let m_u = (probs * (&b - &l)?)?;
    let m = Tensor::zeros((n, k), DType::F32, probs.device())?
        .scatter_add(&l.to_dtype(DType::U32)?, &m_l, 1)?
        .scatter_add(&u.to_dtype(DType::U32)?, &m_u, 1)?;
    Ok(m)
}

#[cfg(test)]
mod test {
    use super::*;

    fn uniform(n: usize, k: usize) -> Result<Tensor> {
        Ok((Tensor::ones((n, k), DType::F32, &Device::Cpu)? / k as f64)?)
    }

    #[test]
    fn test_terminal_zero_return_lands_on_middle_atom() -> Result<()> {
        let device = Device::Cpu;
        let support = Support::new(-10.0, 10.0, 51, &device)?;
        let probs = Tensor::rand(0f32, 1.0, (3, 51), &device)?;
        let probs = probs.broadcast_div(&probs.sum_keepdim(1)?)?;
        let returns = Tensor::zeros(3, DType::F32, &device)?;
        let done = Tensor::ones(3, DType::F32, &device)?;

        let m = categorical_projection(&probs, &returns, &done, 0.99, &support)?.to_vec2::<f32>()?;
        for row in m.iter() {
            assert!((row[25] - 1.0).abs() < 1e-5);
            let rest = row.iter().enumerate().filter(|(i, _)| *i != 25).map(|(_, v)| v.abs()).sum::<f32>();
            assert!(rest < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_mass_is_preserved() -> Result<()> {
        let device = Device::Cpu;
        let support = Support::new(-10.0, 10.0, 51, &device)?;
        let probs = Tensor::rand(0f32, 1.0, (4, 51), &device)?;
        let probs = probs.broadcast_div(&probs.sum_keepdim(1)?)?;
        // includes returns beyond the support and an exact atom
        let returns = Tensor::new(&[0.37f32, -25.0, 12.0, 0.4], &device)?;
        let done = Tensor::new(&[0f32, 0.0, 1.0, 0.0], &device)?;

        let m = categorical_projection(&probs, &returns, &done, 0.97, &support)?;
        for row in m.to_vec2::<f32>()? {
            assert!(row.iter().all(|v| *v >= 0.0));
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
        Ok(())
    }

    #[test]
    fn test_boundary_atoms() -> Result<()> {
        let device = Device::Cpu;
        let support = Support::new(-1.0, 1.0, 5, &device)?;
        let probs = uniform(2, 5)?;
        let returns = Tensor::new(&[5f32, -5.0], &device)?;
        let done = Tensor::ones(2, DType::F32, &device)?;

        let m = categorical_projection(&probs, &returns, &done, 1.0, &support)?.to_vec2::<f32>()?;
        assert!((m[0][4] - 1.0).abs() < 1e-6);
        assert!((m[1][0] - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_expectation() -> Result<()> {
        let device = Device::Cpu;
        let support = Support::new(-1.0, 1.0, 3, &device)?;
        let probs = Tensor::new(&[[[0f32, 0.0, 1.0], [0.5, 0.5, 0.0]]], &device)?;
        let q = support.expectation(&probs)?.to_vec2::<f32>()?;
        assert_eq!(q, vec![vec![1.0, -0.5]]);
        Ok(())
    }

    #[test]
    fn test_invalid_support() {
        assert!(Support::new(1.0, -1.0, 51, &Device::Cpu).is_err());
        assert!(Support::new(-1.0, 1.0, 1, &Device::Cpu).is_err());
    }
}
