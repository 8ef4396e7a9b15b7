//! Random masking of token sequences.
//!
//! A mask is drawn per batch row as a shuffle of the token positions of a
//! `(time, num_patches)` sequence flattened time-major. The first positions of
//! the shuffle are kept, the rest are masked, and `ids_restore` is the inverse
//! of the shuffle, so that
//!
//! ```text
//! gather(concat(gather(x, ids_keep), fill), ids_restore) == x   at kept positions
//! ```
use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use ssrl_core::SsrlError;
use std::str::FromStr;

/// Shape of the sequences to be masked.
///
/// Temporal (1D) masks use `num_patches = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskShape {
    /// Batch size.
    pub batch: usize,

    /// Number of time steps.
    pub time: usize,

    /// Number of patches per time step.
    pub num_patches: usize,
}

impl MaskShape {
    /// Shape of a temporal mask.
    pub fn temporal(batch: usize, time: usize) -> Self {
        Self {
            batch,
            time,
            num_patches: 1,
        }
    }

    /// Number of tokens in a row.
    pub fn seq_len(&self) -> usize {
        self.time * self.num_patches
    }
}

/// How masked positions are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskStrategy {
    /// Independent uniform choice over all tokens.
    Uniform,

    /// The same spatial positions are masked at every time step.
    Tube,

    /// Whole time steps are masked.
    Frame,
}

impl FromStr for MaskStrategy {
    type Err = SsrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(Self::Uniform),
            "tube" => Ok(Self::Tube),
            "frame" => Ok(Self::Frame),
            _ => Err(SsrlError::config(format!("Unknown mask strategy: {}", s))),
        }
    }
}

/// Host-side result of [`random_mask`], one entry per batch row.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskIndices {
    /// Kept positions, in shuffle order.
    pub ids_keep: Vec<Vec<u32>>,

    /// `true` at masked positions, in original order.
    pub mask: Vec<Vec<bool>>,

    /// Inverse of the shuffle.
    pub ids_restore: Vec<Vec<u32>>,
}

/// Device-side mask indices.
#[derive(Debug, Clone)]
pub struct MaskTensors {
    /// `(batch, n_keep)`, `u32`.
    pub ids_keep: Tensor,

    /// `(batch, seq_len)`, `u8`, 1 at masked positions.
    pub mask: Tensor,

    /// `(batch, seq_len)`, `u32`.
    pub ids_restore: Tensor,
}

impl MaskIndices {
    /// Number of kept tokens per row.
    pub fn n_keep(&self) -> usize {
        self.ids_keep.first().map_or(0, |v| v.len())
    }

    /// Moves the indices to `device`.
    pub fn to_tensors(&self, device: &Device) -> Result<MaskTensors> {
        let batch = self.ids_keep.len();
        let seq_len = self.ids_restore.first().map_or(0, |v| v.len());
        let ids_keep = self.ids_keep.iter().flatten().copied().collect::<Vec<_>>();
        let ids_restore = self.ids_restore.iter().flatten().copied().collect::<Vec<_>>();
        let mask = self
            .mask
            .iter()
            .flatten()
            .map(|m| *m as u8)
            .collect::<Vec<_>>();

        Ok(MaskTensors {
            ids_keep: Tensor::from_vec(ids_keep, (batch, self.n_keep()), device)?,
            mask: Tensor::from_vec(mask, (batch, seq_len), device)?,
            ids_restore: Tensor::from_vec(ids_restore, (batch, seq_len), device)?,
        })
    }
}

fn n_keep(n: usize, mask_ratio: f64) -> usize {
    (n as f64 * (1.0 - mask_ratio)).round() as usize
}

/// Draws a random mask for every row of `shape`.
///
/// `mask_ratio` must lie in `[0, 1)`. The number of kept tokens is
/// `round(N * (1 - mask_ratio))` with `N` the number of candidates of the
/// strategy: all tokens for [`MaskStrategy::Uniform`], patches of a frame
/// for [`MaskStrategy::Tube`] and time steps for [`MaskStrategy::Frame`].
pub fn random_mask(
    shape: MaskShape,
    mask_ratio: f64,
    strategy: MaskStrategy,
    rng: &mut impl Rng,
) -> Result<MaskIndices> {
    if !(0.0..1.0).contains(&mask_ratio) {
        return Err(SsrlError::config(format!("mask_ratio must be in [0, 1), got {}", mask_ratio)).into());
    }
    let MaskShape {
        batch,
        time,
        num_patches,
    } = shape;
    let seq_len = shape.seq_len();

    let mut out = MaskIndices {
        ids_keep: Vec::with_capacity(batch),
        mask: Vec::with_capacity(batch),
        ids_restore: Vec::with_capacity(batch),
    };

    for _ in 0..batch {
        let (shuffle, keep) = match strategy {
            MaskStrategy::Uniform => {
                let mut ids = (0..seq_len).collect::<Vec<_>>();
                ids.shuffle(rng);
                (ids, n_keep(seq_len, mask_ratio))
            }
            MaskStrategy::Tube => {
                let mut sp = (0..num_patches).collect::<Vec<_>>();
                sp.shuffle(rng);
                let k = n_keep(num_patches, mask_ratio);
                let kept = (0..time).flat_map(|t| sp[..k].iter().map(move |p| t * num_patches + p));
                let masked = (0..time).flat_map(|t| sp[k..].iter().map(move |p| t * num_patches + p));
                (kept.chain(masked).collect(), time * k)
            }
            MaskStrategy::Frame => {
                let mut tp = (0..time).collect::<Vec<_>>();
                tp.shuffle(rng);
                let k = n_keep(time, mask_ratio);
                let ids = tp
                    .iter()
                    .flat_map(|t| (0..num_patches).map(move |p| t * num_patches + p))
                    .collect();
                (ids, k * num_patches)
            }
        };

        let mut ids_restore = vec![0u32; seq_len];
        let mut mask = vec![true; seq_len];
        for (i, &pos) in shuffle.iter().enumerate() {
            ids_restore[pos] = i as u32;
            mask[pos] = i >= keep;
        }
        out.ids_keep
            .push(shuffle[..keep].iter().map(|&p| p as u32).collect());
        out.mask.push(mask);
        out.ids_restore.push(ids_restore);
    }

    Ok(out)
}

fn expand_index(ids: &Tensor, dim: usize) -> Result<Tensor> {
    let (b, n) = ids.dims2()?;
    Ok(ids.unsqueeze(2)?.broadcast_as((b, n, dim))?.contiguous()?)
}

/// Keeps the tokens of `x` `(batch, seq_len, dim)` listed in `ids_keep`.
pub fn gather_masked(x: &Tensor, ids_keep: &Tensor) -> Result<Tensor> {
    let (_, _, d) = x.dims3()?;
    Ok(x.contiguous()?.gather(&expand_index(ids_keep, d)?, 1)?)
}

/// Re-expands kept tokens to the full sequence.
///
/// Masked positions receive `fill`, a `(1, 1, dim)` or `(batch, 1, dim)`
/// placeholder, or zeros when `fill` is `None`.
pub fn scatter_restore(x_kept: &Tensor, ids_restore: &Tensor, fill: Option<&Tensor>) -> Result<Tensor> {
    let (b, k, d) = x_kept.dims3()?;
    let (b_, n) = ids_restore.dims2()?;
    if b != b_ || k > n {
        return Err(SsrlError::shape(format!(
            "cannot restore {:?} with indices {:?}",
            x_kept.dims(),
            ids_restore.dims()
        ))
        .into());
    }
    let x = if n > k {
        let fill = match fill {
            Some(f) => f
                .to_dtype(x_kept.dtype())?
                .broadcast_as((b, n - k, d))?
                .contiguous()?,
            None => Tensor::zeros((b, n - k, d), x_kept.dtype(), x_kept.device())?,
        };
        Tensor::cat(&[x_kept, &fill], 1)?
    } else {
        x_kept.clone()
    };
    Ok(x.contiguous()?.gather(&expand_index(ids_restore, d)?, 1)?)
}

/// `(n, t, f, c, nh*ph, nw*pw) -> (n, t*nh*nw, ph*pw*f*c)`.
pub fn patchify(obs: &Tensor, (ph, pw): (usize, usize)) -> Result<Tensor> {
    let dims = obs.dims();
    if dims.len() != 6 || dims[4] % ph != 0 || dims[5] % pw != 0 {
        return Err(SsrlError::shape(format!(
            "cannot split {:?} into {}x{} patches",
            dims, ph, pw
        ))
        .into());
    }
    let (n, t, f, c) = (dims[0], dims[1], dims[2], dims[3]);
    let (nh, nw) = (dims[4] / ph, dims[5] / pw);

    Ok(obs
        .reshape(vec![n, t, f, c, nh, ph, nw, pw])?
        .permute(vec![0, 1, 4, 6, 5, 7, 2, 3])?
        .contiguous()?
        .reshape((n, t * nh * nw, ph * pw * f * c))?)
}

/// Inverse of [`patchify`].
///
/// `shape` is `(t, f, c, height, width)` of the original observation.
pub fn unpatchify(
    patches: &Tensor,
    (t, f, c, h, w): (usize, usize, usize, usize, usize),
    (ph, pw): (usize, usize),
) -> Result<Tensor> {
    let (n, l, pd) = patches.dims3()?;
    let (nh, nw) = (h / ph, w / pw);
    if l != t * nh * nw || pd != ph * pw * f * c || h % ph != 0 || w % pw != 0 {
        return Err(SsrlError::shape(format!(
            "cannot fold {:?} into (t, f, c, h, w) = {:?}",
            patches.dims(),
            (t, f, c, h, w)
        ))
        .into());
    }

    Ok(patches
        .reshape(vec![n, t, nh, nw, ph, pw, f, c])?
        .permute(vec![0, 1, 6, 7, 2, 4, 3, 5])?
        .contiguous()?
        .reshape(vec![n, t, f, c, h, w])?)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    fn is_permutation(v: &[u32]) -> bool {
        let mut s = v.to_vec();
        s.sort();
        s.iter().enumerate().all(|(i, x)| i as u32 == *x)
    }

    #[test]
    fn test_uniform_mask_counts() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(0);
        let shape = MaskShape {
            batch: 2,
            time: 4,
            num_patches: 16,
        };
        let m = random_mask(shape, 0.75, MaskStrategy::Uniform, &mut rng)?;

        for b in 0..2 {
            assert_eq!(m.ids_keep[b].len(), 16);
            assert!(is_permutation(&m.ids_restore[b]));
            assert_eq!(m.mask[b].iter().filter(|x| !**x).count(), 16);
            for &k in m.ids_keep[b].iter() {
                assert!(!m.mask[b][k as usize]);
            }
        }
        Ok(())
    }

    #[test]
    fn test_tube_mask_shares_positions() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(1);
        let shape = MaskShape {
            batch: 3,
            time: 4,
            num_patches: 8,
        };
        let m = random_mask(shape, 0.5, MaskStrategy::Tube, &mut rng)?;

        for b in 0..3 {
            assert_eq!(m.ids_keep[b].len(), 16);
            assert!(is_permutation(&m.ids_restore[b]));
            for t in 1..4 {
                assert_eq!(m.mask[b][..8], m.mask[b][t * 8..(t + 1) * 8]);
            }
        }
        Ok(())
    }

    #[test]
    fn test_frame_mask_drops_whole_steps() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(2);
        let shape = MaskShape {
            batch: 2,
            time: 4,
            num_patches: 3,
        };
        let m = random_mask(shape, 0.5, MaskStrategy::Frame, &mut rng)?;

        for b in 0..2 {
            assert_eq!(m.ids_keep[b].len(), 6);
            for t in 0..4 {
                let step = &m.mask[b][t * 3..(t + 1) * 3];
                assert!(step.iter().all(|x| *x == step[0]));
            }
        }
        Ok(())
    }

    #[test]
    fn test_same_seed_same_mask() -> Result<()> {
        let shape = MaskShape::temporal(4, 10);
        let m1 = random_mask(shape, 0.3, MaskStrategy::Uniform, &mut SmallRng::seed_from_u64(7))?;
        let m2 = random_mask(shape, 0.3, MaskStrategy::Uniform, &mut SmallRng::seed_from_u64(7))?;
        assert_eq!(m1, m2);
        assert_eq!(m1.n_keep(), 7);
        Ok(())
    }

    #[test]
    fn test_invalid_ratio() {
        let mut rng = SmallRng::seed_from_u64(0);
        let shape = MaskShape::temporal(1, 4);
        assert!(random_mask(shape, 1.0, MaskStrategy::Uniform, &mut rng).is_err());
        assert!(random_mask(shape, -0.1, MaskStrategy::Uniform, &mut rng).is_err());
        assert!("block".parse::<MaskStrategy>().is_err());
    }

    #[test]
    fn test_gather_scatter_roundtrip() -> Result<()> {
        let device = Device::Cpu;
        let mut rng = SmallRng::seed_from_u64(3);
        let shape = MaskShape {
            batch: 2,
            time: 3,
            num_patches: 4,
        };
        let m = random_mask(shape, 0.5, MaskStrategy::Uniform, &mut rng)?;
        let mt = m.to_tensors(&device)?;

        let x = Tensor::arange(0f32, 2.0 * 12.0 * 5.0, &device)?.reshape((2, 12, 5))?;
        let fill = Tensor::full(-1f32, (1, 1, 5), &device)?;
        let kept = gather_masked(&x, &mt.ids_keep)?;
        assert_eq!(kept.dims(), &[2, 6, 5]);
        let y = scatter_restore(&kept, &mt.ids_restore, Some(&fill))?;

        let x = x.to_vec3::<f32>()?;
        let y = y.to_vec3::<f32>()?;
        for b in 0..2 {
            for i in 0..12 {
                if m.mask[b][i] {
                    assert!(y[b][i].iter().all(|v| *v == -1.0));
                } else {
                    assert_eq!(x[b][i], y[b][i]);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_patchify_roundtrip() -> Result<()> {
        let device = Device::Cpu;
        let obs = Tensor::arange(0f32, (2 * 3 * 1 * 2 * 4 * 6) as f32, &device)?
            .reshape(vec![2, 3, 1, 2, 4, 6])?;
        let p = patchify(&obs, (2, 3))?;
        assert_eq!(p.dims(), &[2, 3 * 4, 2 * 3 * 2]);

        // first patch, first pixel holds both channels
        let p0 = p.get(0)?.get(0)?.to_vec1::<f32>()?;
        assert_eq!(p0[0], 0.0);
        assert_eq!(p0[1], 24.0);

        let back = unpatchify(&p, (3, 1, 2, 4, 6), (2, 3))?;
        let diff = (back - &obs)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);

        assert!(patchify(&obs, (3, 3)).is_err());
        Ok(())
    }
}
