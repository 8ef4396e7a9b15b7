//! Fixed sin-cos positional embeddings.
//!
//! The first half of every embedding holds `sin(pos * ω_k)` and the second
//! half `cos(pos * ω_k)` with `ω_k = 1 / 10000^(k / (dim / 2))`.
use anyhow::Result;
use candle_core::{Device, Tensor};
use ssrl_core::SsrlError;

/// 1D embeddings of `positions`, one row of width `dim` per position.
pub fn sincos_1d(dim: usize, positions: &[f32]) -> Result<Vec<Vec<f32>>> {
    if dim == 0 || dim % 2 != 0 {
        return Err(SsrlError::config(format!("sin-cos embedding width must be even, got {}", dim)).into());
    }
    let half = dim / 2;
    let omega = (0..half)
        .map(|k| 1.0 / 10000f64.powf(k as f64 / half as f64))
        .collect::<Vec<_>>();

    Ok(positions
        .iter()
        .map(|&p| {
            let out = omega.iter().map(|w| p as f64 * w).collect::<Vec<_>>();
            out.iter()
                .map(|x| x.sin() as f32)
                .chain(out.iter().map(|x| x.cos() as f32))
                .collect()
        })
        .collect())
}

/// 2D embeddings of a `(grid_h, grid_w)` grid, row-major.
///
/// The first `dim / 2` values encode the column, the rest encode the row.
pub fn sincos_2d(dim: usize, (grid_h, grid_w): (usize, usize)) -> Result<Vec<Vec<f32>>> {
    if dim % 4 != 0 {
        return Err(SsrlError::config(format!(
            "2D sin-cos embedding width must be divisible by 4, got {}",
            dim
        ))
        .into());
    }
    let cols = (0..grid_h)
        .flat_map(|_| (0..grid_w).map(|j| j as f32))
        .collect::<Vec<_>>();
    let rows = (0..grid_h)
        .flat_map(|i| (0..grid_w).map(move |_| i as f32))
        .collect::<Vec<_>>();
    let emb_w = sincos_1d(dim / 2, &cols)?;
    let emb_h = sincos_1d(dim / 2, &rows)?;

    Ok(emb_w
        .into_iter()
        .zip(emb_h)
        .map(|(mut w, h)| {
            w.extend(h);
            w
        })
        .collect())
}

fn to_tensor(rows: Vec<Vec<f32>>, dim: usize, device: &Device) -> Result<Tensor> {
    let n = rows.len();
    let data = rows.into_iter().flatten().collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, (1, n, dim), device)?)
}

/// [`sincos_1d`] over positions `0..len` as a `(1, len, dim)` tensor.
pub fn sincos_1d_tensor(dim: usize, len: usize, device: &Device) -> Result<Tensor> {
    let positions = (0..len).map(|p| p as f32).collect::<Vec<_>>();
    to_tensor(sincos_1d(dim, &positions)?, dim, device)
}

/// [`sincos_2d`] as a `(1, grid_h * grid_w, dim)` tensor.
pub fn sincos_2d_tensor(dim: usize, grid: (usize, usize), device: &Device) -> Result<Tensor> {
    to_tensor(sincos_2d(dim, grid)?, dim, device)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sincos_1d_values() -> Result<()> {
        let emb = sincos_1d(4, &[0.0, 1.0])?;

        assert_eq!(emb[0], vec![0.0, 0.0, 1.0, 1.0]);
        // ω = [1, 1/100]
        let expected = [1f32.sin(), 0.01f32.sin(), 1f32.cos(), 0.01f32.cos()];
        for (a, b) in emb[1].iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_sincos_is_deterministic() -> Result<()> {
        assert_eq!(sincos_2d(8, (3, 2))?, sincos_2d(8, (3, 2))?);
        Ok(())
    }

    #[test]
    fn test_sincos_2d_layout() -> Result<()> {
        let emb = sincos_2d(8, (2, 3))?;
        assert_eq!(emb.len(), 6);

        // token (i=1, j=2) has index 5
        let w = sincos_1d(4, &[2.0])?;
        let h = sincos_1d(4, &[1.0])?;
        assert_eq!(&emb[5][..4], &w[0][..]);
        assert_eq!(&emb[5][4..], &h[0][..]);
        Ok(())
    }

    #[test]
    fn test_odd_width_is_config_error() {
        let err = sincos_1d(3, &[0.0]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SsrlError>(),
            Some(SsrlError::Config(_))
        ));
        assert!(sincos_2d(6, (2, 2)).is_err());
    }

    #[test]
    fn test_tensor_shape() -> Result<()> {
        let t = sincos_2d_tensor(8, (3, 4), &Device::Cpu)?;
        assert_eq!(t.dims(), &[1, 12, 8]);
        let t = sincos_1d_tensor(8, 5, &Device::Cpu)?;
        assert_eq!(t.dims(), &[1, 5, 8]);
        Ok(())
    }
}
