//! Utilities.
use anyhow::{anyhow, Context, Result};
use candle_core::Tensor;
use candle_nn::VarMap;
use log::trace;

/// Apply soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    trace!("track, tau = {}", tau);
    let dest = dest.data().lock().map_err(|_| anyhow!("Poisoned lock of dest"))?;
    let src = src.data().lock().map_err(|_| anyhow!("Poisoned lock of src"))?;

    for (k, v_dest) in dest.iter() {
        let v_src = src
            .get(k)
            .with_context(|| format!("Variable {} is not in the source", k))?;
        let t_src = (tau * v_src.as_tensor())?;
        let t_dest = ((1.0 - tau) * v_dest.as_tensor())?;
        v_dest.set(&(t_src + t_dest)?)?;
    }

    Ok(())
}

/// Copies every variable of `src` into the variable with the same name in `dest`.
///
/// After the call the two maps hold bit-identical tensors.
pub fn sync(dest: &VarMap, src: &VarMap) -> Result<()> {
    trace!("sync");
    let dest = dest.data().lock().map_err(|_| anyhow!("Poisoned lock of dest"))?;
    let src = src.data().lock().map_err(|_| anyhow!("Poisoned lock of src"))?;

    for (k, v_dest) in dest.iter() {
        let v_src = src
            .get(k)
            .with_context(|| format!("Variable {} is not in the source", k))?;
        v_dest.set(&v_src.as_tensor().copy()?)?;
    }

    Ok(())
}

/// Cosine similarity along the last dimension.
pub fn cosine_similarity(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let x = l2_normalize(x)?;
    let y = l2_normalize(y)?;
    Ok((x * y)?.sum(candle_core::D::Minus1)?)
}

/// Normalizes rows to unit L2 norm, with the norm floored at 1e-8.
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let norm = x
        .sqr()?
        .sum_keepdim(candle_core::D::Minus1)?
        .sqrt()?
        .maximum(1e-8f64)?;
    Ok(x.broadcast_div(&norm)?)
}
