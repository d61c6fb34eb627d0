//! Differentiable special functions for likelihood losses

use candle_core::Tensor;

use crate::error::Result;

const HALF_LN_2PI: f64 = 0.918_938_533_204_672_8;

/// Elementwise `ln Γ(x)` for `x > 0`, built from tensor ops so gradients flow.
///
/// Shifts the argument by six with the recurrence `Γ(x + 1) = x Γ(x)` and
/// evaluates the Stirling series on `z = x + 6`.
pub fn lgamma(x: &Tensor) -> Result<Tensor> {
    let mut shift = x.log()?;
    for k in 1..6 {
        shift = (shift + x.affine(1.0, k as f64)?.log()?)?;
    }

    let z = x.affine(1.0, 6.0)?;
    let inv = z.recip()?;
    let inv2 = inv.sqr()?;
    // 1/(12z) - 1/(360z^3) + 1/(1260z^5)
    let series = inv2.affine(1.0 / 1260.0, -1.0 / 360.0)?;
    let series = (&inv2 * &series)?.affine(1.0, 1.0 / 12.0)?;
    let series = (&inv * &series)?;

    let stirling = ((z.affine(1.0, -0.5)? * z.log()?)? - &z)?.affine(1.0, HALF_LN_2PI)?;
    Ok(((stirling + series)? - shift)?)
}

/// Count of non-finite entries
pub fn count_non_finite(x: &Tensor) -> Result<usize> {
    let values = x.flatten_all()?.to_dtype(candle_core::DType::F32)?.to_vec1::<f32>()?;
    Ok(values.iter().filter(|v| !v.is_finite()).count())
}
