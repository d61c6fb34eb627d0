//! Count likelihood losses
//!
//! [`ZinbLoss`] is the negative log-likelihood of a zero-inflated negative
//! binomial, evaluated entrywise on the reconstruction heads of
//! [`ZinbAutoencoder`](crate::model::ZinbAutoencoder) and averaged over the
//! batch. The negative binomial part is exposed separately as [`nb_nll`].

pub mod utils;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::ZinbOutput;
use utils::lgamma;

/// Added inside every log and denominator
pub const EPS: f64 = 1e-10;

/// Upper bound applied to the dispersion before evaluating the likelihood
pub const MAX_THETA: f64 = 1e6;

/// Targets below this are treated as structural zeros
pub const ZERO_THRESHOLD: f64 = 1e-8;

/// Entrywise negative binomial negative log-likelihood.
///
/// `mean` is the size-factor scaled mean and `theta` the dispersion; all
/// three tensors share one shape.
pub fn nb_nll(y: &Tensor, mean: &Tensor, theta: &Tensor) -> Result<Tensor> {
    let theta = theta.minimum(MAX_THETA as f32)?;
    let theta_eps = theta.affine(1.0, EPS)?;

    let t1 = ((lgamma(&theta_eps)? + lgamma(&y.affine(1.0, 1.0)?)?)?
        - lgamma(&(y + &theta_eps)?)?)?;

    let log1p_ratio = (mean / &theta_eps)?.affine(1.0, 1.0)?.log()?;
    let log_ratio = (theta_eps.log()? - mean.affine(1.0, EPS)?.log()?)?;
    let t2 = (((&theta + y)? * log1p_ratio)? + (y * log_ratio)?)?;

    Ok((t1 + t2)?)
}

/// Zero-inflated negative binomial loss with an optional ridge on `pi`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ZinbLoss {
    /// Coefficient of the `pi²` penalty
    pub ridge: f64,
}

impl ZinbLoss {
    /// Create a loss with the given ridge coefficient
    pub fn new(ridge: f64) -> Self {
        Self { ridge }
    }

    /// Entrywise loss before reduction
    pub fn elementwise(&self, y: &Tensor, mean: &Tensor, theta: &Tensor, pi: &Tensor) -> Result<Tensor> {
        let one_minus_pi = pi.affine(-1.0, 1.0)?;

        let nb_case = (nb_nll(y, mean, theta)? - one_minus_pi.affine(1.0, EPS)?.log()?)?;

        let theta = theta.minimum(MAX_THETA as f32)?;
        let denom = (&theta + mean)?.affine(1.0, EPS)?;
        let zero_nb = ((&theta / denom)?.log()? * &theta)?.exp()?;
        let zero_case = (pi + (one_minus_pi * zero_nb)?)?
            .affine(1.0, EPS)?
            .log()?
            .neg()?;

        let is_zero = y.lt(ZERO_THRESHOLD as f32)?;
        let mut result = is_zero.where_cond(&zero_case, &nb_case)?;
        if self.ridge > 0.0 {
            result = (result + pi.sqr()?.affine(self.ridge, 0.0)?)?;
        }
        Ok(result)
    }

    /// Mean loss of a forward pass against targets `y`
    pub fn forward(&self, y: &Tensor, out: &ZinbOutput) -> Result<Tensor> {
        Ok(self
            .elementwise(y, &out.output, &out.dispersion, &out.pi)?
            .mean_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::{Device, Var};

    fn scalar(v: f32) -> Tensor {
        Tensor::new(&[v], &Device::Cpu).unwrap()
    }

    fn loss_at(y: f32, mean: f32, theta: f32, pi: f32, ridge: f64) -> f32 {
        ZinbLoss::new(ridge)
            .elementwise(&scalar(y), &scalar(mean), &scalar(theta), &scalar(pi))
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()[0]
    }

    #[test]
    fn test_zero_count_uses_zero_inflated_case() {
        // (theta / (theta + mu))^theta = 1/2
        assert_relative_eq!(loss_at(0.0, 1.0, 1.0, 0.0, 0.0), 2.0f32.ln(), epsilon = 1e-5);
        // certain dropout explains the zero entirely
        assert!(loss_at(0.0, 1.0, 1.0, 1.0, 0.0).abs() < 1e-5);
    }

    #[test]
    fn test_positive_count_uses_negative_binomial_case() {
        assert_relative_eq!(loss_at(1.0, 1.0, 1.0, 0.0, 0.0), 4.0f32.ln(), epsilon = 1e-4);
        // the dropout mass is removed from the count
        let with_pi = loss_at(1.0, 1.0, 1.0, 0.5, 0.0);
        assert_relative_eq!(with_pi, 4.0f32.ln() + 2.0f32.ln(), epsilon = 1e-4);
    }

    #[test]
    fn test_ridge_penalizes_pi() {
        let plain = loss_at(3.0, 2.0, 5.0, 0.3, 0.0);
        let ridged = loss_at(3.0, 2.0, 5.0, 0.3, 2.0);
        assert_relative_eq!(ridged - plain, 2.0 * 0.09, epsilon = 1e-4);
    }

    #[test]
    fn test_large_theta_is_clipped() {
        let clipped = loss_at(2.0, 2.0, 1e6, 0.0, 0.0);
        let huge = loss_at(2.0, 2.0, 1e9, 0.0, 0.0);
        assert!(clipped.is_finite());
        assert_relative_eq!(clipped, huge, epsilon = 1e-3);
    }

    #[test]
    fn test_gradients_flow_to_every_head() {
        let device = Device::Cpu;
        let y = Tensor::new(&[[0.0f32, 2.0], [5.0, 0.0]], &device).unwrap();
        let mean = Var::new(&[[1.0f32, 1.5], [4.0, 0.5]], &device).unwrap();
        let theta = Var::new(&[[2.0f32, 2.0], [2.0, 2.0]], &device).unwrap();
        let pi = Var::new(&[[0.2f32, 0.2], [0.2, 0.2]], &device).unwrap();

        let out = ZinbOutput {
            output: mean.as_tensor().clone(),
            mean: mean.as_tensor().clone(),
            dispersion: theta.as_tensor().clone(),
            pi: pi.as_tensor().clone(),
        };
        let loss = ZinbLoss::new(0.0).forward(&y, &out).unwrap();
        assert!(loss.to_scalar::<f32>().unwrap().is_finite());

        let grads = loss.backward().unwrap();
        for var in [&mean, &theta, &pi] {
            let g = grads.get(var).expect("missing gradient");
            let values = g.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert!(values.iter().all(|v| v.is_finite()));
            assert!(values.iter().any(|v| *v != 0.0));
        }
    }

    #[test]
    fn test_nb_nll_is_minimized_near_observed_count() {
        let y = scalar(4.0);
        let theta = scalar(10.0);
        let at = |m: f32| nb_nll(&y, &scalar(m), &theta).unwrap().to_vec1::<f32>().unwrap()[0];
        assert!(at(4.0) < at(2.0));
        assert!(at(4.0) < at(8.0));
    }
}
