//! Dense layers and activations used by the autoencoder

use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use super::config::{Activation, KernelInit};
use crate::error::Result;

const SELU_ALPHA: f64 = 1.673_263_242_354_377_3;
const SELU_SCALE: f64 = 1.050_700_987_355_480_5;

/// Fully connected layer with its own regularization coefficients
#[derive(Debug, Clone)]
pub struct Dense {
    name: String,
    linear: Linear,
    l1: f64,
    l2: f64,
}

impl Dense {
    /// Create a dense layer whose parameters are registered under `vb`
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        init: KernelInit,
        l1: f64,
        l2: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints((out_dim, in_dim), "weight", init.to_init(in_dim, out_dim))?;
        let bias = vb.get_with_hints(out_dim, "bias", candle_nn::Init::Const(0.0))?;
        Ok(Self {
            name: vb.prefix(),
            linear: Linear::new(weight, Some(bias)),
            l1,
            l2,
        })
    }

    /// Layer name (the variable prefix)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output width
    pub fn out_dim(&self) -> usize {
        self.linear.weight().dim(0).unwrap_or(0)
    }

    /// Number of trainable parameters
    pub fn parameter_count(&self) -> usize {
        self.linear.weight().elem_count() + self.linear.bias().map_or(0, |b| b.elem_count())
    }

    /// Affine transform
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.linear.forward(x)?)
    }

    /// `l1 * sum|W| + l2 * sum W^2` over the kernel, if any coefficient is set
    pub fn penalty(&self) -> Result<Option<Tensor>> {
        let weight = self.linear.weight();
        let mut total: Option<Tensor> = None;
        if self.l1 > 0.0 {
            total = Some(weight.abs()?.sum_all()?.affine(self.l1, 0.0)?);
        }
        if self.l2 > 0.0 {
            let l2 = weight.sqr()?.sum_all()?.affine(self.l2, 0.0)?;
            total = Some(match total {
                Some(t) => (t + l2)?,
                None => l2,
            });
        }
        Ok(total)
    }
}

/// Numerically stable `ln(1 + e^x)`
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    Ok((x.relu()? + tail)?)
}

/// Apply a hidden activation
pub fn activate(x: &Tensor, activation: Activation) -> Result<Tensor> {
    let out = match activation {
        Activation::Relu => x.relu()?,
        Activation::Elu => x.elu(1.0)?,
        Activation::Selu => x.elu(SELU_ALPHA)?.affine(SELU_SCALE, 0.0)?,
        Activation::Tanh => x.tanh()?,
        Activation::Sigmoid => candle_nn::ops::sigmoid(x)?,
        Activation::Linear => x.clone(),
    };
    Ok(out)
}

/// Mean head activation: `clip(exp(x), 1e-5, 1e6)`
pub fn mean_activation(x: &Tensor) -> Result<Tensor> {
    Ok(x.exp()?.clamp(1e-5f32, 1e6f32)?)
}

/// Dispersion head activation: `clip(softplus(x), 1e-4, 1e4)`
pub fn dispersion_activation(x: &Tensor) -> Result<Tensor> {
    Ok(softplus(x)?.clamp(1e-4f32, 1e4f32)?)
}
