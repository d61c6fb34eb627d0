//! Adaptive per-parameter rate optimizers: RMSprop, Adagrad, Adadelta

use candle_core::backprop::GradStore;
use candle_core::Var;

use super::{Optimizer, ParamSet, EPSILON};
use crate::error::Result;

/// RMSprop: divides the step by a running RMS of recent gradients
pub struct RmsProp {
    params: ParamSet,
    learning_rate: f64,
    rho: f64,
    accumulators: Vec<Var>,
    step_count: usize,
}

impl RmsProp {
    /// Create RMSprop with `rho = 0.9`
    pub fn new(params: ParamSet, learning_rate: f64) -> Result<Self> {
        Ok(Self {
            accumulators: params.zeros_like()?,
            params,
            learning_rate,
            rho: 0.9,
            step_count: 0,
        })
    }
}

impl Optimizer for RmsProp {
    fn name(&self) -> &str {
        "rmsprop"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        for i in 0..self.params.len() {
            let Some(grad) = self.params.gradient(i, gradients)? else {
                continue;
            };
            let acc = &self.accumulators[i];
            let new_acc = (acc.affine(self.rho, 0.0)? + grad.sqr()?.affine(1.0 - self.rho, 0.0)?)?;

            let denom = new_acc.sqrt()?.affine(1.0, EPSILON)?;
            let update = (grad / denom)?.affine(self.learning_rate, 0.0)?;
            let var = self.params.var(i);
            var.set(&(var.as_tensor() - update)?)?;
            acc.set(&new_acc)?;
        }
        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn step_count(&self) -> usize {
        self.step_count
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }
}

/// Adagrad: divides the step by the root of all past squared gradients
pub struct Adagrad {
    params: ParamSet,
    learning_rate: f64,
    accumulators: Vec<Var>,
    step_count: usize,
}

impl Adagrad {
    /// Create Adagrad with zero-initialized accumulators
    pub fn new(params: ParamSet, learning_rate: f64) -> Result<Self> {
        Ok(Self {
            accumulators: params.zeros_like()?,
            params,
            learning_rate,
            step_count: 0,
        })
    }
}

impl Optimizer for Adagrad {
    fn name(&self) -> &str {
        "adagrad"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        for i in 0..self.params.len() {
            let Some(grad) = self.params.gradient(i, gradients)? else {
                continue;
            };
            let acc = &self.accumulators[i];
            let new_acc = (acc.as_tensor() + grad.sqr()?)?;

            let denom = new_acc.sqrt()?.affine(1.0, EPSILON)?;
            let update = (grad / denom)?.affine(self.learning_rate, 0.0)?;
            let var = self.params.var(i);
            var.set(&(var.as_tensor() - update)?)?;
            acc.set(&new_acc)?;
        }
        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn step_count(&self) -> usize {
        self.step_count
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }
}

/// Adadelta: scales each step by the ratio of running update and gradient RMS
pub struct Adadelta {
    params: ParamSet,
    learning_rate: f64,
    rho: f64,
    accumulators: Vec<Var>,
    delta_accumulators: Vec<Var>,
    step_count: usize,
}

impl Adadelta {
    /// Create Adadelta with `rho = 0.95`
    pub fn new(params: ParamSet, learning_rate: f64) -> Result<Self> {
        Ok(Self {
            accumulators: params.zeros_like()?,
            delta_accumulators: params.zeros_like()?,
            params,
            learning_rate,
            rho: 0.95,
            step_count: 0,
        })
    }
}

impl Optimizer for Adadelta {
    fn name(&self) -> &str {
        "adadelta"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        for i in 0..self.params.len() {
            let Some(grad) = self.params.gradient(i, gradients)? else {
                continue;
            };
            let acc = &self.accumulators[i];
            let delta_acc = &self.delta_accumulators[i];

            let new_acc = (acc.affine(self.rho, 0.0)? + grad.sqr()?.affine(1.0 - self.rho, 0.0)?)?;
            let ratio = (delta_acc.affine(1.0, EPSILON)?.sqrt()? / new_acc.affine(1.0, EPSILON)?.sqrt()?)?;
            let update = (grad * ratio)?;

            let var = self.params.var(i);
            var.set(&(var.as_tensor() - update.affine(self.learning_rate, 0.0)?)?)?;

            let new_delta =
                (delta_acc.affine(self.rho, 0.0)? + update.sqr()?.affine(1.0 - self.rho, 0.0)?)?;
            acc.set(&new_acc)?;
            delta_acc.set(&new_delta)?;
        }
        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn step_count(&self) -> usize {
        self.step_count
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }
}
