//! Plain stochastic gradient descent

use candle_core::backprop::GradStore;

use super::{Optimizer, ParamSet};
use crate::error::Result;

/// SGD without momentum: `w ← w − lr·g`
pub struct Sgd {
    params: ParamSet,
    learning_rate: f64,
    step_count: usize,
}

impl Sgd {
    /// Create a new SGD optimizer
    pub fn new(params: ParamSet, learning_rate: f64) -> Self {
        Self {
            params,
            learning_rate,
            step_count: 0,
        }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &str {
        "sgd"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        for i in 0..self.params.len() {
            let Some(grad) = self.params.gradient(i, gradients)? else {
                continue;
            };
            let var = self.params.var(i);
            let next = (var.as_tensor() - grad.affine(self.learning_rate, 0.0)?)?;
            var.set(&next)?;
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
