//! Training hyperparameters

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::optimizers::OptimizerKind;
use crate::error::{Error, Result};

/// Hyperparameters of the fit loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainParams {
    /// Optimizer to use
    pub optimizer: OptimizerKind,

    /// Learning rate; `None` uses the optimizer's default
    pub learning_rate: Option<f64>,

    /// Maximum number of epochs
    pub epochs: usize,

    /// Patience of the plateau learning-rate reduction; `None` disables it
    pub reduce_lr: Option<usize>,

    /// Patience of early stopping; `None` disables it
    pub early_stop: Option<usize>,

    /// Mini-batch size
    pub batch_size: usize,

    /// Elementwise gradient clip value
    pub clip_grad: f64,

    /// Fraction of observations (taken from the end) held out for validation
    pub validation_split: f64,

    /// Checkpoint the best weights into `output_dir`
    pub save_weights: bool,

    /// Write an event log into `<output_dir>/tb`
    pub tensorboard: bool,

    /// Reconstruct the raw counts instead of the preprocessed input
    ///
    /// On by default, unlike fitting the normalized matrix itself: the
    /// likelihood takes `ln` of its target inside `lgamma`, so the negative
    /// values of a standardized matrix turn the loss into NaN. Turn it off
    /// only for inputs that stay non-negative.
    pub use_raw_as_output: bool,

    /// Directory for checkpoints and event logs
    pub output_dir: Option<PathBuf>,

    /// Log the model summary and every epoch at info level
    pub verbose: bool,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::RmsProp,
            learning_rate: None,
            epochs: 300,
            reduce_lr: Some(10),
            early_stop: Some(15),
            batch_size: 32,
            clip_grad: 5.0,
            validation_split: 0.1,
            save_weights: false,
            tensorboard: false,
            use_raw_as_output: true,
            output_dir: None,
            verbose: true,
        }
    }
}

impl TrainParams {
    /// Same parameters with the optimizer selected by name
    pub fn optimizer_named(mut self, name: &str) -> Result<Self> {
        self.optimizer = name.parse()?;
        Ok(self)
    }

    /// Learning rate after applying the optimizer default
    pub fn effective_learning_rate(&self) -> f64 {
        self.learning_rate
            .unwrap_or_else(|| self.optimizer.default_learning_rate())
    }

    /// Validate the hyperparameters
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::config("epochs must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be greater than 0"));
        }
        if let Some(lr) = self.learning_rate {
            if !lr.is_finite() || lr < 0.0 {
                return Err(Error::config(format!("learning_rate must be >= 0, got {}", lr)));
            }
        }
        if self.clip_grad.is_nan() || self.clip_grad <= 0.0 {
            return Err(Error::config("clip_grad must be positive"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(Error::config("validation_split must be in [0.0, 1.0)"));
        }
        if self.reduce_lr == Some(0) || self.early_stop == Some(0) {
            return Err(Error::config("callback patience must be greater than 0"));
        }
        Ok(())
    }
}
