//! Autoencoder architecture configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Hidden-layer activation functions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// ReLU activation
    Relu,
    /// ELU activation (alpha = 1)
    Elu,
    /// Scaled ELU
    Selu,
    /// Tanh activation
    Tanh,
    /// Logistic sigmoid
    Sigmoid,
    /// No activation
    Linear,
}

/// Kernel initialization schemes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KernelInit {
    /// Uniform in `±sqrt(6 / (fan_in + fan_out))`
    GlorotUniform,
    /// Normal with std `sqrt(2 / (fan_in + fan_out))`
    GlorotNormal,
    /// Uniform in `±sqrt(6 / fan_in)`
    HeUniform,
    /// Normal with std `sqrt(2 / fan_in)`
    HeNormal,
}

impl KernelInit {
    /// Initializer for a `(fan_out, fan_in)` kernel
    pub fn to_init(self, fan_in: usize, fan_out: usize) -> candle_nn::Init {
        let fan_avg = (fan_in + fan_out) as f64;
        match self {
            KernelInit::GlorotUniform => {
                let bound = (6.0 / fan_avg).sqrt();
                candle_nn::Init::Uniform { lo: -bound, up: bound }
            }
            KernelInit::GlorotNormal => candle_nn::Init::Randn {
                mean: 0.0,
                stdev: (2.0 / fan_avg).sqrt(),
            },
            KernelInit::HeUniform => {
                let bound = (6.0 / fan_in as f64).sqrt();
                candle_nn::Init::Uniform { lo: -bound, up: bound }
            }
            KernelInit::HeNormal => candle_nn::Init::Randn {
                mean: 0.0,
                stdev: (2.0 / fan_in as f64).sqrt(),
            },
        }
    }
}

/// ZINB autoencoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of input features; bound to the matrix width at build time
    pub input_size: usize,
    /// Number of reconstructed features; bound to the matrix width at build time
    pub output_size: usize,
    /// Hidden layer widths; the middle one is the bottleneck
    pub hidden_sizes: Vec<usize>,
    /// L1 penalty on decoder and output kernels
    pub l1_coef: f64,
    /// L2 penalty on decoder and output kernels
    pub l2_coef: f64,
    /// L1 penalty on encoder and bottleneck kernels (falls back to `l1_coef` when zero)
    pub l1_enc_coef: f64,
    /// L2 penalty on encoder and bottleneck kernels (falls back to `l2_coef` when zero)
    pub l2_enc_coef: f64,
    /// Ridge penalty on the dropout probabilities
    pub ridge: f64,
    /// Dropout after every hidden layer
    pub hidden_dropout: f32,
    /// Dropout on the input layer
    pub input_dropout: f32,
    /// Batch normalization after every hidden dense layer
    pub batchnorm: bool,
    /// Hidden activation
    pub activation: Activation,
    /// Kernel initialization
    pub init: KernelInit,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_size: 0,
            output_size: 0,
            hidden_sizes: vec![64, 32, 64],
            l1_coef: 0.0,
            l2_coef: 0.0,
            l1_enc_coef: 0.0,
            l2_enc_coef: 0.0,
            ridge: 0.0,
            hidden_dropout: 0.0,
            input_dropout: 0.0,
            batchnorm: true,
            activation: Activation::Relu,
            init: KernelInit::GlorotUniform,
        }
    }
}

impl ModelConfig {
    /// Same configuration with input and output bound to `n_features`
    pub fn with_features(mut self, n_features: usize) -> Self {
        self.input_size = n_features;
        self.output_size = n_features;
        self
    }

    /// Validate the configuration shape-independent fields
    pub fn validate(&self) -> Result<()> {
        if self.hidden_sizes.is_empty() {
            return Err(Error::config("hidden_sizes must not be empty"));
        }
        if self.hidden_sizes.iter().any(|&h| h == 0) {
            return Err(Error::config("hidden layer widths must be > 0"));
        }
        for (name, rate) in [
            ("hidden_dropout", self.hidden_dropout),
            ("input_dropout", self.input_dropout),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::config(format!("{} must be in [0.0, 1.0)", name)));
            }
        }
        for (name, coef) in [
            ("l1_coef", self.l1_coef),
            ("l2_coef", self.l2_coef),
            ("l1_enc_coef", self.l1_enc_coef),
            ("l2_enc_coef", self.l2_enc_coef),
            ("ridge", self.ridge),
        ] {
            if coef < 0.0 {
                return Err(Error::config(format!("{} must be non-negative", name)));
            }
        }
        Ok(())
    }

    /// Validate including the bound input/output sizes
    pub fn validate_built(&self) -> Result<()> {
        self.validate()?;
        if self.input_size == 0 || self.output_size == 0 {
            return Err(Error::config("input_size and output_size must be > 0"));
        }
        Ok(())
    }
}
