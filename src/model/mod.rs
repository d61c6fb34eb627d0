//! Zero-inflated negative binomial autoencoder
//!
//! The network compresses a cells × genes matrix through a bottleneck and
//! emits, for every entry, the three parameters of a ZINB distribution:
//! the mean (scaled by the cell's size factor), the dispersion and the
//! dropout probability. Parameters live in a [`VarMap`] so they can be
//! optimized, checkpointed and restored by name.

use std::fmt;
use std::path::Path;

use candle_core::{DType, Device, ModuleT, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Dropout, VarBuilder, VarMap};
use tracing::debug;

use crate::error::Result;

pub mod config;
pub mod layers;

pub use config::{Activation, KernelInit, ModelConfig};
pub use layers::Dense;

/// Which part of the network a hidden layer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Before the bottleneck
    Encoder,
    /// The bottleneck itself
    Center,
    /// After the bottleneck
    Decoder,
}

#[derive(Debug, Clone)]
struct HiddenLayer {
    stage: Stage,
    dense: Dense,
    batch_norm: Option<BatchNorm>,
}

/// Per-entry ZINB parameters produced by a forward pass
#[derive(Debug, Clone)]
pub struct ZinbOutput {
    /// Mean multiplied by the size factor (the reconstruction)
    pub output: Tensor,
    /// Unscaled mean
    pub mean: Tensor,
    /// Dispersion (theta)
    pub dispersion: Tensor,
    /// Dropout probability
    pub pi: Tensor,
}

/// ZINB autoencoder
pub struct ZinbAutoencoder {
    config: ModelConfig,
    var_map: VarMap,
    hidden: Vec<HiddenLayer>,
    pi: Dense,
    dispersion: Dense,
    mean: Dense,
    input_dropout: Dropout,
    hidden_dropout: Dropout,
    device: Device,
}

impl fmt::Debug for ZinbAutoencoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZinbAutoencoder")
            .field("config", &self.config)
            .field("hidden", &self.hidden)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl ZinbAutoencoder {
    /// Build the network; `config.input_size` and `config.output_size` must be set
    pub fn new(config: ModelConfig, device: &Device) -> Result<Self> {
        config.validate_built()?;

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let center_idx = config.hidden_sizes.len() / 2;

        let mut hidden = Vec::with_capacity(config.hidden_sizes.len());
        let mut in_dim = config.input_size;
        for (i, &size) in config.hidden_sizes.iter().enumerate() {
            let (name, stage) = if i == center_idx {
                ("center".to_string(), Stage::Center)
            } else if i < center_idx {
                (format!("enc{}", i), Stage::Encoder)
            } else {
                (format!("dec{}", i - center_idx), Stage::Decoder)
            };

            let (l1, l2) = match stage {
                Stage::Encoder | Stage::Center => (
                    if config.l1_enc_coef != 0.0 { config.l1_enc_coef } else { config.l1_coef },
                    if config.l2_enc_coef != 0.0 { config.l2_enc_coef } else { config.l2_coef },
                ),
                Stage::Decoder => (config.l1_coef, config.l2_coef),
            };

            let dense = Dense::new(in_dim, size, config.init, l1, l2, vb.pp(&name))?;
            let batch_norm = if config.batchnorm {
                let bn_config = BatchNormConfig {
                    eps: 1e-3,
                    remove_mean: true,
                    affine: true,
                    momentum: 0.01,
                };
                Some(candle_nn::batch_norm(size, bn_config, vb.pp(format!("{}_bn", name)))?)
            } else {
                None
            };

            hidden.push(HiddenLayer {
                stage,
                dense,
                batch_norm,
            });
            in_dim = size;
        }

        let out_dim = config.output_size;
        let pi = Dense::new(in_dim, out_dim, config.init, config.l1_coef, config.l2_coef, vb.pp("pi"))?;
        let dispersion = Dense::new(
            in_dim,
            out_dim,
            config.init,
            config.l1_coef,
            config.l2_coef,
            vb.pp("dispersion"),
        )?;
        let mean = Dense::new(in_dim, out_dim, config.init, config.l1_coef, config.l2_coef, vb.pp("mean"))?;

        debug!(
            "Built ZINB autoencoder {} -> {:?} -> {}",
            config.input_size, config.hidden_sizes, config.output_size
        );

        Ok(Self {
            input_dropout: Dropout::new(config.input_dropout),
            hidden_dropout: Dropout::new(config.hidden_dropout),
            config,
            var_map,
            hidden,
            pi,
            dispersion,
            mean,
            device: device.clone(),
        })
    }

    /// Architecture configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Parameter store
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    /// Device the parameters live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Forward pass; `size_factors` is `(batch, 1)`
    pub fn forward(&self, x: &Tensor, size_factors: &Tensor, train: bool) -> Result<ZinbOutput> {
        let mut h = if self.config.input_dropout > 0.0 {
            self.input_dropout.forward_t(x, train)?
        } else {
            x.clone()
        };

        for layer in &self.hidden {
            h = layer.dense.forward(&h)?;
            if let Some(bn) = &layer.batch_norm {
                h = bn.forward_t(&h, train)?;
            }
            h = layers::activate(&h, self.config.activation)?;
            if self.config.hidden_dropout > 0.0 {
                h = self.hidden_dropout.forward_t(&h, train)?;
            }
        }

        let pi = candle_nn::ops::sigmoid(&self.pi.forward(&h)?)?;
        let dispersion = layers::dispersion_activation(&self.dispersion.forward(&h)?)?;
        let mean = layers::mean_activation(&self.mean.forward(&h)?)?;
        let output = mean.broadcast_mul(size_factors)?;

        Ok(ZinbOutput {
            output,
            mean,
            dispersion,
            pi,
        })
    }

    /// Inference-mode forward pass
    pub fn predict(&self, x: &Tensor, size_factors: &Tensor) -> Result<ZinbOutput> {
        self.forward(x, size_factors, false)
    }

    /// Sum of the kernel penalties of every layer, if any is configured
    pub fn regularization(&self) -> Result<Option<Tensor>> {
        let mut total: Option<Tensor> = None;
        let dense_layers = self
            .hidden
            .iter()
            .map(|l| &l.dense)
            .chain([&self.pi, &self.dispersion, &self.mean]);
        for dense in dense_layers {
            if let Some(p) = dense.penalty()? {
                total = Some(match total {
                    Some(t) => (t + p)?,
                    None => p,
                });
            }
        }
        Ok(total)
    }

    /// Number of trainable parameters
    pub fn parameter_count(&self) -> usize {
        self.summary().rows.iter().map(|r| r.params).sum()
    }

    /// Layer table
    pub fn summary(&self) -> ModelSummary {
        let mut rows = vec![
            SummaryRow::new("count", "Input", self.config.input_size, 0),
            SummaryRow::new("size_factors", "Input", 1, 0),
        ];
        for layer in &self.hidden {
            let width = layer.dense.out_dim();
            rows.push(SummaryRow::new(
                layer.dense.name(),
                "Dense",
                width,
                layer.dense.parameter_count(),
            ));
            if layer.batch_norm.is_some() {
                rows.push(SummaryRow::new(
                    &format!("{}_bn", layer.dense.name()),
                    "BatchNorm",
                    width,
                    2 * width,
                ));
            }
        }
        for head in [&self.pi, &self.dispersion, &self.mean] {
            rows.push(SummaryRow::new(head.name(), "Dense", head.out_dim(), head.parameter_count()));
        }
        rows.push(SummaryRow::new("output", "ColumnScale", self.config.output_size, 0));
        ModelSummary { rows }
    }

    /// Hidden layer stages in order
    pub fn stages(&self) -> Vec<Stage> {
        self.hidden.iter().map(|l| l.stage).collect()
    }

    /// Restore weights written by a checkpoint
    pub fn load_weights(&mut self, path: &Path) -> Result<()> {
        crate::training::checkpoints::load_weights(&mut self.var_map, path)
    }
}

/// One line of [`ModelSummary`]
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// Layer name
    pub name: String,
    /// Layer kind
    pub kind: &'static str,
    /// Output width
    pub width: usize,
    /// Trainable parameters
    pub params: usize,
}

impl SummaryRow {
    fn new(name: &str, kind: &'static str, width: usize, params: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            width,
            params,
        }
    }
}

/// Printable overview of the network
#[derive(Debug, Clone)]
pub struct ModelSummary {
    /// Layers in forward order
    pub rows: Vec<SummaryRow>,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<16} {:<12} {:<14} {:>10}", "Layer", "Type", "Output Shape", "Param #")?;
        writeln!(f, "{}", "=".repeat(55))?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<16} {:<12} {:<14} {:>10}",
                row.name,
                row.kind,
                format!("(None, {})", row.width),
                row.params
            )?;
        }
        writeln!(f, "{}", "=".repeat(55))?;
        write!(f, "Total params: {}", self.rows.iter().map(|r| r.params).sum::<usize>())
    }
}
