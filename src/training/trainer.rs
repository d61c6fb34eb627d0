//! Fit loop for the ZINB autoencoder
//!
//! [`Trainer`] owns the model, the optimizer and the callbacks. A call to
//! [`Trainer::fit`] holds out the last `validation_split` fraction of the
//! observations, then runs shuffled mini-batch epochs until the epoch budget
//! is spent or a callback asks to stop.

use std::fs;

use candle_core::{Device, Tensor};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::callbacks::{Callback, CallbackContext, EarlyStopping, MetricsLogger, ReduceLrOnPlateau};
use super::checkpoints::ModelCheckpoint;
use super::config::TrainParams;
use super::loss::utils::count_non_finite;
use super::loss::ZinbLoss;
use super::metrics::EpochLogs;
use super::optimizers::{create_optimizer, Optimizer};
use crate::context::ExecutionContext;
use crate::data::AnnData;
use crate::error::{Error, Result};
use crate::model::{ModelConfig, ZinbAutoencoder};

/// Sub-directory of the output directory holding the event log
pub const EVENT_LOG_DIR: &str = "tb";

/// Per-epoch record of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Metrics of every completed epoch
    pub epochs: Vec<EpochLogs>,
    /// Epoch at which a callback stopped training, if any
    pub stopped_epoch: Option<usize>,
    /// Lowest validation loss seen
    pub best_val_loss: Option<f64>,
}

impl History {
    /// Number of completed epochs
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    /// Whether no epoch completed
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Training loss per epoch
    pub fn loss(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    /// Validation loss per epoch, when validation was run
    pub fn val_loss(&self) -> Option<Vec<f64>> {
        self.epochs.iter().map(|e| e.val_loss).collect()
    }

    /// Learning rate per epoch
    pub fn lr(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.lr).collect()
    }

    fn push(&mut self, logs: EpochLogs) {
        if let Some(val_loss) = logs.val_loss {
            if self.best_val_loss.map_or(true, |best| val_loss < best) {
                self.best_val_loss = Some(val_loss);
            }
        }
        self.epochs.push(logs);
    }
}

/// A fitted model together with its history
#[derive(Debug)]
pub struct TrainOutcome {
    /// Trained network
    pub model: ZinbAutoencoder,
    /// Loss history
    pub history: History,
}

/// Rows of the fit inputs as device tensors
struct Batches {
    x: Tensor,
    size_factors: Tensor,
    target: Tensor,
}

impl Batches {
    fn rows(&self, indices: &[u32], device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
        let idx = Tensor::from_slice(indices, indices.len(), device)?;
        Ok((
            self.x.index_select(&idx, 0)?,
            self.size_factors.index_select(&idx, 0)?,
            self.target.index_select(&idx, 0)?,
        ))
    }
}

/// Copy a host matrix to the device
pub fn array_to_tensor(array: &Array2<f32>, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = array.iter().copied().collect();
    Ok(Tensor::from_vec(data, array.dim(), device)?)
}

/// Trainer for [`ZinbAutoencoder`]
pub struct Trainer {
    model: ZinbAutoencoder,
    params: TrainParams,
    optimizer: Box<dyn Optimizer>,
    loss: ZinbLoss,
    callbacks: Vec<Box<dyn Callback>>,
    rng: StdRng,
}

impl Trainer {
    /// Compile `model` with the optimizer and callbacks selected by `params`
    pub fn new(model: ZinbAutoencoder, params: TrainParams, seed: u64) -> Result<Self> {
        params.validate()?;

        let optimizer = create_optimizer(
            params.optimizer,
            params.learning_rate,
            params.clip_grad,
            model.var_map(),
        )?;
        let loss = ZinbLoss::new(model.config().ridge);
        let callbacks = Self::default_callbacks(&params)?;
        debug!(
            "Compiled model with {} over {} parameter tensors, {} callbacks",
            optimizer.name(),
            optimizer.parameter_count(),
            callbacks.len()
        );

        Ok(Self {
            model,
            params,
            optimizer,
            loss,
            callbacks,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn default_callbacks(params: &TrainParams) -> Result<Vec<Box<dyn Callback>>> {
        let mut callbacks: Vec<Box<dyn Callback>> = Vec::new();
        if let Some(dir) = &params.output_dir {
            fs::create_dir_all(dir)?;
        }

        if params.save_weights {
            match &params.output_dir {
                Some(dir) => callbacks.push(Box::new(ModelCheckpoint::new(dir, params.verbose))),
                None => warn!("save_weights is set but no output directory was given"),
            }
        }
        if let Some(patience) = params.reduce_lr {
            callbacks.push(Box::new(ReduceLrOnPlateau::new(patience, params.verbose)));
        }
        if let Some(patience) = params.early_stop {
            callbacks.push(Box::new(EarlyStopping::new(patience)));
        }
        if params.tensorboard {
            match &params.output_dir {
                Some(dir) => callbacks.push(Box::new(MetricsLogger::new(&dir.join(EVENT_LOG_DIR))?)),
                None => warn!("tensorboard is set but no output directory was given"),
            }
        }
        Ok(callbacks)
    }

    /// Names of the registered callbacks, in call order
    pub fn callback_names(&self) -> Vec<&str> {
        self.callbacks.iter().map(|c| c.name()).collect()
    }

    /// Model being trained
    pub fn model(&self) -> &ZinbAutoencoder {
        &self.model
    }

    /// Give up the trained model
    pub fn into_model(self) -> ZinbAutoencoder {
        self.model
    }

    /// Number of NaN or infinite entries across all trainable weights
    pub fn non_finite_weights(&self) -> Result<usize> {
        let vars = self.model.var_map().all_vars();
        let mut count = 0;
        for var in &vars {
            count += count_non_finite(var.as_tensor())?;
        }
        Ok(count)
    }

    /// Loss of one batch including the kernel penalties
    fn batch_loss(&self, x: &Tensor, size_factors: &Tensor, target: &Tensor, train: bool) -> Result<Tensor> {
        let out = self.model.forward(x, size_factors, train)?;
        let mut loss = self.loss.forward(target, &out)?;
        if let Some(penalty) = self.model.regularization()? {
            loss = (loss + penalty)?;
        }
        Ok(loss)
    }

    fn prepare_inputs(&self, adata: &AnnData) -> Result<Batches> {
        let device = self.model.device();
        let config = self.model.config();

        let target = match (self.params.use_raw_as_output, adata.raw()) {
            (true, Some(raw)) => raw,
            (true, None) => {
                warn!("No raw counts stored; reconstructing the input matrix");
                adata.x()
            }
            (false, _) => adata.x(),
        };
        if adata.n_vars() != config.input_size || target.ncols() != config.output_size {
            return Err(Error::invalid_input(format!(
                "model expects {} -> {} features, data has {} -> {}",
                config.input_size,
                config.output_size,
                adata.n_vars(),
                target.ncols()
            )));
        }

        let sf: Vec<f32> = adata.size_factors()?.iter().map(|&v| v as f32).collect();
        Ok(Batches {
            x: array_to_tensor(adata.x(), device)?,
            size_factors: Tensor::from_vec(sf, (adata.n_obs(), 1), device)?,
            target: array_to_tensor(target, device)?,
        })
    }

    /// Size-weighted mean loss over `indices` in inference mode
    fn evaluate(&self, batches: &Batches, indices: &[u32]) -> Result<f64> {
        let device = self.model.device();
        let mut total = 0.0;
        for chunk in indices.chunks(self.params.batch_size) {
            let (x, sf, y) = batches.rows(chunk, device)?;
            let loss = self.batch_loss(&x, &sf, &y, false)?;
            total += loss.to_scalar::<f32>()? as f64 * chunk.len() as f64;
        }
        Ok(total / indices.len() as f64)
    }

    fn train_epoch(&mut self, batches: &Batches, order: &mut [u32]) -> Result<f64> {
        order.shuffle(&mut self.rng);
        let device = self.model.device().clone();

        let mut total = 0.0;
        for chunk in order.chunks(self.params.batch_size) {
            let (x, sf, y) = batches.rows(chunk, &device)?;
            let loss = self.batch_loss(&x, &sf, &y, true)?;
            let grads = loss.backward()?;
            self.optimizer.step(&grads)?;
            total += loss.to_scalar::<f32>()? as f64 * chunk.len() as f64;
        }
        Ok(total / order.len() as f64)
    }

    fn log_epoch(&self, logs: &EpochLogs) {
        let val = logs
            .val_loss
            .map(|v| format!(" - val_loss: {:.4}", v))
            .unwrap_or_default();
        if self.params.verbose {
            info!(
                "Epoch {}/{} - loss: {:.4}{} - lr: {:e}",
                logs.epoch + 1,
                self.params.epochs,
                logs.loss,
                val,
                logs.lr
            );
        } else {
            debug!(
                "Epoch {}/{} - loss: {:.4}{} - lr: {:e}",
                logs.epoch + 1,
                self.params.epochs,
                logs.loss,
                val,
                logs.lr
            );
        }
    }

    /// Train on every observation of `adata` inside the context's thread pool
    #[instrument(skip_all, fields(n_obs = adata.n_obs(), n_vars = adata.n_vars()))]
    pub fn fit(&mut self, ctx: &ExecutionContext, adata: &AnnData) -> Result<History> {
        ctx.install(|| self.run(adata))
    }

    fn run(&mut self, adata: &AnnData) -> Result<History> {
        let batches = self.prepare_inputs(adata)?;

        let n = adata.n_obs();
        let split_at = if self.params.validation_split > 0.0 {
            (n as f64 * (1.0 - self.params.validation_split)) as usize
        } else {
            n
        };
        if split_at == 0 {
            return Err(Error::invalid_input(format!(
                "no observations left for training after a {} validation split of {} rows",
                self.params.validation_split, n
            )));
        }
        let mut order: Vec<u32> = (0..split_at as u32).collect();
        let val_indices: Vec<u32> = (split_at as u32..n as u32).collect();

        if self.params.verbose {
            info!("Model summary:\n{}", self.model.summary());
        }
        info!(
            "Training on {} samples, validating on {} samples with {}",
            split_at,
            val_indices.len(),
            self.optimizer.name()
        );

        {
            let mut cb_ctx = CallbackContext::new(&self.model, self.optimizer.learning_rate());
            for callback in self.callbacks.iter_mut() {
                callback.on_train_begin(&mut cb_ctx)?;
            }
        }

        let mut history = History::default();
        for epoch in 0..self.params.epochs {
            let lr = self.optimizer.learning_rate();
            let loss = self.train_epoch(&batches, &mut order)?;
            let val_loss = if val_indices.is_empty() {
                None
            } else {
                Some(self.evaluate(&batches, &val_indices)?)
            };
            if !loss.is_finite() {
                warn!(
                    "Epoch {}: training loss is not finite ({} non-finite weights)",
                    epoch + 1,
                    self.non_finite_weights()?
                );
            }

            let logs = EpochLogs {
                epoch,
                loss,
                val_loss,
                lr,
            };
            self.log_epoch(&logs);
            history.push(logs);

            let mut cb_ctx = CallbackContext::new(&self.model, lr);
            for callback in self.callbacks.iter_mut() {
                callback.on_epoch_end(&logs, &mut cb_ctx)?;
            }
            if cb_ctx.learning_rate != lr {
                self.optimizer.set_learning_rate(cb_ctx.learning_rate);
            }
            if cb_ctx.stop_training {
                history.stopped_epoch = Some(epoch);
                break;
            }
        }

        let mut cb_ctx = CallbackContext::new(&self.model, self.optimizer.learning_rate());
        for callback in self.callbacks.iter_mut() {
            callback.on_train_end(&mut cb_ctx)?;
        }
        info!("Finished training after {} epochs", history.len());
        Ok(history)
    }
}

/// Build a model for `adata` and fit it
#[instrument(skip_all)]
pub fn train(
    ctx: &ExecutionContext,
    adata: &AnnData,
    model_config: &ModelConfig,
    params: &TrainParams,
) -> Result<TrainOutcome> {
    params.validate()?;
    let config = model_config.clone().with_features(adata.n_vars());
    let model = ZinbAutoencoder::new(config, ctx.device())?;

    let mut trainer = Trainer::new(model, params.clone(), ctx.seed())?;
    let history = trainer.fit(ctx, adata)?;
    Ok(TrainOutcome {
        model: trainer.into_model(),
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Column, SIZE_FACTORS_KEY};
    use crate::training::optimizers::OptimizerKind;
    use ndarray::Array2;

    fn toy_adata(n_obs: usize, n_vars: usize) -> AnnData {
        let x = Array2::from_shape_fn((n_obs, n_vars), |(i, j)| ((i * 3 + j * 5) % 7) as f32);
        let obs = (0..n_obs).map(|i| format!("c{}", i)).collect();
        let var = (0..n_vars).map(|j| format!("g{}", j)).collect();
        let mut adata = AnnData::new(x, obs, var).unwrap();
        adata.freeze_raw();
        adata
            .obs_mut()
            .insert(SIZE_FACTORS_KEY, Column::Numeric(vec![1.0; n_obs]))
            .unwrap();
        adata
    }

    fn small_config() -> ModelConfig {
        ModelConfig {
            hidden_sizes: vec![8, 4, 8],
            ..ModelConfig::default()
        }
    }

    fn quiet_params(epochs: usize) -> TrainParams {
        TrainParams {
            epochs,
            batch_size: 8,
            verbose: false,
            ..TrainParams::default()
        }
    }

    #[test]
    fn test_history_tracks_best_val_loss() {
        let mut history = History::default();
        for (epoch, val) in [3.0, 1.0, 2.0].into_iter().enumerate() {
            history.push(EpochLogs {
                epoch,
                loss: val + 1.0,
                val_loss: Some(val),
                lr: 0.1,
            });
        }
        assert_eq!(history.best_val_loss, Some(1.0));
        assert_eq!(history.loss(), vec![4.0, 2.0, 3.0]);
        assert_eq!(history.val_loss(), Some(vec![3.0, 1.0, 2.0]));
    }

    #[test]
    fn test_fit_records_every_epoch() {
        let ctx = ExecutionContext::cpu(0);
        let adata = toy_adata(40, 6);
        let outcome = train(&ctx, &adata, &small_config(), &quiet_params(3)).unwrap();

        assert_eq!(outcome.history.len(), 3);
        assert!(outcome.history.loss().iter().all(|l| l.is_finite()));
        assert_eq!(outcome.history.val_loss().map(|v| v.len()), Some(3));
        assert_eq!(outcome.model.config().input_size, 6);
    }

    #[test]
    fn test_training_reduces_loss() {
        let ctx = ExecutionContext::cpu(1);
        let adata = toy_adata(64, 5);
        let params = TrainParams {
            optimizer: OptimizerKind::Adam,
            learning_rate: Some(0.01),
            validation_split: 0.0,
            early_stop: None,
            reduce_lr: None,
            ..quiet_params(30)
        };
        let config = ModelConfig {
            batchnorm: false,
            ..small_config()
        };
        let history = train(&ctx, &adata, &config, &params).unwrap().history;
        let losses = history.loss();
        assert!(history.val_loss().is_none());
        assert!(losses.last().unwrap() < losses.first().unwrap());
    }

    #[test]
    fn test_default_callbacks_follow_params() {
        let dir = tempfile::TempDir::new().unwrap();
        let model = ZinbAutoencoder::new(small_config().with_features(4), &Device::Cpu).unwrap();
        let params = TrainParams {
            save_weights: true,
            tensorboard: true,
            output_dir: Some(dir.path().to_path_buf()),
            ..TrainParams::default()
        };
        let trainer = Trainer::new(model, params, 0).unwrap();
        assert_eq!(
            trainer.callback_names(),
            vec!["model_checkpoint", "reduce_lr_on_plateau", "early_stopping", "metrics_logger"]
        );

        let model = ZinbAutoencoder::new(small_config().with_features(4), &Device::Cpu).unwrap();
        let params = TrainParams {
            save_weights: true,
            reduce_lr: None,
            early_stop: None,
            ..TrainParams::default()
        };
        assert!(Trainer::new(model, params, 0).unwrap().callback_names().is_empty());
    }

    #[test]
    fn test_feature_mismatch_is_rejected() {
        let ctx = ExecutionContext::cpu(0);
        let model = ZinbAutoencoder::new(small_config().with_features(3), &Device::Cpu).unwrap();
        let mut trainer = Trainer::new(model, quiet_params(1), 0).unwrap();
        let err = trainer.fit(&ctx, &toy_adata(10, 4)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_non_finite_weights_are_counted() {
        let model = ZinbAutoencoder::new(small_config().with_features(4), &Device::Cpu).unwrap();
        let trainer = Trainer::new(model, quiet_params(1), 0).unwrap();
        assert_eq!(trainer.non_finite_weights().unwrap(), 0);

        let poisoned = {
            let vars = trainer.model().var_map().data().lock().unwrap();
            let var = vars.get("center.weight").unwrap();
            var.set(&Tensor::full(f32::NAN, var.dims(), &Device::Cpu).unwrap())
                .unwrap();
            var.elem_count()
        };
        assert_eq!(trainer.non_finite_weights().unwrap(), poisoned);
    }
}
