//! Hooks invoked by the fit loop
//!
//! Callbacks see the model and the learning rate after every epoch and may
//! change the learning rate or request that training stops. They run in the
//! order they were registered.

use std::path::Path;

use tracing::{debug, info};

use super::metrics::{EpochLogs, EventFileExporter, Histogram, MetricsExporter};
use super::optimizers::schedulers::{PlateauConfig, PlateauScheduler, Scheduler};
use crate::error::{Error, Result};
use crate::model::ZinbAutoencoder;

/// Mutable view of the training state handed to callbacks
pub struct CallbackContext<'a> {
    /// Model being trained
    pub model: &'a ZinbAutoencoder,
    /// Learning rate for the next epoch; callbacks may lower it
    pub learning_rate: f64,
    /// Set to end training after the current epoch
    pub stop_training: bool,
}

impl<'a> CallbackContext<'a> {
    /// Create a context for `model` at the given learning rate
    pub fn new(model: &'a ZinbAutoencoder, learning_rate: f64) -> Self {
        Self {
            model,
            learning_rate,
            stop_training: false,
        }
    }
}

/// Trait for training callbacks
pub trait Callback: Send {
    /// Callback name
    fn name(&self) -> &str;

    /// Called once before the first epoch
    fn on_train_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called after every epoch with its metrics
    fn on_epoch_end(&mut self, logs: &EpochLogs, ctx: &mut CallbackContext<'_>) -> Result<()>;

    /// Called once after the last epoch
    fn on_train_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Stop training once the monitored loss stops improving
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: f64,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    /// Stop after `patience` epochs without improvement
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            min_delta: 0.0,
            best: f64::INFINITY,
            wait: 0,
            stopped_epoch: None,
        }
    }

    /// Epoch at which training was stopped, if it was
    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    /// Best monitored value seen so far
    pub fn best(&self) -> f64 {
        self.best
    }
}

impl Callback for EarlyStopping {
    fn name(&self) -> &str {
        "early_stopping"
    }

    fn on_train_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        self.best = f64::INFINITY;
        self.wait = 0;
        self.stopped_epoch = None;
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, ctx: &mut CallbackContext<'_>) -> Result<()> {
        let current = logs.monitored();
        if current + self.min_delta < self.best {
            self.best = current;
            self.wait = 0;
            return Ok(());
        }

        self.wait += 1;
        if self.wait >= self.patience {
            self.stopped_epoch = Some(logs.epoch);
            ctx.stop_training = true;
        }
        Ok(())
    }

    fn on_train_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        if let Some(epoch) = self.stopped_epoch {
            info!("Epoch {:05}: early stopping", epoch + 1);
        }
        Ok(())
    }
}

/// Divide the learning rate by ten when the monitored loss plateaus
pub struct ReduceLrOnPlateau {
    scheduler: PlateauScheduler,
    verbose: bool,
}

impl ReduceLrOnPlateau {
    /// Reduce after `patience` epochs without improvement
    pub fn new(patience: usize, verbose: bool) -> Self {
        Self::with_config(PlateauConfig::with_patience(patience), verbose)
    }

    /// Reduce with explicit settings
    pub fn with_config(config: PlateauConfig, verbose: bool) -> Self {
        Self {
            scheduler: PlateauScheduler::new(config),
            verbose,
        }
    }
}

impl Callback for ReduceLrOnPlateau {
    fn name(&self) -> &str {
        self.scheduler.name()
    }

    fn on_train_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        self.scheduler.reset();
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, ctx: &mut CallbackContext<'_>) -> Result<()> {
        if let Some(lr) = self.scheduler.step(logs.monitored(), ctx.learning_rate) {
            if self.verbose {
                info!("Epoch {:05}: reducing learning rate to {:e}", logs.epoch + 1, lr);
            } else {
                debug!("Epoch {:05}: reducing learning rate to {:e}", logs.epoch + 1, lr);
            }
            ctx.learning_rate = lr;
        }
        Ok(())
    }
}

/// Write per-epoch scalars and parameter histograms to an event file
pub struct MetricsLogger {
    exporter: Box<dyn MetricsExporter>,
    histogram_freq: usize,
}

impl MetricsLogger {
    /// Log into `<log_dir>/events.jsonl`, with histograms every epoch
    pub fn new(log_dir: &Path) -> Result<Self> {
        Ok(Self::with_exporter(Box::new(EventFileExporter::new(log_dir)?), 1))
    }

    /// Log through any exporter; `histogram_freq = 0` disables histograms
    pub fn with_exporter(exporter: Box<dyn MetricsExporter>, histogram_freq: usize) -> Self {
        Self {
            exporter,
            histogram_freq,
        }
    }

    fn export_histograms(&mut self, epoch: usize, model: &ZinbAutoencoder) -> Result<()> {
        let vars = {
            let data = model
                .var_map()
                .data()
                .lock()
                .map_err(|_| Error::internal("parameter store lock poisoned"))?;
            let mut vars: Vec<_> = data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            vars.sort_by(|a, b| a.0.cmp(&b.0));
            vars
        };

        for (name, var) in vars {
            let values = var.as_tensor().flatten_all()?.to_vec1::<f32>()?;
            let histogram = Histogram::from_values(&values, Histogram::DEFAULT_BUCKETS);
            self.exporter.export_histogram(epoch, &name, &histogram)?;
        }
        Ok(())
    }
}

impl Callback for MetricsLogger {
    fn name(&self) -> &str {
        "metrics_logger"
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, ctx: &mut CallbackContext<'_>) -> Result<()> {
        let mut scalars = vec![("loss", logs.loss), ("lr", logs.lr)];
        if let Some(val_loss) = logs.val_loss {
            scalars.push(("val_loss", val_loss));
        }
        self.exporter.export_scalars(logs.epoch, &scalars)?;

        if self.histogram_freq > 0 && logs.epoch % self.histogram_freq == 0 {
            self.export_histograms(logs.epoch, ctx.model)?;
        }
        self.exporter.flush()
    }

    fn on_train_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        self.exporter.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelConfig;
    use crate::training::metrics::exporters::{EventValue, EVENT_FILE_NAME};
    use candle_core::Device;
    use tempfile::TempDir;

    fn tiny_model() -> ZinbAutoencoder {
        let config = ModelConfig {
            hidden_sizes: vec![4, 2, 4],
            ..ModelConfig::default()
        };
        ZinbAutoencoder::new(config.with_features(3), &Device::Cpu).unwrap()
    }

    fn logs(epoch: usize, val_loss: f64) -> EpochLogs {
        EpochLogs {
            epoch,
            loss: 10.0,
            val_loss: Some(val_loss),
            lr: 0.1,
        }
    }

    #[test]
    fn test_early_stopping_after_patience() {
        let model = tiny_model();
        let mut ctx = CallbackContext::new(&model, 0.1);
        let mut es = EarlyStopping::new(2);
        es.on_train_begin(&mut ctx).unwrap();

        for (epoch, loss) in [3.0, 2.0, 2.0].into_iter().enumerate() {
            es.on_epoch_end(&logs(epoch, loss), &mut ctx).unwrap();
            assert!(!ctx.stop_training);
        }
        es.on_epoch_end(&logs(3, 2.5), &mut ctx).unwrap();
        assert!(ctx.stop_training);
        assert_eq!(es.stopped_epoch(), Some(3));
        assert_eq!(es.best(), 2.0);
    }

    #[test]
    fn test_reduce_lr_updates_context() {
        let model = tiny_model();
        let mut ctx = CallbackContext::new(&model, 0.1);
        let mut cb = ReduceLrOnPlateau::new(1, false);
        cb.on_epoch_end(&logs(0, 1.0), &mut ctx).unwrap();
        assert_eq!(ctx.learning_rate, 0.1);
        cb.on_epoch_end(&logs(1, 1.0), &mut ctx).unwrap();
        assert!((ctx.learning_rate - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_metrics_logger_writes_events() {
        let dir = TempDir::new().unwrap();
        let model = tiny_model();
        let mut ctx = CallbackContext::new(&model, 0.1);
        let mut logger = MetricsLogger::new(dir.path()).unwrap();

        logger.on_epoch_end(&logs(0, 1.0), &mut ctx).unwrap();
        logger.on_train_end(&mut ctx).unwrap();

        let events = EventFileExporter::read_events(&dir.path().join(EVENT_FILE_NAME)).unwrap();
        let scalars: Vec<&str> = events
            .iter()
            .filter_map(|e| match &e.value {
                EventValue::Scalar { tag, .. } => Some(tag.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(scalars, vec!["loss", "lr", "val_loss"]);

        let n_hist = events
            .iter()
            .filter(|e| matches!(e.value, EventValue::Histogram { .. }))
            .count();
        assert_eq!(n_hist, model.var_map().all_vars().len());
    }
}
