//! Weight checkpoints
//!
//! Weights are written by variable name into an HDF5 file: every layer
//! becomes a group holding one dataset per parameter (`enc0/weight`,
//! `enc0/bias`, `enc0_bn/running_mean`, ...).

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use candle_nn::VarMap;
use tracing::{debug, info, instrument};

use super::callbacks::{Callback, CallbackContext};
use super::metrics::EpochLogs;
use crate::error::{Error, Result};

/// Checkpoint file name inside the output directory
pub const WEIGHTS_FILE_NAME: &str = "weights.hdf5";

fn split_name(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or(("/", name))
}

/// Write every variable of `var_map` to `path`
#[instrument(skip(var_map))]
pub fn save_weights(var_map: &VarMap, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = hdf5::File::create(path)?;
    let data = var_map
        .data()
        .lock()
        .map_err(|_| Error::internal("parameter store lock poisoned"))?;

    let mut names: Vec<&String> = data.keys().collect();
    names.sort();
    for name in names {
        let tensor = data[name].as_tensor();
        let values = tensor.flatten_all()?.to_vec1::<f32>()?;
        let (group_name, dataset_name) = split_name(name);
        let group = match file.group(group_name) {
            Ok(group) => group,
            Err(_) => file.create_group(group_name)?,
        };
        group
            .new_dataset::<f32>()
            .shape(tensor.dims())
            .create(dataset_name)?
            .write_raw(&values)?;
    }

    debug!("Saved {} parameters to {}", data.len(), path.display());
    Ok(())
}

/// Overwrite every variable of `var_map` with the values stored at `path`
#[instrument(skip(var_map))]
pub fn load_weights(var_map: &mut VarMap, path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::checkpoint(format!("no checkpoint at {}", path.display())));
    }

    let file = hdf5::File::open(path)?;
    let data = var_map
        .data()
        .lock()
        .map_err(|_| Error::internal("parameter store lock poisoned"))?;

    for (name, var) in data.iter() {
        let (group_name, dataset_name) = split_name(name);
        let dataset = file
            .group(group_name)
            .and_then(|g| g.dataset(dataset_name))
            .map_err(|_| Error::checkpoint(format!("missing parameter '{}' in {}", name, path.display())))?;
        if dataset.shape() != var.dims() {
            return Err(Error::checkpoint(format!(
                "parameter '{}' has shape {:?} in checkpoint, expected {:?}",
                name,
                dataset.shape(),
                var.dims()
            )));
        }
        let values = dataset.read_raw::<f32>()?;
        let tensor = Tensor::from_vec(values, var.dims(), var.device())?;
        var.set(&tensor.to_dtype(var.dtype())?)?;
    }

    debug!("Loaded weights from {}", path.display());
    Ok(())
}

/// Save the weights whenever the monitored loss reaches a new best
pub struct ModelCheckpoint {
    path: PathBuf,
    best: f64,
    verbose: bool,
}

impl ModelCheckpoint {
    /// Checkpoint into `<output_dir>/weights.hdf5`
    pub fn new(output_dir: &Path, verbose: bool) -> Self {
        Self {
            path: output_dir.join(WEIGHTS_FILE_NAME),
            best: f64::INFINITY,
            verbose,
        }
    }

    /// Checkpoint file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Callback for ModelCheckpoint {
    fn name(&self) -> &str {
        "model_checkpoint"
    }

    fn on_train_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        self.best = f64::INFINITY;
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, ctx: &mut CallbackContext<'_>) -> Result<()> {
        let current = logs.monitored();
        if current < self.best {
            if self.verbose {
                info!(
                    "Epoch {:05}: {} improved from {:.5} to {:.5}, saving model to {}",
                    logs.epoch + 1,
                    logs.monitored_name(),
                    self.best,
                    current,
                    self.path.display()
                );
            }
            self.best = current;
            save_weights(ctx.model.var_map(), &self.path)?;
        } else {
            debug!(
                "Epoch {:05}: {} did not improve from {:.5}",
                logs.epoch + 1,
                logs.monitored_name(),
                self.best
            );
        }
        Ok(())
    }
}
