//! countae - zero-inflated negative binomial autoencoders for count matrices
//!
//! This crate prepares a genes × cells count table (filtering, train/test
//! split, size factors, normalization) and fits a ZINB autoencoder that
//! reconstructs the raw counts through a low-dimensional bottleneck.
//!
//! ```rust,ignore
//! let history = countae::train_model("counts.csv")?;
//! println!("{} epochs", history.len());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod logging;
pub mod model;
pub mod training;

// Re-exports
pub use config::Config;
pub use context::{DeviceType, ExecutionContext, RuntimeConfig};
pub use data::{prepare, AnnData, PreprocessConfig};
pub use error::{Error, Result};
pub use model::{ModelConfig, ZinbAutoencoder};
pub use training::{train, History, OptimizerKind, TrainOutcome, TrainParams};

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

/// Output directory used by [`train_model`]
pub const DEFAULT_OUTPUT_DIR: &str = "./result";

/// Prepare `path` and train on its `train` partition
#[instrument(skip(config))]
pub fn run(config: &Config, path: &Path) -> Result<TrainOutcome> {
    config.validate()?;
    let ctx = ExecutionContext::new(&config.runtime)?;

    let adata = prepare(path, &config.data)?;
    let train_set = adata.subset(data::SPLIT_KEY, data::TRAIN_LABEL)?;
    info!(
        "Training on {} of {} cells ({} genes)",
        train_set.n_obs(),
        adata.n_obs(),
        train_set.n_vars()
    );

    train(&ctx, &train_set, &config.model, &config.training)
}

/// Run the whole pipeline on `path` with default settings, writing into `./result`
pub fn train_model(path: impl AsRef<Path>) -> Result<History> {
    let mut config = Config::default();
    config.training.output_dir = Some(PathBuf::from(DEFAULT_OUTPUT_DIR));
    Ok(run(&config, path.as_ref())?.history)
}
