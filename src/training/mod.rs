//! Training infrastructure for the ZINB autoencoder
//!
//! # Main Components
//!
//! - **Configuration**: [`TrainParams`], the hyperparameters of a run
//! - **Loss**: the zero-inflated negative binomial likelihood
//! - **Optimizers**: the closed set of gradient-descent rules in [`OptimizerKind`]
//! - **Callbacks**: checkpointing, learning-rate reduction, early stopping, event logging
//! - **Trainer**: the epoch loop producing a [`History`]
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use countae::context::ExecutionContext;
//! use countae::model::ModelConfig;
//! use countae::training::{train, TrainParams};
//!
//! let ctx = ExecutionContext::cpu(42);
//! let outcome = train(&ctx, &adata, &ModelConfig::default(), &TrainParams::default())?;
//! println!("final loss: {:?}", outcome.history.loss().last());
//! ```

pub mod callbacks;
pub mod checkpoints;
pub mod config;
pub mod loss;
pub mod metrics;
pub mod optimizers;
pub mod trainer;

pub use callbacks::{Callback, CallbackContext, EarlyStopping, MetricsLogger, ReduceLrOnPlateau};
pub use checkpoints::{load_weights, save_weights, ModelCheckpoint, WEIGHTS_FILE_NAME};
pub use config::TrainParams;
pub use loss::ZinbLoss;
pub use metrics::{EpochLogs, Histogram};
pub use optimizers::{create_optimizer, Optimizer, OptimizerKind};
pub use trainer::{train, History, TrainOutcome, Trainer};
