//! Error types for countae

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for countae operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input table
    #[error("Parse error in {path}:{line}: {reason}")]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// 1-based line number of the offending record
        line: u64,
        /// What went wrong
        reason: String,
    },

    /// Delimited reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Matrix left without observations or features after filtering
    #[error("Degenerate matrix after filtering: {n_obs} observations x {n_vars} features")]
    DegenerateMatrix {
        /// Remaining observations
        n_obs: usize,
        /// Remaining features
        n_vars: usize,
    },

    /// Optimizer name outside the supported set
    #[error("Unknown optimizer '{0}' (expected one of: sgd, rmsprop, adagrad, adadelta, adam, adamax, nadam)")]
    UnknownOptimizer(String),

    /// Checkpoint read/write error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Shape mismatch while building host-side arrays
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HDF5 error
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal invariant violated (e.g. a poisoned parameter lock)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for countae operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a parse error for a given file and line
    pub fn parse(path: impl Into<PathBuf>, line: u64, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
