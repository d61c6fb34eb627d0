//! Run configuration
//!
//! A [`Config`] bundles every knob of a training run. Files are read and
//! written as YAML (`.yaml`, `.yml`) or JSON (anything else); missing
//! sections and fields take their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::RuntimeConfig;
use crate::data::PreprocessConfig;
use crate::error::Result;
use crate::model::ModelConfig;
use crate::training::TrainParams;

/// Main configuration of a training run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Loading and preprocessing
    pub data: PreprocessConfig,
    /// Network architecture
    pub model: ModelConfig,
    /// Fit loop hyperparameters
    pub training: TrainParams,
    /// Device, threads and seed
    pub runtime: RuntimeConfig,
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
        Some(ref ext) if ext == "yaml" || ext == "yml"
    )
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.data.validate()?;
        self.model.validate()?;
        self.training.validate()?;
        self.runtime.validate()?;
        Ok(())
    }
}
