//! Explicit execution context
//!
//! An [`ExecutionContext`] owns the tensor device, an optional dedicated
//! thread pool and the training seed. It is built once from a
//! [`RuntimeConfig`] and passed to the training entry points, so two
//! contexts in one process never share thread configuration.

use candle_core::Device;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Device types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// CPU device
    #[default]
    Cpu,
    /// CUDA GPU with the given ordinal
    Cuda(usize),
    /// Metal GPU with the given ordinal
    Metal(usize),
}

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Thread-count hint; `None` keeps the global pool
    pub threads: Option<usize>,
    /// Tensor device
    pub device: DeviceType,
    /// Seed of the per-epoch shuffling
    pub seed: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: None,
            device: DeviceType::Cpu,
            seed: 42,
        }
    }
}

impl RuntimeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(Error::config("threads must be greater than 0"));
        }
        Ok(())
    }
}

/// Device, thread pool and seed shared by one training run
pub struct ExecutionContext {
    device: Device,
    pool: Option<ThreadPool>,
    threads: usize,
    seed: u64,
}

impl ExecutionContext {
    /// Build a context from runtime settings
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let device = match config.device {
            DeviceType::Cpu => Device::Cpu,
            DeviceType::Cuda(ordinal) => Device::new_cuda(ordinal)?,
            DeviceType::Metal(ordinal) => Device::new_metal(ordinal)?,
        };

        let pool = match config.threads {
            Some(n) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("countae-{}", i))
                    .build()
                    .map_err(|e| Error::config(format!("failed to build thread pool: {}", e)))?,
            ),
            None => None,
        };
        let threads = config.threads.unwrap_or_else(num_cpus::get);
        debug!("Execution context: {:?}, {} threads, seed {}", device, threads, config.seed);

        Ok(Self {
            device,
            pool,
            threads,
            seed: config.seed,
        })
    }

    /// CPU context on the global thread pool
    pub fn cpu(seed: u64) -> Self {
        Self {
            device: Device::Cpu,
            pool: None,
            threads: num_cpus::get(),
            seed,
        }
    }

    /// Tensor device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of worker threads available to tensor kernels
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Training seed
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Run `f` inside this context's thread pool, if it has one
    pub fn install<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}
