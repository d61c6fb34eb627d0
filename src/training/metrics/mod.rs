//! Per-epoch training metrics
//!
//! [`EpochLogs`] is what the fit loop hands to every callback at the end of
//! an epoch. [`Histogram`] summarizes a parameter tensor for the event file
//! written by [`exporters::EventFileExporter`].

pub mod exporters;

pub use exporters::{EventFileExporter, MetricsExporter};

use serde::{Deserialize, Serialize};

/// Metrics of one finished epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    /// Zero-based epoch index
    pub epoch: usize,
    /// Size-weighted mean training loss
    pub loss: f64,
    /// Validation loss, when a validation split exists
    pub val_loss: Option<f64>,
    /// Learning rate used during the epoch
    pub lr: f64,
}

impl EpochLogs {
    /// Value watched by the callbacks: `val_loss`, falling back to `loss`
    pub fn monitored(&self) -> f64 {
        self.val_loss.unwrap_or(self.loss)
    }

    /// Name of the value returned by [`Self::monitored`]
    pub fn monitored_name(&self) -> &'static str {
        if self.val_loss.is_some() {
            "val_loss"
        } else {
            "loss"
        }
    }
}

/// Summary of a value distribution with equal-width buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Smallest value
    pub min: f64,
    /// Largest value
    pub max: f64,
    /// Number of values
    pub count: u64,
    /// Sum of values
    pub sum: f64,
    /// Sum of squared values
    pub sum_squares: f64,
    /// Right edge of every bucket
    pub bucket_limits: Vec<f64>,
    /// Number of values in every bucket
    pub bucket_counts: Vec<u64>,
}

impl Histogram {
    /// Default number of buckets
    pub const DEFAULT_BUCKETS: usize = 30;

    /// Build a histogram over the finite entries of `values`
    pub fn from_values(values: &[f32], buckets: usize) -> Self {
        let finite: Vec<f64> = values
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| v as f64)
            .collect();
        let buckets = buckets.max(1);

        if finite.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                count: 0,
                sum: 0.0,
                sum_squares: 0.0,
                bucket_limits: Vec::new(),
                bucket_counts: Vec::new(),
            };
        }

        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let width = if max > min { (max - min) / buckets as f64 } else { 1.0 };

        let mut bucket_counts = vec![0u64; buckets];
        for &v in &finite {
            let idx = (((v - min) / width) as usize).min(buckets - 1);
            bucket_counts[idx] += 1;
        }
        let bucket_limits = (1..=buckets).map(|i| min + width * i as f64).collect();

        Self {
            min,
            max,
            count: finite.len() as u64,
            sum: finite.iter().sum(),
            sum_squares: finite.iter().map(|v| v * v).sum(),
            bucket_limits,
            bucket_counts,
        }
    }

    /// Arithmetic mean, zero when empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
