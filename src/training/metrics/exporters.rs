//! Metrics exporters
//!
//! The event file is a JSON-lines log with one scalar or histogram record per
//! line, stamped with the wall time and the epoch.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Histogram;
use crate::error::Result;

/// File name of the event log inside the log directory
pub const EVENT_FILE_NAME: &str = "events.jsonl";

/// Trait for metrics exporters
pub trait MetricsExporter: Send {
    /// Exporter name
    fn name(&self) -> &str;

    /// Record scalar values at `step`
    fn export_scalars(&mut self, step: usize, scalars: &[(&str, f64)]) -> Result<()>;

    /// Record a value distribution at `step`
    fn export_histogram(&mut self, step: usize, tag: &str, histogram: &Histogram) -> Result<()>;

    /// Push buffered records to storage
    fn flush(&mut self) -> Result<()>;
}

/// Payload of one event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventValue {
    /// A single number
    Scalar {
        /// Metric name
        tag: String,
        /// Metric value
        value: f64,
    },
    /// A value distribution
    Histogram {
        /// Parameter name
        tag: String,
        /// Bucketed summary
        histogram: Histogram,
    },
}

/// One line of the event file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Seconds since the Unix epoch
    pub wall_time: f64,
    /// Epoch the record belongs to
    pub step: usize,
    /// Record payload
    #[serde(flatten)]
    pub value: EventValue,
}

/// JSON-lines event file exporter
pub struct EventFileExporter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EventFileExporter {
    /// Create `log_dir` if needed and start a fresh event file in it
    pub fn new(log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(EVENT_FILE_NAME);
        let writer = BufWriter::new(File::create(&path)?);
        debug!("Writing training events to {}", path.display());
        Ok(Self { path, writer })
    }

    /// Path of the event file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, step: usize, value: EventValue) -> Result<()> {
        let event = Event {
            wall_time: Utc::now().timestamp_micros() as f64 / 1e6,
            step,
            value,
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Parse every record of an event file
    pub fn read_events(path: &Path) -> Result<Vec<Event>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }
}

impl MetricsExporter for EventFileExporter {
    fn name(&self) -> &str {
        "event_file"
    }

    fn export_scalars(&mut self, step: usize, scalars: &[(&str, f64)]) -> Result<()> {
        for (tag, value) in scalars {
            self.write_event(
                step,
                EventValue::Scalar {
                    tag: tag.to_string(),
                    value: *value,
                },
            )?;
        }
        Ok(())
    }

    fn export_histogram(&mut self, step: usize, tag: &str, histogram: &Histogram) -> Result<()> {
        self.write_event(
            step,
            EventValue::Histogram {
                tag: tag.to_string(),
                histogram: histogram.clone(),
            },
        )
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
