//! Test fixtures and utilities for integration tests

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use countae::{Config, ModelConfig, OptimizerKind};
use tempfile::TempDir;

/// Create a temporary directory for test outputs
pub fn create_test_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

/// Deterministic count for `gene` in `cell`; gene 0 is never expressed
pub fn count(gene: usize, cell: usize) -> u32 {
    if gene == 0 {
        0
    } else {
        ((gene * 7 + cell * 3) % 11) as u32
    }
}

/// Write a genes × cells CSV table built from [`count`]
pub fn write_counts(path: &Path, n_genes: usize, n_cells: usize) {
    let mut table = String::from("gene");
    for c in 0..n_cells {
        write!(table, ",cell{}", c).unwrap();
    }
    table.push('\n');
    for g in 0..n_genes {
        write!(table, "gene{}", g).unwrap();
        for c in 0..n_cells {
            write!(table, ",{}", count(g, c)).unwrap();
        }
        table.push('\n');
    }
    fs::write(path, table).expect("Failed to write count table");
}

/// The 100 genes × 50 cells table used by most tests
pub fn standard_table(dir: &Path) -> PathBuf {
    let path = dir.join("counts.csv");
    write_counts(&path, 100, 50);
    path
}

/// A short, quiet run on a small network
pub fn quick_config(epochs: usize) -> Config {
    let mut config = Config::default();
    config.model = ModelConfig {
        hidden_sizes: vec![16, 8, 16],
        ..ModelConfig::default()
    };
    config.training.epochs = epochs;
    config.training.batch_size = 16;
    config.training.optimizer = OptimizerKind::RmsProp;
    config.training.verbose = false;
    config.runtime.threads = Some(2);
    config
}
