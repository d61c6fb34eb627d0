//! Preprocessing steps applied to a freshly loaded count table
//!
//! Every step mutates the [`AnnData`] in place and records what it computed
//! in the observation/feature metadata. [`prepare`] chains them in the order
//! training expects.

use std::path::Path;

use ndarray::Axis;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, instrument, warn};

use super::{
    load_counts, AnnData, Column, PreprocessConfig, N_COUNTS_KEY, SIZE_FACTORS_KEY, SPLIT_KEY,
    TEST_LABEL, TRAIN_LABEL,
};
use crate::error::{Error, Result};

/// Median with the midpoint convention for even lengths
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

fn ensure_non_degenerate(adata: &AnnData) -> Result<()> {
    if adata.n_obs() == 0 || adata.n_vars() == 0 {
        return Err(Error::DegenerateMatrix {
            n_obs: adata.n_obs(),
            n_vars: adata.n_vars(),
        });
    }
    Ok(())
}

/// Drop features whose total count is below `min_counts`
#[instrument(skip(adata), fields(n_vars = adata.n_vars()))]
pub fn filter_genes(adata: &mut AnnData, min_counts: f64) -> Result<()> {
    let totals = adata.var_totals();
    let keep: Vec<usize> = (0..totals.len())
        .filter(|&j| totals[j] >= min_counts)
        .collect();

    let dropped = totals.len() - keep.len();
    if dropped > 0 {
        info!("Filtered out {} genes with fewer than {} counts", dropped, min_counts);
    }

    *adata = adata.select_vars(&keep);
    let kept_totals = keep.iter().map(|&j| totals[j]).collect();
    adata.var_mut().insert(N_COUNTS_KEY, Column::Numeric(kept_totals))?;
    ensure_non_degenerate(adata)
}

/// Drop observations whose total count is below `min_counts`
#[instrument(skip(adata), fields(n_obs = adata.n_obs()))]
pub fn filter_cells(adata: &mut AnnData, min_counts: f64) -> Result<()> {
    let totals = adata.obs_totals();
    let keep: Vec<usize> = (0..totals.len())
        .filter(|&i| totals[i] >= min_counts)
        .collect();

    let dropped = totals.len() - keep.len();
    if dropped > 0 {
        info!("Filtered out {} cells with fewer than {} counts", dropped, min_counts);
    }

    *adata = adata.select_obs(&keep);
    let kept_totals = keep.iter().map(|&i| totals[i]).collect();
    adata.obs_mut().insert(N_COUNTS_KEY, Column::Numeric(kept_totals))?;
    ensure_non_degenerate(adata)
}

/// Label `ceil(test_fraction * n_obs)` randomly chosen observations `test`,
/// the rest `train`
#[instrument(skip(adata), fields(n_obs = adata.n_obs()))]
pub fn assign_split(adata: &mut AnnData, test_fraction: f64, seed: u64) -> Result<()> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(Error::invalid_input(format!(
            "test fraction {} outside [0, 1)",
            test_fraction
        )));
    }

    let n_obs = adata.n_obs();
    let n_test = (test_fraction * n_obs as f64).ceil() as usize;
    if n_test >= n_obs {
        return Err(Error::invalid_input(format!(
            "test fraction {} leaves no training observations out of {}",
            test_fraction, n_obs
        )));
    }

    let mut order: Vec<usize> = (0..n_obs).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut codes = vec![0u32; n_obs];
    for &i in &order[..n_test] {
        codes[i] = 1;
    }

    debug!("Split {} observations into {} train / {} test", n_obs, n_obs - n_test, n_test);
    adata.obs_mut().insert(
        SPLIT_KEY,
        Column::Categorical {
            categories: vec![TRAIN_LABEL.to_string(), TEST_LABEL.to_string()],
            codes,
        },
    )
}

/// Compute size factors (`total / median(total)`) and optionally rescale
/// every observation to the median total.
///
/// The counts as they are on entry are kept as the raw snapshot unless one
/// already exists.
#[instrument(skip(adata))]
pub fn normalize_per_cell(adata: &mut AnnData, normalize_input: bool) -> Result<()> {
    ensure_non_degenerate(adata)?;
    if adata.raw().is_none() {
        adata.freeze_raw();
    }

    let totals = adata.obs_totals();
    let median_total = median(&totals).unwrap_or(0.0);
    if median_total <= 0.0 || totals.iter().any(|&t| t <= 0.0) {
        return Err(Error::invalid_input(
            "size factors require strictly positive observation totals",
        ));
    }

    let size_factors: Vec<f64> = totals.iter().map(|&t| t / median_total).collect();

    if normalize_input {
        for (mut row, &total) in adata.x_mut().axis_iter_mut(Axis(0)).zip(&totals) {
            let factor = (median_total / total) as f32;
            row.mapv_inplace(|v| v * factor);
        }
    }

    adata.obs_mut().insert(N_COUNTS_KEY, Column::Numeric(totals))?;
    adata
        .obs_mut()
        .insert(SIZE_FACTORS_KEY, Column::Numeric(size_factors))?;
    debug!("Median library size {}", median_total);
    Ok(())
}

/// `x <- ln(1 + x)` elementwise
pub fn log1p(adata: &mut AnnData) {
    adata.x_mut().mapv_inplace(f32::ln_1p);
}

/// Standardize every feature to zero mean and unit (unbiased) variance.
///
/// Statistics are taken over all observations present, including the ones
/// labelled `test`. The per-feature mean and std are stored as `mean` and
/// `std` feature columns.
#[instrument(skip(adata))]
pub fn scale(adata: &mut AnnData) -> Result<()> {
    let n_obs = adata.n_obs();
    let n_vars = adata.n_vars();
    if n_obs < 2 {
        warn!("Scaling with fewer than two observations only centers the data");
    }

    let mut means = Vec::with_capacity(n_vars);
    let mut stds = Vec::with_capacity(n_vars);
    for column in adata.x().axis_iter(Axis(1)) {
        let mean = column.iter().map(|&v| v as f64).sum::<f64>() / n_obs as f64;
        let std = if n_obs > 1 {
            let ss: f64 = column.iter().map(|&v| (v as f64 - mean).powi(2)).sum();
            (ss / (n_obs - 1) as f64).sqrt()
        } else {
            0.0
        };
        means.push(mean);
        stds.push(if std == 0.0 { 1.0 } else { std });
    }

    for (mut column, (&mean, &std)) in adata
        .x_mut()
        .axis_iter_mut(Axis(1))
        .zip(means.iter().zip(&stds))
    {
        column.mapv_inplace(|v| ((v as f64 - mean) / std) as f32);
    }

    adata.var_mut().insert("mean", Column::Numeric(means))?;
    adata.var_mut().insert("std", Column::Numeric(stds))?;
    Ok(())
}

/// Load a count matrix (see [`load_counts`]) and run the full preprocessing chain
#[instrument(skip(config))]
pub fn prepare(path: &Path, config: &PreprocessConfig) -> Result<AnnData> {
    config.validate()?;

    let mut adata = load_counts(path)?;
    info!("Loaded {} cells x {} genes", adata.n_obs(), adata.n_vars());

    filter_genes(&mut adata, config.min_counts_gene)?;
    filter_cells(&mut adata, config.min_counts_cell)?;
    assign_split(&mut adata, config.test_fraction, config.seed)?;
    normalize_per_cell(&mut adata, config.normalize_input)?;
    if config.log1p {
        log1p(&mut adata);
    }
    if config.scale {
        scale(&mut adata)?;
    }

    info!(
        "Prepared matrix: {} cells x {} genes",
        adata.n_obs(),
        adata.n_vars()
    );
    Ok(adata)
}
