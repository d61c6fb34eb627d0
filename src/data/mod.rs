//! Annotated expression matrices and their preparation for training
//!
//! The central type is [`AnnData`]: an observations × features count matrix
//! together with observation/feature names and per-axis metadata frames.
//! Loading lives in [`loader`] and [`h5`], the preprocessing pipeline in
//! [`preprocess`].

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod h5;
pub mod loader;
pub mod preprocess;

pub use h5::{read_10x_h5, write_10x_h5};
pub use loader::{load_counts, read_delimited};
pub use preprocess::{
    assign_split, filter_cells, filter_genes, log1p, normalize_per_cell, prepare, scale,
};

/// Observation column holding the train/test assignment
pub const SPLIT_KEY: &str = "split";
/// Observation column holding size factors
pub const SIZE_FACTORS_KEY: &str = "size_factors";
/// Column holding per-axis count totals
pub const N_COUNTS_KEY: &str = "n_counts";

/// Label of the training partition
pub const TRAIN_LABEL: &str = "train";
/// Label of the held-out partition
pub const TEST_LABEL: &str = "test";

/// Preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Minimum total count for a gene to be kept
    pub min_counts_gene: f64,
    /// Minimum total count for a cell to be kept
    pub min_counts_cell: f64,
    /// Fraction of observations labelled `test`
    pub test_fraction: f64,
    /// Seed of the train/test shuffle
    pub seed: u64,
    /// Rescale every cell to the median library size
    pub normalize_input: bool,
    /// Apply `ln(1 + x)`
    pub log1p: bool,
    /// Standardize every gene to zero mean and unit variance
    pub scale: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            min_counts_gene: 1.0,
            min_counts_cell: 1.0,
            test_fraction: 0.1,
            seed: 42,
            normalize_input: true,
            log1p: true,
            scale: true,
        }
    }
}

impl PreprocessConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(Error::config("test_fraction must be in [0.0, 1.0)"));
        }
        if self.min_counts_gene < 0.0 || self.min_counts_cell < 0.0 {
            return Err(Error::config("minimum counts must be non-negative"));
        }
        Ok(())
    }
}

/// A metadata column
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Numeric values
    Numeric(Vec<f64>),
    /// Categorical values stored as codes into `categories`
    Categorical {
        /// Category labels
        categories: Vec<String>,
        /// One code per entry
        codes: Vec<u32>,
    },
}

impl Column {
    /// Number of entries
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Categorical { codes, .. } => codes.len(),
        }
    }

    /// Whether the column has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the given entries, in the given order
    pub fn select(&self, indices: &[usize]) -> Column {
        match self {
            Column::Numeric(values) => Column::Numeric(indices.iter().map(|&i| values[i]).collect()),
            Column::Categorical { categories, codes } => Column::Categorical {
                categories: categories.clone(),
                codes: indices.iter().map(|&i| codes[i]).collect(),
            },
        }
    }

    /// Label of entry `index` for categorical columns
    pub fn label(&self, index: usize) -> Option<&str> {
        match self {
            Column::Categorical { categories, codes } => codes
                .get(index)
                .and_then(|&code| categories.get(code as usize))
                .map(String::as_str),
            Column::Numeric(_) => None,
        }
    }
}

/// Ordered collection of equally long named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    len: usize,
    columns: Vec<(String, Column)>,
}

impl Frame {
    /// Create an empty frame for `len` entries
    pub fn new(len: usize) -> Self {
        Self {
            len,
            columns: Vec::new(),
        }
    }

    /// Number of entries per column
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the frame describes zero entries
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or replace a column
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if column.len() != self.len {
            return Err(Error::invalid_input(format!(
                "column '{}' has {} entries, expected {}",
                name,
                column.len(),
                self.len
            )));
        }
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = column,
            None => self.columns.push((name, column)),
        }
        Ok(())
    }

    /// Look up a column by name
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Look up a numeric column by name
    pub fn numeric(&self, name: &str) -> Result<&[f64]> {
        match self.get(name) {
            Some(Column::Numeric(values)) => Ok(values),
            Some(Column::Categorical { .. }) => Err(Error::invalid_input(format!(
                "column '{}' is categorical",
                name
            ))),
            None => Err(Error::invalid_input(format!("missing column '{}'", name))),
        }
    }

    /// Column names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Keep only the given entries of every column
    pub fn select(&self, indices: &[usize]) -> Frame {
        Frame {
            len: indices.len(),
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), c.select(indices)))
                .collect(),
        }
    }
}

/// Annotated matrix: observations × features plus metadata
#[derive(Debug, Clone, PartialEq)]
pub struct AnnData {
    x: Array2<f32>,
    raw: Option<Array2<f32>>,
    obs_names: Vec<String>,
    var_names: Vec<String>,
    obs: Frame,
    var: Frame,
}

impl AnnData {
    /// Create an annotated matrix; names must match the matrix dimensions
    pub fn new(x: Array2<f32>, obs_names: Vec<String>, var_names: Vec<String>) -> Result<Self> {
        let (n_obs, n_vars) = x.dim();
        if obs_names.len() != n_obs || var_names.len() != n_vars {
            return Err(Error::invalid_input(format!(
                "matrix is {}x{} but got {} observation and {} feature names",
                n_obs,
                n_vars,
                obs_names.len(),
                var_names.len()
            )));
        }
        Ok(Self {
            x,
            raw: None,
            obs_names,
            var_names,
            obs: Frame::new(n_obs),
            var: Frame::new(n_vars),
        })
    }

    /// Number of observations (rows)
    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    /// Number of features (columns)
    pub fn n_vars(&self) -> usize {
        self.x.ncols()
    }

    /// Data matrix
    pub fn x(&self) -> &Array2<f32> {
        &self.x
    }

    /// Mutable data matrix; the shape must not change
    pub fn x_mut(&mut self) -> &mut Array2<f32> {
        &mut self.x
    }

    /// Snapshot of the counts taken before normalization, if any
    pub fn raw(&self) -> Option<&Array2<f32>> {
        self.raw.as_ref()
    }

    /// Store the current matrix as the raw snapshot
    pub fn freeze_raw(&mut self) {
        self.raw = Some(self.x.clone());
    }

    /// Observation names
    pub fn obs_names(&self) -> &[String] {
        &self.obs_names
    }

    /// Feature names
    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    /// Row of the observation called `name`
    pub fn obs_vector(&self, name: &str) -> Option<ArrayView1<'_, f32>> {
        let index = self.obs_names.iter().position(|n| n == name)?;
        Some(self.x.row(index))
    }

    /// Observation metadata
    pub fn obs(&self) -> &Frame {
        &self.obs
    }

    /// Mutable observation metadata
    pub fn obs_mut(&mut self) -> &mut Frame {
        &mut self.obs
    }

    /// Feature metadata
    pub fn var(&self) -> &Frame {
        &self.var
    }

    /// Mutable feature metadata
    pub fn var_mut(&mut self) -> &mut Frame {
        &mut self.var
    }

    /// Per-observation size factors
    pub fn size_factors(&self) -> Result<&[f64]> {
        self.obs.numeric(SIZE_FACTORS_KEY)
    }

    /// Row totals in double precision
    pub fn obs_totals(&self) -> Vec<f64> {
        self.x
            .fold_axis(Axis(1), 0.0f64, |acc, &v| acc + v as f64)
            .to_vec()
    }

    /// Column totals in double precision
    pub fn var_totals(&self) -> Vec<f64> {
        self.x
            .fold_axis(Axis(0), 0.0f64, |acc, &v| acc + v as f64)
            .to_vec()
    }

    /// Swap observations and features
    pub fn transpose(self) -> Self {
        Self {
            x: self.x.t().as_standard_layout().into_owned(),
            raw: self
                .raw
                .map(|raw| raw.t().as_standard_layout().into_owned()),
            obs_names: self.var_names,
            var_names: self.obs_names,
            obs: self.var,
            var: self.obs,
        }
    }

    /// Keep only the given observations, in the given order
    pub fn select_obs(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(0), indices),
            raw: self.raw.as_ref().map(|raw| raw.select(Axis(0), indices)),
            obs_names: indices.iter().map(|&i| self.obs_names[i].clone()).collect(),
            var_names: self.var_names.clone(),
            obs: self.obs.select(indices),
            var: self.var.clone(),
        }
    }

    /// Keep only the given features, in the given order
    pub fn select_vars(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(1), indices),
            raw: self.raw.as_ref().map(|raw| raw.select(Axis(1), indices)),
            obs_names: self.obs_names.clone(),
            var_names: indices.iter().map(|&i| self.var_names[i].clone()).collect(),
            obs: self.obs.clone(),
            var: self.var.select(indices),
        }
    }

    /// Observations whose categorical `key` column equals `label`
    pub fn subset(&self, key: &str, label: &str) -> Result<Self> {
        let column = self
            .obs
            .get(key)
            .ok_or_else(|| Error::invalid_input(format!("missing column '{}'", key)))?;
        if let Column::Numeric(_) = column {
            return Err(Error::invalid_input(format!("column '{}' is not categorical", key)));
        }
        let indices: Vec<usize> = (0..self.n_obs())
            .filter(|&i| column.label(i) == Some(label))
            .collect();
        Ok(self.select_obs(&indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small() -> AnnData {
        AnnData::new(
            array![[1.0, 0.0, 2.0], [0.0, 0.0, 3.0]],
            vec!["g1".into(), "g2".into()],
            vec!["c1".into(), "c2".into(), "c3".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_mismatched_names() {
        let result = AnnData::new(array![[1.0, 2.0]], vec!["a".into()], vec!["x".into()]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_transpose_swaps_axes_and_names() {
        let mut adata = small();
        adata
            .obs_mut()
            .insert("gene_len", Column::Numeric(vec![10.0, 20.0]))
            .unwrap();

        let t = adata.transpose();
        assert_eq!(t.n_obs(), 3);
        assert_eq!(t.n_vars(), 2);
        assert_eq!(t.obs_names(), &["c1", "c2", "c3"]);
        assert_eq!(t.x()[[2, 1]], 3.0);
        assert!(t.x().is_standard_layout());
        assert_eq!(t.var().numeric("gene_len").unwrap(), &[10.0, 20.0]);
    }

    #[test]
    fn test_totals() {
        let adata = small();
        assert_eq!(adata.obs_totals(), vec![3.0, 3.0]);
        assert_eq!(adata.var_totals(), vec![1.0, 0.0, 5.0]);
    }

    #[test]
    fn test_frame_insert_checks_length() {
        let mut frame = Frame::new(2);
        assert!(frame.insert("a", Column::Numeric(vec![1.0])).is_err());
        frame.insert("a", Column::Numeric(vec![1.0, 2.0])).unwrap();
        frame.insert("a", Column::Numeric(vec![3.0, 4.0])).unwrap();
        assert_eq!(frame.names().count(), 1);
        assert_eq!(frame.numeric("a").unwrap(), &[3.0, 4.0]);
    }

    #[test]
    fn test_subset_by_label() {
        let mut adata = small().transpose();
        adata
            .obs_mut()
            .insert(
                SPLIT_KEY,
                Column::Categorical {
                    categories: vec![TRAIN_LABEL.into(), TEST_LABEL.into()],
                    codes: vec![0, 1, 0],
                },
            )
            .unwrap();
        adata.freeze_raw();

        let train = adata.subset(SPLIT_KEY, TRAIN_LABEL).unwrap();
        assert_eq!(train.obs_names(), &["c1", "c3"]);
        assert_eq!(train.raw().unwrap().nrows(), 2);
        assert_eq!(train.obs().get(SPLIT_KEY).unwrap().label(1), Some(TRAIN_LABEL));
    }

    #[test]
    fn test_obs_vector_by_name() {
        let adata = small().transpose();
        assert_eq!(adata.obs_vector("c3").unwrap().to_vec(), vec![2.0, 3.0]);
        assert!(adata.obs_vector("c9").is_none());
    }
}
