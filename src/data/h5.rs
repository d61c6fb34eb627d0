//! 10x Genomics style HDF5 count matrices
//!
//! The counts live in one group (`matrix` for Cell Ranger 3+, the genome name
//! for older files) as a compressed sparse column matrix with one column per
//! cell:
//!
//! - `data`, `indices`, `indptr`: CSC triplet, `indices` are gene rows
//! - `shape`: `[n_genes, n_cells]`
//! - `barcodes`: cell names
//! - `features/name` (v3) or `gene_names` / `genes` (v2): gene names
//!
//! Cells become observations, so no transpose is needed after reading.

use std::path::Path;

use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::Array2;
use tracing::{debug, info, instrument};

use super::AnnData;
use crate::error::{Error, Result};

/// Group written by [`write_10x_h5`]
pub const MATRIX_GROUP: &str = "matrix";

fn malformed(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::invalid_input(format!("{}: {}", path.display(), reason))
}

fn matrix_group(file: &File, path: &Path) -> Result<Group> {
    if let Ok(group) = file.group(MATRIX_GROUP) {
        return Ok(group);
    }
    let names = file.member_names()?;
    for name in names {
        if let Ok(group) = file.group(&name) {
            if group.dataset("indptr").is_ok() {
                debug!("Using count group '{}'", name);
                return Ok(group);
            }
        }
    }
    Err(malformed(path, "no group holding a sparse count matrix"))
}

fn read_strings(dataset: &Dataset) -> Result<Vec<String>> {
    if let Ok(values) = dataset.read_raw::<VarLenUnicode>() {
        return Ok(values.iter().map(|v| v.as_str().to_string()).collect());
    }
    if let Ok(values) = dataset.read_raw::<VarLenAscii>() {
        return Ok(values.iter().map(|v| v.as_str().to_string()).collect());
    }
    let values = dataset.read_raw::<FixedAscii<256>>()?;
    Ok(values.iter().map(|v| v.as_str().to_string()).collect())
}

fn gene_names(group: &Group) -> Result<Vec<String>> {
    let dataset = group
        .dataset("features/name")
        .or_else(|_| group.dataset("gene_names"))
        .or_else(|_| group.dataset("genes"))?;
    read_strings(&dataset)
}

/// Read a 10x-style sparse HDF5 matrix into a cells × genes [`AnnData`]
#[instrument]
pub fn read_10x_h5(path: &Path) -> Result<AnnData> {
    let file = File::open(path)?;
    let group = matrix_group(&file, path)?;

    let shape = group.dataset("shape")?.read_raw::<u64>()?;
    let (n_genes, n_cells) = match shape.as_slice() {
        [genes, cells] => (*genes as usize, *cells as usize),
        _ => {
            return Err(malformed(
                path,
                format!("shape has {} dimensions, expected 2", shape.len()),
            ))
        }
    };

    let data = group.dataset("data")?.read_raw::<f32>()?;
    let indices = group.dataset("indices")?.read_raw::<u64>()?;
    let indptr = group.dataset("indptr")?.read_raw::<u64>()?;

    if indptr.len() != n_cells + 1 {
        return Err(malformed(
            path,
            format!("indptr has {} entries for {} cells", indptr.len(), n_cells),
        ));
    }
    if data.len() != indices.len() || indptr.last().copied() != Some(data.len() as u64) {
        return Err(malformed(path, "data, indices and indptr disagree on the number of entries"));
    }
    if indptr.windows(2).any(|w| w[0] > w[1]) {
        return Err(malformed(path, "indptr is not non-decreasing"));
    }

    let barcodes = read_strings(&group.dataset("barcodes")?)?;
    let genes = gene_names(&group)?;

    let mut x = Array2::<f32>::zeros((n_cells, n_genes));
    for cell in 0..n_cells {
        let (start, end) = (indptr[cell] as usize, indptr[cell + 1] as usize);
        for k in start..end {
            let gene = indices[k] as usize;
            if gene >= n_genes {
                return Err(malformed(
                    path,
                    format!("gene index {} out of range for {} genes", gene, n_genes),
                ));
            }
            if !data[k].is_finite() {
                return Err(malformed(path, format!("non-finite count at entry {}", k)));
            }
            x[[cell, gene]] += data[k];
        }
    }

    info!(
        "Loaded {} cells x {} genes ({} stored entries) from {:?}",
        n_cells,
        n_genes,
        data.len(),
        path
    );
    AnnData::new(x, barcodes, genes)
}

fn to_unicode(values: &[String]) -> Result<Vec<VarLenUnicode>> {
    values
        .iter()
        .map(|v| {
            v.parse::<VarLenUnicode>()
                .map_err(|e| Error::invalid_input(format!("name '{}' cannot be stored: {}", v, e)))
        })
        .collect()
}

/// Write the observations × features matrix of `adata` in the layout
/// [`read_10x_h5`] reads, keeping only non-zero entries
#[instrument(skip(adata), fields(n_obs = adata.n_obs(), n_vars = adata.n_vars()))]
pub fn write_10x_h5(adata: &AnnData, path: &Path) -> Result<()> {
    let mut data = Vec::new();
    let mut indices = Vec::new();
    let mut indptr = Vec::with_capacity(adata.n_obs() + 1);
    indptr.push(0i64);
    for row in adata.x().rows() {
        for (gene, &value) in row.iter().enumerate() {
            if value != 0.0 {
                data.push(value);
                indices.push(gene as i64);
            }
        }
        indptr.push(data.len() as i64);
    }

    let file = File::create(path)?;
    let group = file.create_group(MATRIX_GROUP)?;
    group
        .new_dataset::<f32>()
        .shape(data.len())
        .create("data")?
        .write_raw(&data)?;
    group
        .new_dataset::<i64>()
        .shape(indices.len())
        .create("indices")?
        .write_raw(&indices)?;
    group
        .new_dataset::<i64>()
        .shape(indptr.len())
        .create("indptr")?
        .write_raw(&indptr)?;
    let shape = [adata.n_vars() as i64, adata.n_obs() as i64];
    group
        .new_dataset::<i64>()
        .shape(2)
        .create("shape")?
        .write_raw(&shape[..])?;

    let barcodes = to_unicode(adata.obs_names())?;
    group
        .new_dataset::<VarLenUnicode>()
        .shape(barcodes.len())
        .create("barcodes")?
        .write_raw(&barcodes)?;
    let names = to_unicode(adata.var_names())?;
    group
        .create_group("features")?
        .new_dataset::<VarLenUnicode>()
        .shape(names.len())
        .create("name")?
        .write_raw(&names)?;

    debug!("Wrote {} non-zero entries to {}", data.len(), path.display());
    Ok(())
}
