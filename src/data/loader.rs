//! Count-table loaders
//!
//! Delimited layout: the header row holds column identifiers, every following
//! row starts with its row identifier and is followed by one numeric value
//! per column. The header may or may not carry a cell above the row
//! identifiers; both layouts are recognised from the width of the first
//! record.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::Array2;
use tracing::{debug, info, instrument};

use super::{read_10x_h5, AnnData};
use crate::error::{Error, Result};

/// Extensions read as 10x-style HDF5 matrices by [`load_counts`]
const H5_EXTENSIONS: [&str; 3] = ["h5", "hdf5", "hdf"];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
}

/// Pick the field delimiter from the extension, falling back to the header line
fn detect_delimiter(path: &Path) -> Result<u8> {
    match extension(path).as_deref() {
        Some("csv") => return Ok(b','),
        Some("tsv") | Some("tab") | Some("txt") => return Ok(b'\t'),
        _ => {}
    }

    let mut header = String::new();
    BufReader::new(File::open(path)?).read_line(&mut header)?;
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

/// Load a count matrix as cells × genes.
///
/// `.h5`, `.hdf5` and `.hdf` files are read with [`read_10x_h5`]; anything
/// else is a genes × cells delimited table, read with [`read_delimited`] and
/// transposed.
pub fn load_counts(path: &Path) -> Result<AnnData> {
    match extension(path) {
        Some(ext) if H5_EXTENSIONS.contains(&ext.as_str()) => read_10x_h5(path),
        _ => Ok(read_delimited(path)?.transpose()),
    }
}

/// Read a delimited table into an [`AnnData`] with rows as observations
#[instrument]
pub fn read_delimited(path: &Path) -> Result<AnnData> {
    let delimiter = detect_delimiter(path)?;
    debug!("Reading {:?} with delimiter {:?}", path, delimiter as char);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut col_names: Option<Vec<String>> = None;
    let mut row_names = Vec::new();
    let mut values = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        let columns = col_names.get_or_insert_with(|| {
            if record.len() == header.len() + 1 {
                debug!("Header has no cell above the row names");
                header.clone()
            } else {
                header.iter().skip(1).cloned().collect()
            }
        });
        if columns.is_empty() {
            return Err(Error::parse(path, 1, "header has no data columns"));
        }
        if record.len() != columns.len() + 1 {
            return Err(Error::parse(
                path,
                line,
                format!(
                    "expected {} fields, found {}",
                    columns.len() + 1,
                    record.len()
                ),
            ));
        }

        let mut fields = record.iter();
        let name = fields
            .next()
            .ok_or_else(|| Error::parse(path, line, "empty record"))?;
        row_names.push(name.to_string());

        for (j, field) in fields.enumerate() {
            let value: f32 = field.parse().map_err(|_| {
                Error::parse(
                    path,
                    line,
                    format!("column '{}': '{}' is not a number", columns[j], field),
                )
            })?;
            if !value.is_finite() {
                return Err(Error::parse(
                    path,
                    line,
                    format!("column '{}': non-finite value '{}'", columns[j], field),
                ));
            }
            values.push(value);
        }
    }

    let col_names = match col_names {
        Some(columns) => columns,
        None => header.into_iter().skip(1).collect(),
    };
    if col_names.is_empty() {
        return Err(Error::parse(path, 1, "header has no data columns"));
    }

    let x = Array2::from_shape_vec((row_names.len(), col_names.len()), values)?;
    info!(
        "Loaded {} rows x {} columns from {:?}",
        row_names.len(),
        col_names.len(),
        path
    );
    AnnData::new(x, row_names, col_names)
}
