//! Labelled square matrices over components (correlations, covariances, p-values).

use crate::error::{Result, SparccError};
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A k × k matrix indexed by component on both axes.
///
/// Values are written with Rust's shortest round-trip float formatting, so a
/// matrix written with [`ComponentMatrix::to_tsv`] reads back bit-for-bit,
/// including `NaN` cells of fully excluded components.
#[derive(Debug, Clone)]
pub struct ComponentMatrix {
    /// The square matrix (components × components).
    pub data: DMatrix<f64>,
    /// Component identifiers, shared by rows and columns.
    pub component_ids: Vec<String>,
}

impl ComponentMatrix {
    /// Wrap a square matrix with its component identifiers.
    pub fn new(data: DMatrix<f64>, component_ids: Vec<String>) -> Result<Self> {
        if !data.is_square() {
            return Err(SparccError::DimensionMismatch {
                expected: data.nrows(),
                actual: data.ncols(),
            });
        }
        if data.nrows() != component_ids.len() {
            return Err(SparccError::DimensionMismatch {
                expected: data.nrows(),
                actual: component_ids.len(),
            });
        }
        Ok(Self {
            data,
            component_ids,
        })
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.data.nrows()
    }

    /// Get the value at (i, j).
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[(i, j)]
    }

    /// Get reference to the underlying matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Consume and return the underlying matrix.
    pub fn into_matrix(self) -> DMatrix<f64> {
        self.data
    }

    /// Write the matrix to a TSV file with a header row of component ids.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "component_id")?;
        for id in &self.component_ids {
            write!(writer, "\t{}", id)?;
        }
        writeln!(writer)?;

        for (i, id) in self.component_ids.iter().enumerate() {
            write!(writer, "{}", id)?;
            for j in 0..self.n_components() {
                write!(writer, "\t{}", self.data[(i, j)])?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Read a square matrix written by [`ComponentMatrix::to_tsv`].
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| SparccError::EmptyData("Empty matrix file".to_string()))??;
        let component_ids: Vec<String> = header_line
            .split('\t')
            .skip(1)
            .map(|s| s.trim().to_string())
            .collect();
        let k = component_ids.len();
        if k == 0 {
            return Err(SparccError::EmptyData(
                "Matrix file has no components".to_string(),
            ));
        }

        let mut values = Vec::with_capacity(k * k);
        let mut n_rows = 0;
        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').skip(1).collect();
            if fields.len() != k {
                return Err(SparccError::DimensionMismatch {
                    expected: k,
                    actual: fields.len(),
                });
            }
            for (col, raw) in fields.iter().enumerate() {
                let v: f64 = raw.trim().parse().map_err(|_| SparccError::InvalidValue {
                    value: raw.to_string(),
                    row: n_rows,
                    col,
                })?;
                values.push(v);
            }
            n_rows += 1;
        }
        if n_rows != k {
            return Err(SparccError::DimensionMismatch {
                expected: k,
                actual: n_rows,
            });
        }

        Self::new(DMatrix::from_row_slice(k, k, &values), component_ids)
    }
}
