//! On-disk storage of per-iteration estimates.
//!
//! Large component tables make an ensemble of k × k matrices expensive to
//! hold. A [`SpillStore`] writes each iteration's correlation matrix and
//! basis variance vector into a directory created for a single run, so the aggregation step
//! can only ever see files produced by that run. The directory is removed
//! when the store is closed or dropped.

use crate::data::ComponentMatrix;
use crate::error::{check_dimension, Result, SparccError};
use nalgebra::{DMatrix, DVector};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Run-scoped directory of iteration matrices.
#[derive(Debug)]
pub struct SpillStore {
    dir: TempDir,
    component_ids: Vec<String>,
}

impl SpillStore {
    /// Create a fresh run directory inside `parent`.
    pub fn create_in<P: AsRef<Path>>(parent: P, component_ids: Vec<String>) -> Result<Self> {
        std::fs::create_dir_all(parent.as_ref())?;
        let dir = tempfile::Builder::new()
            .prefix("sparcc-run-")
            .tempdir_in(parent)?;
        Ok(Self { dir, component_ids })
    }

    /// Directory holding this run's files.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn correlation_path(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("cor_{:08}.tsv", index))
    }

    fn variance_path(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("var_{:08}.tsv", index))
    }

    /// Write the correlation matrix and basis variances of iteration `index`.
    pub fn write(
        &self,
        index: usize,
        correlation: &DMatrix<f64>,
        variances: &DVector<f64>,
    ) -> Result<()> {
        check_dimension(self.component_ids.len(), variances.len())?;
        ComponentMatrix::new(correlation.clone(), self.component_ids.clone())?
            .to_tsv(self.correlation_path(index))?;

        let mut writer = BufWriter::new(File::create(self.variance_path(index))?);
        write!(writer, "component_id")?;
        for id in &self.component_ids {
            write!(writer, "\t{}", id)?;
        }
        writeln!(writer)?;
        write!(writer, "variance")?;
        for value in variances.iter() {
            write!(writer, "\t{}", value)?;
        }
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Read back iteration `index` as (correlation, basis variances).
    pub fn read(&self, index: usize) -> Result<(DMatrix<f64>, DVector<f64>)> {
        let correlation = ComponentMatrix::from_tsv(self.correlation_path(index))?.into_matrix();
        let variances = self.read_variances(index)?;
        check_dimension(correlation.nrows(), variances.len())?;
        Ok((correlation, variances))
    }

    fn read_variances(&self, index: usize) -> Result<DVector<f64>> {
        let reader = BufReader::new(File::open(self.variance_path(index))?);
        // line 0 is the id header
        let line = reader.lines().nth(1).ok_or_else(|| {
            SparccError::EmptyData(format!("Variance file of iteration {} has no values", index))
        })??;
        let values = line
            .split('\t')
            .skip(1)
            .enumerate()
            .map(|(col, raw)| {
                raw.trim().parse::<f64>().map_err(|_| SparccError::InvalidValue {
                    value: raw.to_string(),
                    row: 0,
                    col,
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        check_dimension(self.component_ids.len(), values.len())?;
        Ok(DVector::from_vec(values))
    }

    /// Read iterations `0..n_iter` in order.
    pub fn read_all(&self, n_iter: usize) -> Result<(Vec<DMatrix<f64>>, Vec<DVector<f64>>)> {
        let mut correlations = Vec::with_capacity(n_iter);
        let mut variances = Vec::with_capacity(n_iter);
        for index in 0..n_iter {
            let (correlation, variance) = self.read(index)?;
            correlations.push(correlation);
            variances.push(variance);
        }
        Ok((correlations, variances))
    }

    /// Remove the run directory.
    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}
