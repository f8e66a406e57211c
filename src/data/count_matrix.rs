//! Count matrix with sparse storage for component abundance tables.

use crate::error::{Result, SparccError};
use nalgebra::DMatrix;
use sprs::{CsMat, TriMat};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A sparse count matrix storing component abundances across samples.
///
/// Rows represent components (OTUs/taxa), columns represent samples, which
/// is the orientation of the usual delimited count tables. The estimators
/// work on the transposed, sample-major view returned by
/// [`CountMatrix::to_sample_major`].
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Sparse matrix in CSR format (components × samples)
    data: CsMat<u64>,
    /// Component identifiers (row names)
    component_ids: Vec<String>,
    /// Sample identifiers (column names)
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new CountMatrix from a sparse matrix and identifiers.
    pub fn new(
        data: CsMat<u64>,
        component_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != component_ids.len() {
            return Err(SparccError::DimensionMismatch {
                expected: nrows,
                actual: component_ids.len(),
            });
        }
        if ncols != sample_ids.len() {
            return Err(SparccError::DimensionMismatch {
                expected: ncols,
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            data,
            component_ids,
            sample_ids,
        })
    }

    /// Load a count matrix from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with sample IDs (first column is the component ID header)
    /// - Subsequent rows: component ID followed by counts
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_delimited(path, '\t')
    }

    /// Load a count matrix, choosing the delimiter from the file extension
    /// (`.csv` is comma separated, anything else is tab separated).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let delimiter = match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ',',
            _ => '\t',
        };
        Self::from_delimited(path, delimiter)
    }

    /// Load a count matrix from a delimited text file.
    ///
    /// Counts may be written as integers or as floats with an integral value
    /// (`12` or `12.0`); anything else is rejected.
    pub fn from_delimited<P: AsRef<Path>>(path: P, delimiter: char) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        // Parse header
        let header_line = lines
            .next()
            .ok_or_else(|| SparccError::EmptyData("Empty count file".to_string()))??;
        let header: Vec<&str> = header_line.split(delimiter).collect();
        if header.len() < 2 {
            return Err(SparccError::EmptyData(
                "Count table must have at least one sample".to_string(),
            ));
        }
        let sample_ids: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();
        let n_samples = sample_ids.len();

        let mut triplets: Vec<(usize, usize, u64)> = Vec::new();
        let mut component_ids: Vec<String> = Vec::new();

        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let row_idx = component_ids.len();
            let fields: Vec<&str> = line.split(delimiter).collect();
            // every row carries its id plus exactly one count per sample
            if fields.len() - 1 != n_samples {
                return Err(SparccError::DimensionMismatch {
                    expected: n_samples,
                    actual: fields.len() - 1,
                });
            }
            component_ids.push(fields[0].trim().to_string());

            for (col_idx, value_str) in fields[1..].iter().enumerate() {
                let value = parse_count(value_str).ok_or_else(|| SparccError::InvalidValue {
                    value: value_str.to_string(),
                    row: row_idx,
                    col: col_idx,
                })?;
                if value > 0 {
                    triplets.push((row_idx, col_idx, value));
                }
            }
        }

        let n_components = component_ids.len();
        if n_components == 0 {
            return Err(SparccError::EmptyData("No components in count file".to_string()));
        }

        let mut tri_mat = TriMat::new((n_components, n_samples));
        for (row, col, val) in triplets {
            tri_mat.add_triplet(row, col, val);
        }

        Self::new(tri_mat.to_csr(), component_ids, sample_ids)
    }

    /// Write the count matrix to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "component_id")?;
        for sample_id in &self.sample_ids {
            write!(writer, "\t{}", sample_id)?;
        }
        writeln!(writer)?;

        for (row_idx, component_id) in self.component_ids.iter().enumerate() {
            write!(writer, "{}", component_id)?;
            for col_idx in 0..self.n_samples() {
                write!(writer, "\t{}", self.get(row_idx, col_idx))?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Get the value at (row, col), returning 0 for missing entries.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.data.get(row, col).copied().unwrap_or(0)
    }

    /// Number of components (rows).
    #[inline]
    pub fn n_components(&self) -> usize {
        self.data.rows()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.cols()
    }

    /// Component identifiers.
    #[inline]
    pub fn component_ids(&self) -> &[String] {
        &self.component_ids
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get a dense vector for a specific row (component).
    pub fn row_dense(&self, row: usize) -> Vec<u64> {
        let mut dense = vec![0u64; self.n_samples()];
        if let Some(row_vec) = self.data.outer_view(row) {
            for (col, &val) in row_vec.iter() {
                dense[col] = val;
            }
        }
        dense
    }

    /// Dense samples × components view, the orientation used by the
    /// fraction estimators.
    pub fn to_sample_major(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.n_samples(), self.n_components());
        for (component, row_vec) in self.data.outer_iterator().enumerate() {
            for (sample, &val) in row_vec.iter() {
                dense[(sample, component)] = val as f64;
            }
        }
        dense
    }

    /// Create from dense rows (one `Vec` per component).
    pub fn from_rows(
        rows: &[Vec<u64>],
        component_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let n_samples = sample_ids.len();
        let mut tri_mat = TriMat::new((rows.len(), n_samples));
        for (row, values) in rows.iter().enumerate() {
            if values.len() != n_samples {
                return Err(SparccError::DimensionMismatch {
                    expected: n_samples,
                    actual: values.len(),
                });
            }
            for (col, &val) in values.iter().enumerate() {
                if val > 0 {
                    tri_mat.add_triplet(row, col, val);
                }
            }
        }
        Self::new(tri_mat.to_csr(), component_ids, sample_ids)
    }
}

fn parse_count(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<u64>() {
        return Some(v);
    }
    let v: f64 = trimmed.parse().ok()?;
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 {
        Some(v as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_matrix() -> CountMatrix {
        // 3 components × 4 samples
        let mut tri_mat = TriMat::new((3, 4));
        tri_mat.add_triplet(0, 0, 10);
        tri_mat.add_triplet(0, 1, 20);
        tri_mat.add_triplet(0, 3, 5);
        tri_mat.add_triplet(1, 0, 100);
        tri_mat.add_triplet(1, 1, 200);
        tri_mat.add_triplet(1, 2, 150);
        tri_mat.add_triplet(1, 3, 175);
        tri_mat.add_triplet(2, 0, 1);

        let component_ids = vec!["otu_A".to_string(), "otu_B".to_string(), "otu_C".to_string()];
        let sample_ids = vec![
            "sample1".to_string(),
            "sample2".to_string(),
            "sample3".to_string(),
            "sample4".to_string(),
        ];

        CountMatrix::new(tri_mat.to_csr(), component_ids, sample_ids).unwrap()
    }

    #[test]
    fn test_dimensions() {
        let mat = create_test_matrix();
        assert_eq!(mat.n_components(), 3);
        assert_eq!(mat.n_samples(), 4);
    }

    #[test]
    fn test_sample_major_orientation() {
        let mat = create_test_matrix();
        let dense = mat.to_sample_major();
        assert_eq!(dense.shape(), (4, 3));
        assert_eq!(dense[(1, 0)], 20.0);
        assert_eq!(dense[(2, 1)], 150.0);
        assert_eq!(dense[(3, 2)], 0.0);
    }

    #[test]
    fn test_tsv_roundtrip() {
        let mat = create_test_matrix();

        let temp_file = NamedTempFile::new().unwrap();
        mat.to_tsv(temp_file.path()).unwrap();

        let loaded = CountMatrix::from_tsv(temp_file.path()).unwrap();
        assert_eq!(loaded.component_ids(), mat.component_ids());
        assert_eq!(loaded.sample_ids(), mat.sample_ids());
        for row in 0..mat.n_components() {
            assert_eq!(loaded.row_dense(row), mat.row_dense(row));
        }
    }

    #[test]
    fn test_csv_with_float_counts() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "otu,s1,s2").unwrap();
        writeln!(file, "a,1.0,3").unwrap();
        writeln!(file, "b,0,7.0").unwrap();
        file.flush().unwrap();

        let loaded = CountMatrix::from_path(file.path()).unwrap();
        assert_eq!(loaded.row_dense(0), vec![1, 3]);
        assert_eq!(loaded.row_dense(1), vec![0, 7]);
    }

    #[test]
    fn test_rejects_fractional_counts() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "otu\ts1").unwrap();
        writeln!(file, "a\t1.5").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            CountMatrix::from_tsv(file.path()),
            Err(SparccError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let mut short = NamedTempFile::new().unwrap();
        writeln!(short, "otu\ts1\ts2\ts3").unwrap();
        writeln!(short, "a\t5").unwrap();
        short.flush().unwrap();
        assert!(matches!(
            CountMatrix::from_tsv(short.path()),
            Err(SparccError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        ));

        let mut long = NamedTempFile::new().unwrap();
        writeln!(long, "otu\ts1\ts2").unwrap();
        writeln!(long, "a\t1\t2").unwrap();
        writeln!(long, "b\t1\t2\t3").unwrap();
        long.flush().unwrap();
        assert!(matches!(
            CountMatrix::from_tsv(long.path()),
            Err(SparccError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_from_rows_checks_width() {
        let rows = vec![vec![1, 2], vec![3]];
        let result = CountMatrix::from_rows(&rows, vec!["a".into(), "b".into()], vec!["s1".into(), "s2".into()]);
        assert!(result.is_err());
    }
}
