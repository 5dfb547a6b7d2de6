//! Triplet accumulation and compressed-column arithmetic.
//!
//! Writing goes through [`SparseMatrixTriplet`], which drops NaN values and
//! values whose magnitude does not exceed its epsilon:
//! ```text
//! stored(v) ⇔ !is_nan(v) ∧ |v| > ε
//! ```
//! With `ε = NO_FILTERING_EPSILON` (negative) only NaN is dropped. Repeated
//! (row, column) pairs are summed on conversion to [`SparseMatrixCsc`].

use super::index::SparseIndex;
use flowdec_core::FlowDecompositionError;
use sprs::{CsMat, TriMat};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Epsilon accepting every non-NaN value.
pub const NO_FILTERING_EPSILON: f64 = -1.0;

/// Errors from labelled sparse matrix operations
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("Label {0} appears twice in the same index")]
    DuplicateLabel(String),

    #[error("Label {0} is not part of the index")]
    UnknownLabel(String),

    #[error("Matrices are not built on the same index instance: {0}")]
    IndexMismatch(String),
}

impl From<MatrixError> for FlowDecompositionError {
    fn from(err: MatrixError) -> Self {
        match err {
            MatrixError::DuplicateLabel(label) => FlowDecompositionError::DuplicateElement(label),
            MatrixError::UnknownLabel(label) => FlowDecompositionError::UnknownElement(label),
            MatrixError::IndexMismatch(msg) => FlowDecompositionError::IndexMismatch(msg),
        }
    }
}

/// Write-side sparse matrix keyed through shared indexes.
#[derive(Debug)]
pub struct SparseMatrixTriplet {
    row_index: Arc<SparseIndex>,
    col_index: Arc<SparseIndex>,
    epsilon: f64,
    triplets: TriMat<f64>,
}

impl SparseMatrixTriplet {
    pub fn new(row_index: Arc<SparseIndex>, col_index: Arc<SparseIndex>, epsilon: f64) -> Self {
        let shape = (row_index.len(), col_index.len());
        Self {
            row_index,
            col_index,
            epsilon,
            triplets: TriMat::new(shape),
        }
    }

    /// Matrix storing every non-NaN value.
    pub fn unfiltered(row_index: Arc<SparseIndex>, col_index: Arc<SparseIndex>) -> Self {
        Self::new(row_index, col_index, NO_FILTERING_EPSILON)
    }

    /// Adds `value` at (`row`, `col`); filtered values are silently skipped.
    pub fn add_item(&mut self, row: &str, col: &str, value: f64) -> Result<(), MatrixError> {
        let i = self
            .row_index
            .position(row)
            .ok_or_else(|| MatrixError::UnknownLabel(row.to_string()))?;
        let j = self
            .col_index
            .position(col)
            .ok_or_else(|| MatrixError::UnknownLabel(col.to_string()))?;
        self.add_item_at(i, j, value)
    }

    /// Adds `value` at matrix positions (`i`, `j`).
    pub fn add_item_at(&mut self, i: usize, j: usize, value: f64) -> Result<(), MatrixError> {
        let (rows, cols) = self.triplets.shape();
        if i >= rows || j >= cols {
            return Err(MatrixError::UnknownLabel(format!("position ({i}, {j})")));
        }
        if value.is_nan() || value.abs() <= self.epsilon {
            return Ok(());
        }
        self.triplets.add_triplet(i, j, value);
        Ok(())
    }

    /// Number of stored entries (before duplicate summation).
    pub fn nnz(&self) -> usize {
        self.triplets.nnz()
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn row_index(&self) -> &Arc<SparseIndex> {
        &self.row_index
    }

    pub fn col_index(&self) -> &Arc<SparseIndex> {
        &self.col_index
    }

    pub fn to_csc(&self) -> SparseMatrixCsc {
        SparseMatrixCsc {
            row_index: Arc::clone(&self.row_index),
            col_index: Arc::clone(&self.col_index),
            matrix: self.triplets.to_csc(),
        }
    }
}

/// Read-side compressed-column matrix.
#[derive(Debug, Clone)]
pub struct SparseMatrixCsc {
    row_index: Arc<SparseIndex>,
    col_index: Arc<SparseIndex>,
    matrix: CsMat<f64>,
}

impl SparseMatrixCsc {
    /// Computes `self × other`.
    ///
    /// The column index of `self` must be the very instance used as row index
    /// of `other`; the product keeps `self`'s rows and `other`'s columns.
    pub fn multiply(&self, other: &SparseMatrixCsc) -> Result<SparseMatrixCsc, MatrixError> {
        if !Arc::ptr_eq(&self.col_index, &other.row_index) {
            return Err(MatrixError::IndexMismatch(format!(
                "left columns ({} labels) and right rows ({} labels)",
                self.col_index.len(),
                other.row_index.len()
            )));
        }
        // A shared index fixes the inner dimension on both sides.
        debug_assert_eq!(self.shape().1, other.shape().0);
        let product: CsMat<f64> = &self.matrix * &other.matrix;
        Ok(SparseMatrixCsc {
            row_index: Arc::clone(&self.row_index),
            col_index: Arc::clone(&other.col_index),
            matrix: product,
        })
    }

    /// Exports as `row label → (column label → value)`.
    ///
    /// With `fill_zeros` every (row, column) pair is present; otherwise only
    /// stored entries appear and rows without entries are absent.
    pub fn to_map(&self, fill_zeros: bool) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut map: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        if fill_zeros {
            for row in self.row_index.labels() {
                let columns = map.entry(row.clone()).or_default();
                for col in self.col_index.labels() {
                    columns.insert(col.clone(), 0.0);
                }
            }
        }
        for (&value, (i, j)) in self.matrix.iter() {
            if let (Some(row), Some(col)) = (self.row_index.label(i), self.col_index.label(j)) {
                map.entry(row.to_string())
                    .or_default()
                    .insert(col.to_string(), value);
            }
        }
        map
    }

    /// Value at (`row`, `col`); zero when not stored, `None` for unknown labels.
    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        let i = self.row_index.position(row)?;
        let j = self.col_index.position(col)?;
        Some(self.matrix.get(i, j).copied().unwrap_or(0.0))
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.matrix.rows(), self.matrix.cols())
    }

    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    pub fn row_index(&self) -> &Arc<SparseIndex> {
        &self.row_index
    }

    pub fn col_index(&self) -> &Arc<SparseIndex> {
        &self.col_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_epsilon_and_nan_are_dropped() {
        let rows = SparseIndex::new(["r1", "r2"]).unwrap();
        let cols = SparseIndex::new(["c1"]).unwrap();
        let mut m = SparseMatrixTriplet::new(rows, cols, 1e-3);
        m.add_item("r1", "c1", 5e-4).unwrap();
        m.add_item("r1", "c1", -1e-3).unwrap();
        m.add_item("r2", "c1", f64::NAN).unwrap();
        assert_eq!(m.nnz(), 0);
        m.add_item("r2", "c1", 2e-3).unwrap();
        assert_eq!(m.nnz(), 1);
    }

    #[test]
    fn test_no_filtering_keeps_zero_but_not_nan() {
        let rows = SparseIndex::new(["r"]).unwrap();
        let cols = SparseIndex::new(["c"]).unwrap();
        let mut m = SparseMatrixTriplet::unfiltered(rows, cols);
        m.add_item("r", "c", 0.0).unwrap();
        m.add_item("r", "c", f64::NAN).unwrap();
        assert_eq!(m.nnz(), 1);
    }

    #[test]
    fn test_unknown_label_is_an_error() {
        let rows = SparseIndex::new(["r"]).unwrap();
        let cols = SparseIndex::new(["c"]).unwrap();
        let mut m = SparseMatrixTriplet::unfiltered(rows, cols);
        assert!(matches!(
            m.add_item("x", "c", 1.0),
            Err(MatrixError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_to_map_with_and_without_zero_fill() {
        let rows = SparseIndex::new(["r1", "r2", "r3"]).unwrap();
        let cols = SparseIndex::new(["c1", "c2"]).unwrap();
        let mut m = SparseMatrixTriplet::unfiltered(rows, cols);
        m.add_item("r1", "c2", 3.0).unwrap();
        m.add_item("r3", "c1", -1.5).unwrap();
        let csc = m.to_csc();

        let filled = csc.to_map(true);
        let count: usize = filled.values().map(|row| row.len()).sum();
        assert_eq!(count, 6);
        assert!((filled["r2"]["c1"]).abs() < 1e-12);
        assert!((filled["r1"]["c2"] - 3.0).abs() < 1e-12);

        let sparse = csc.to_map(false);
        let count: usize = sparse.values().map(|row| row.len()).sum();
        assert_eq!(count, 2);
        assert!(!sparse.contains_key("r2"));
        assert!((sparse["r3"]["c1"] + 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_entries_are_summed() {
        let rows = SparseIndex::new(["r"]).unwrap();
        let cols = SparseIndex::new(["c"]).unwrap();
        let mut m = SparseMatrixTriplet::unfiltered(rows, cols);
        m.add_item("r", "c", 1.0).unwrap();
        m.add_item("r", "c", 2.5).unwrap();
        assert!((m.to_csc().get("r", "c").unwrap() - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_multiply_shapes() {
        let xnecs = SparseIndex::new(["l1", "l2"]).unwrap();
        let nodes = SparseIndex::new(["n1", "n2", "n3"]).unwrap();
        let columns = SparseIndex::new(["a", "b", "c", "d"]).unwrap();

        let mut a = SparseMatrixTriplet::unfiltered(xnecs, Arc::clone(&nodes));
        a.add_item("l1", "n1", 0.5).unwrap();
        a.add_item("l1", "n2", -0.5).unwrap();
        a.add_item("l2", "n3", 1.0).unwrap();

        let mut b = SparseMatrixTriplet::unfiltered(nodes, columns);
        b.add_item("n1", "a", 100.0).unwrap();
        b.add_item("n2", "a", 40.0).unwrap();
        b.add_item("n3", "d", 10.0).unwrap();

        let c = a.to_csc().multiply(&b.to_csc()).unwrap();
        assert_eq!(c.shape(), (2, 4));
        assert!((c.get("l1", "a").unwrap() - 30.0).abs() < 1e-12);
        assert!((c.get("l2", "d").unwrap() - 10.0).abs() < 1e-12);
        assert!((c.get("l2", "a").unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_multiply_rejects_distinct_but_equal_index() {
        let rows = SparseIndex::new(["l1"]).unwrap();
        let nodes_a = SparseIndex::new(["n1"]).unwrap();
        let nodes_b = SparseIndex::new(["n1"]).unwrap();
        let cols = SparseIndex::new(["c"]).unwrap();

        let a = SparseMatrixTriplet::unfiltered(rows, nodes_a).to_csc();
        let b = SparseMatrixTriplet::unfiltered(nodes_b, cols).to_csc();
        assert!(matches!(a.multiply(&b), Err(MatrixError::IndexMismatch(_))));
    }

    #[test]
    fn test_multiply_on_shared_empty_index() {
        let rows = SparseIndex::new(["l1", "l2"]).unwrap();
        let nodes = SparseIndex::new(Vec::<String>::new()).unwrap();
        let cols = SparseIndex::new(["c"]).unwrap();

        let a = SparseMatrixTriplet::unfiltered(rows, Arc::clone(&nodes)).to_csc();
        let b = SparseMatrixTriplet::unfiltered(nodes, cols).to_csc();
        let c = a.multiply(&b).unwrap();
        assert_eq!(c.shape(), (2, 1));
        assert_eq!(c.to_map(false).len(), 0);
    }

    #[test]
    fn test_matrix_error_converts_to_unified_error() {
        let err: FlowDecompositionError = MatrixError::IndexMismatch("ptdf".to_string()).into();
        assert!(matches!(err, FlowDecompositionError::IndexMismatch(msg) if msg == "ptdf"));
    }
}
