//! Label to dense position mapping.

use super::matrix::MatrixError;
use std::collections::HashMap;
use std::sync::Arc;

/// Bijective mapping from a row or column label to its matrix position.
///
/// Positions follow insertion order. An index is immutable once built and is
/// handed out as `Arc<SparseIndex>` so every matrix of a computation round
/// points at the same instance.
#[derive(Debug, Default)]
pub struct SparseIndex {
    labels: Vec<String>,
    positions: HashMap<String, usize>,
}

impl SparseIndex {
    /// Builds a shared index; a repeated label is an error.
    pub fn new<I, S>(labels: I) -> Result<Arc<Self>, MatrixError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = SparseIndex::default();
        for label in labels {
            let label = label.into();
            if index.positions.contains_key(&label) {
                return Err(MatrixError::DuplicateLabel(label));
            }
            index.positions.insert(label.clone(), index.labels.len());
            index.labels.push(label);
        }
        Ok(Arc::new(index))
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.positions.get(label).copied()
    }

    pub fn label(&self, position: usize) -> Option<&str> {
        self.labels.get(position).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
