//! # Labelled Sparse Matrices for Flow Decomposition
//!
//! Sensitivity matrices are sparse: most branches react weakly to most
//! injections, and values under the configured epsilon are never stored. Rows
//! and columns are addressed by labels (branch ids, node ids, PST ids, column
//! names) through a shared [`SparseIndex`].
//!
//! ## Module Organization
//!
//! - [`index`]: Label to position mapping, shared through `Arc`
//! - [`matrix`]: Triplet accumulator and compressed-column matrix
//!
//! ## Index Sharing
//!
//! Two matrices can only be multiplied when the left column index and the right
//! row index are the *same* `Arc` instance. Equal labels in a distinct index are
//! rejected with [`MatrixError::IndexMismatch`]; nothing is reindexed.
//!
//! ## Usage
//!
//! ```ignore
//! use flowdec_algo::sparse::{SparseIndex, SparseMatrixTriplet};
//!
//! let xnecs = SparseIndex::new(["FR_BE", "BE_NL"])?;
//! let nodes = SparseIndex::new(["GEN_FR", "LOAD_BE"])?;
//! let zero = SparseIndex::new(["Allocated Flow"])?;
//!
//! let mut ptdf = SparseMatrixTriplet::new(xnecs, nodes.clone(), 1e-5);
//! ptdf.add_item("FR_BE", "GEN_FR", 0.4)?;
//!
//! let mut injections = SparseMatrixTriplet::new(nodes, zero, -1.0);
//! injections.add_item("GEN_FR", "Allocated Flow", 100.0)?;
//!
//! let flows = ptdf.to_csc().multiply(&injections.to_csc())?;
//! let map = flows.to_map(true);
//! ```

pub mod index;
pub mod matrix;

pub use index::SparseIndex;
pub use matrix::{MatrixError, SparseMatrixCsc, SparseMatrixTriplet, NO_FILTERING_EPSILON};
