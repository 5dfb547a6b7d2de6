//! Flow attributed to phase shifting transformers.
//!
//! ```text
//! Δα(pst)        = α(current tap) - α(neutral tap)      (degrees)
//! pstFlow(xnec)  = Σ_pst PSDF[xnec][pst] × Δα(pst)
//! ```
//! Only transformers with a neutral step are indexed. A tap position outside
//! the step table gives Δα = 0 and a warning.

use crate::decomposed_flow::PST_COLUMN_NAME;
use crate::indexes::NetworkMatrixIndexes;
use crate::sparse::{SparseIndex, SparseMatrixCsc, SparseMatrixTriplet};
use flowdec_core::{FlowDecompositionError, FlowDecompositionResult, Network};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
pub struct PstFlowComputer;

impl PstFlowComputer {
    /// XNEC × `PST Flow` matrix from an XNEC × PST PSDF matrix.
    pub fn run(
        &self,
        network: &Network,
        indexes: &NetworkMatrixIndexes,
        psdf: &SparseMatrixCsc,
    ) -> FlowDecompositionResult<SparseMatrixCsc> {
        let delta_taps = delta_tap_matrix(network, indexes)?;
        if indexes.psts().is_empty() {
            return Ok(SparseMatrixTriplet::unfiltered(
                Arc::clone(indexes.xnec_index()),
                Arc::clone(delta_taps.col_index()),
            )
            .to_csc());
        }
        Ok(psdf.multiply(&delta_taps.to_csc())?)
    }
}

/// PST × `PST Flow` matrix of tap angle offsets from neutral.
pub fn delta_tap_matrix(
    network: &Network,
    indexes: &NetworkMatrixIndexes,
) -> FlowDecompositionResult<SparseMatrixTriplet> {
    let column = SparseIndex::new([PST_COLUMN_NAME])?;
    let mut matrix = SparseMatrixTriplet::unfiltered(Arc::clone(indexes.pst_index()), column);
    for id in indexes.psts() {
        let ptc = network
            .branch(id)
            .and_then(|branch| branch.phase_tap_changer())
            .ok_or_else(|| FlowDecompositionError::UnknownElement(id.to_string()))?;
        let delta = match (ptc.current_alpha(), ptc.neutral_alpha()) {
            (Some(current), Some(neutral)) => current - neutral,
            _ => {
                warn!(
                    pst = %id,
                    tap_position = ptc.tap_position,
                    steps = ptc.steps.len(),
                    "tap position outside the phase tap changer range, PST flow counted as zero"
                );
                0.0
            }
        };
        matrix.add_item(id.as_str(), PST_COLUMN_NAME, delta)?;
    }
    Ok(matrix)
}
