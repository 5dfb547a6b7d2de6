//! Side-1 active power of monitored branches.

use flowdec_core::{BranchId, FlowDecompositionError, FlowDecompositionResult, Network};
use std::collections::BTreeMap;

/// XNEC → side-1 active power (MW); NaN when the side is unsolved.
pub type ReferenceFlows = BTreeMap<BranchId, f64>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceFlowComputer;

impl ReferenceFlowComputer {
    pub fn run(&self, network: &Network, xnecs: &[BranchId]) -> FlowDecompositionResult<ReferenceFlows> {
        xnecs
            .iter()
            .map(|id| {
                network
                    .branch(id)
                    .map(|branch| (id.clone(), branch.terminal1.p))
                    .ok_or_else(|| FlowDecompositionError::UnknownElement(id.to_string()))
            })
            .collect()
    }

    /// Same branches, every value replaced by NaN (flows unavailable).
    pub fn unavailable(&self, xnecs: &[BranchId]) -> ReferenceFlows {
        xnecs.iter().map(|id| (id.clone(), f64::NAN)).collect()
    }
}
