//! Row and column indexes shared by every matrix of a decomposition round.

use crate::sparse::SparseIndex;
use flowdec_core::{
    BranchId, FlowDecompositionResult, Injection, InjectionId, InjectionKind, MainComponent,
    Network,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Nodes, XNECs and PSTs of one network snapshot with their shared indexes.
///
/// Positions follow network enumeration order (injection insertion order,
/// branch insertion order), never alphabetical order. X-nodes (unpaired
/// dangling lines) are nodes too and are also listed on their own.
#[derive(Debug, Clone)]
pub struct NetworkMatrixIndexes {
    xnecs: Vec<BranchId>,
    nodes: Vec<InjectionId>,
    xnodes: BTreeSet<InjectionId>,
    psts: Vec<BranchId>,
    xnec_index: Arc<SparseIndex>,
    node_index: Arc<SparseIndex>,
    pst_index: Arc<SparseIndex>,
}

impl NetworkMatrixIndexes {
    pub fn new(network: &Network, xnecs: &[BranchId]) -> FlowDecompositionResult<Self> {
        let main_component = MainComponent::compute(network);
        let node_injections: Vec<&Injection> = network
            .injections()
            .filter(|injection| injection.terminal.connected)
            .filter(|injection| main_component.contains_terminal(&injection.terminal))
            .filter(|injection| is_managed_injection(injection))
            .collect();
        let nodes: Vec<InjectionId> = node_injections
            .iter()
            .map(|injection| injection.id.clone())
            .collect();
        let xnodes: BTreeSet<InjectionId> = node_injections
            .iter()
            .filter(|injection| injection.is_unpaired_dangling_line())
            .map(|injection| injection.id.clone())
            .collect();
        let psts: Vec<BranchId> = network
            .branches()
            .filter(|branch| {
                branch
                    .phase_tap_changer()
                    .is_some_and(|ptc| ptc.has_neutral_step())
            })
            .map(|branch| branch.id.clone())
            .collect();

        debug!(
            nodes = nodes.len(),
            xnodes = xnodes.len(),
            xnecs = xnecs.len(),
            psts = psts.len(),
            "built network matrix indexes"
        );

        Ok(Self {
            xnec_index: SparseIndex::new(xnecs.iter().map(|id| id.as_str()))?,
            node_index: SparseIndex::new(nodes.iter().map(|id| id.as_str()))?,
            pst_index: SparseIndex::new(psts.iter().map(|id| id.as_str()))?,
            xnecs: xnecs.to_vec(),
            nodes,
            xnodes,
            psts,
        })
    }

    pub fn xnecs(&self) -> &[BranchId] {
        &self.xnecs
    }

    pub fn nodes(&self) -> &[InjectionId] {
        &self.nodes
    }

    /// Unpaired dangling lines among the nodes.
    pub fn xnodes(&self) -> &BTreeSet<InjectionId> {
        &self.xnodes
    }

    pub fn is_xnode(&self, node: &InjectionId) -> bool {
        self.xnodes.contains(node)
    }

    pub fn psts(&self) -> &[BranchId] {
        &self.psts
    }

    pub fn xnec_index(&self) -> &Arc<SparseIndex> {
        &self.xnec_index
    }

    pub fn node_index(&self) -> &Arc<SparseIndex> {
        &self.node_index
    }

    pub fn pst_index(&self) -> &Arc<SparseIndex> {
        &self.pst_index
    }
}

// Active power of these devices after a DC load flow is not meaningful.
fn is_managed_injection(injection: &Injection) -> bool {
    !matches!(
        injection.kind,
        InjectionKind::BusbarSection
            | InjectionKind::ShuntCompensator
            | InjectionKind::StaticVarCompensator
    )
}
