//! Per-XNEC decomposition record.
//!
//! A record splits the DC flow of a monitored branch into additive parts:
//! ```text
//! |DC reference| = allocated + PST + x-node + Σ loop(zone) + internal + residual
//! ```
//! - allocated: flow caused by the zonal net positions through the GLSKs
//! - PST: flow caused by phase shifting transformers away from neutral
//! - x-node: flow caused by unpaired boundary injections (x-nodes)
//! - loop(zone): flow caused by the remaining injections of each zone
//! - internal: the loop flow of the branch's own zone, for a branch with both
//!   sides in the same zone
//! - residual: whatever the linear model does not explain
//!
//! Every part but the residual is an explained part. All parts are oriented
//! along the reference flow direction.

use crate::reference_flow::ReferenceFlows;
use flowdec_core::{BranchId, FlowDecompositionError, FlowDecompositionResult, Network, ZoneId};
use serde::Serialize;
use std::collections::BTreeMap;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

pub const ALLOCATED_COLUMN_NAME: &str = "Allocated Flow";
pub const PST_COLUMN_NAME: &str = "PST Flow";
pub const XNODE_COLUMN_NAME: &str = "Xnode Flow";
pub const INTERNAL_COLUMN_NAME: &str = "Internal Flow";
pub const RESIDUAL_COLUMN_NAME: &str = "Residual Flow";
pub const AC_REFERENCE_FLOW_COLUMN_NAME: &str = "Reference AC Flow";
pub const DC_REFERENCE_FLOW_COLUMN_NAME: &str = "Reference DC Flow";
pub const LOOP_FLOWS_COLUMN_PREFIX: &str = "Loop Flow from";

/// Column name of the loop flow coming from `zone`, e.g. `Loop Flow from FR`.
pub fn loop_flow_column(zone: &ZoneId) -> String {
    format!("{LOOP_FLOWS_COLUMN_PREFIX} {zone}")
}

/// Identifier of an XNEC in a given state: the branch id in base case,
/// `<branch>_<contingency>` after a contingency.
pub fn xnec_id(branch_id: &BranchId, contingency_id: Option<&str>) -> String {
    match contingency_id {
        Some(contingency) => format!("{branch_id}_{contingency}"),
        None => branch_id.to_string(),
    }
}

/// Row/column matrix export: row label → (column label → value).
pub type LabelledFlows = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecomposedFlow {
    pub branch_id: BranchId,
    /// Contingency of the post-outage state; `None` in base case
    pub contingency_id: Option<String>,
    pub zone1: ZoneId,
    pub zone2: ZoneId,
    /// Side-1 AC flow; NaN when the AC load flow fell back to DC
    pub ac_reference_flow: f64,
    /// Side-1 flow of the DC load flow
    pub dc_reference_flow: f64,
    pub allocated_flow: f64,
    pub pst_flow: f64,
    pub xnode_flow: f64,
    pub internal_flow: f64,
    /// `Loop Flow from <zone>` → value, own zone excluded for internal branches
    pub loop_flows: BTreeMap<String, f64>,
    pub residual_flow: f64,
}

impl DecomposedFlow {
    pub fn xnec_id(&self) -> String {
        xnec_id(&self.branch_id, self.contingency_id.as_deref())
    }

    pub fn is_internal_branch(&self) -> bool {
        self.zone1 == self.zone2
    }

    /// Loop flow from `zone`; zero when absent.
    pub fn loop_flow(&self, zone: &ZoneId) -> f64 {
        self.loop_flows
            .get(&loop_flow_column(zone))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn total_loop_flow(&self) -> f64 {
        self.loop_flows.values().sum()
    }

    /// Sum of every flow part, residual included.
    pub fn total_flow(&self) -> f64 {
        self.explained_flow() + self.residual_flow
    }

    /// Sum of the parts attributed by the linear model, residual excluded.
    pub fn explained_flow(&self) -> f64 {
        self.allocated_flow
            + self.pst_flow
            + self.xnode_flow
            + self.total_loop_flow()
            + self.internal_flow
    }

    /// Applies `f` to every explained part. Residual and reference flows are kept.
    pub fn map_parts(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            branch_id: self.branch_id.clone(),
            contingency_id: self.contingency_id.clone(),
            zone1: self.zone1.clone(),
            zone2: self.zone2.clone(),
            ac_reference_flow: self.ac_reference_flow,
            dc_reference_flow: self.dc_reference_flow,
            allocated_flow: f(self.allocated_flow),
            pst_flow: f(self.pst_flow),
            xnode_flow: f(self.xnode_flow),
            internal_flow: f(self.internal_flow),
            loop_flows: self
                .loop_flows
                .iter()
                .map(|(column, value)| (column.clone(), f(*value)))
                .collect(),
            residual_flow: self.residual_flow,
        }
    }

    /// Every column by name.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = self.loop_flows.clone();
        map.insert(ALLOCATED_COLUMN_NAME.to_string(), self.allocated_flow);
        map.insert(PST_COLUMN_NAME.to_string(), self.pst_flow);
        map.insert(XNODE_COLUMN_NAME.to_string(), self.xnode_flow);
        map.insert(INTERNAL_COLUMN_NAME.to_string(), self.internal_flow);
        map.insert(RESIDUAL_COLUMN_NAME.to_string(), self.residual_flow);
        map.insert(
            AC_REFERENCE_FLOW_COLUMN_NAME.to_string(),
            self.ac_reference_flow,
        );
        map.insert(
            DC_REFERENCE_FLOW_COLUMN_NAME.to_string(),
            self.dc_reference_flow,
        );
        map
    }
}

/// Assembles records from the flow matrices of one round.
pub struct DecomposedFlowsBuilder<'a> {
    contingency_id: Option<&'a str>,
    allocated_and_loop_flows: &'a LabelledFlows,
    pst_flows: &'a LabelledFlows,
    ac_reference_flows: &'a ReferenceFlows,
    dc_reference_flows: &'a ReferenceFlows,
}

impl<'a> DecomposedFlowsBuilder<'a> {
    pub fn new(
        allocated_and_loop_flows: &'a LabelledFlows,
        pst_flows: &'a LabelledFlows,
        ac_reference_flows: &'a ReferenceFlows,
        dc_reference_flows: &'a ReferenceFlows,
    ) -> Self {
        Self {
            contingency_id: None,
            allocated_and_loop_flows,
            pst_flows,
            ac_reference_flows,
            dc_reference_flows,
        }
    }

    /// Tags every record with the contingency of a post-outage state.
    pub fn with_contingency(mut self, contingency_id: &'a str) -> Self {
        self.contingency_id = Some(contingency_id);
        self
    }

    /// One record per XNEC. Records are independent and built in parallel
    /// when the `rayon` feature is on.
    pub fn build(
        &self,
        network: &Network,
        xnecs: &[BranchId],
    ) -> FlowDecompositionResult<BTreeMap<BranchId, DecomposedFlow>> {
        #[cfg(feature = "rayon")]
        let records: FlowDecompositionResult<Vec<DecomposedFlow>> = xnecs
            .par_iter()
            .map(|xnec| self.build_one(network, xnec))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let records: FlowDecompositionResult<Vec<DecomposedFlow>> = xnecs
            .iter()
            .map(|xnec| self.build_one(network, xnec))
            .collect();

        Ok(records?
            .into_iter()
            .map(|record| (record.branch_id.clone(), record))
            .collect())
    }

    fn build_one(&self, network: &Network, xnec: &BranchId) -> FlowDecompositionResult<DecomposedFlow> {
        let branch = network
            .branch(xnec)
            .ok_or_else(|| FlowDecompositionError::UnknownElement(xnec.to_string()))?;
        let zone1 = network.terminal_zone(&branch.terminal1)?.clone();
        let zone2 = network.terminal_zone(&branch.terminal2)?.clone();

        let empty = BTreeMap::new();
        let columns = self
            .allocated_and_loop_flows
            .get(xnec.as_str())
            .unwrap_or(&empty);
        let allocated_flow = columns.get(ALLOCATED_COLUMN_NAME).copied().unwrap_or(0.0);
        let xnode_flow = columns.get(XNODE_COLUMN_NAME).copied().unwrap_or(0.0);
        let mut loop_flows: BTreeMap<String, f64> = columns
            .iter()
            .filter(|(column, _)| column.starts_with(LOOP_FLOWS_COLUMN_PREFIX))
            .map(|(column, value)| (column.clone(), *value))
            .collect();
        let internal_flow = if zone1 == zone2 {
            loop_flows.remove(&loop_flow_column(&zone1)).unwrap_or(0.0)
        } else {
            0.0
        };
        let pst_flow = self
            .pst_flows
            .get(xnec.as_str())
            .and_then(|columns| columns.get(PST_COLUMN_NAME))
            .copied()
            .unwrap_or(0.0);
        let ac_reference_flow = self
            .ac_reference_flows
            .get(xnec)
            .copied()
            .unwrap_or(f64::NAN);
        let dc_reference_flow = self
            .dc_reference_flows
            .get(xnec)
            .copied()
            .unwrap_or(f64::NAN);

        let mut record = DecomposedFlow {
            branch_id: xnec.clone(),
            contingency_id: self.contingency_id.map(str::to_string),
            zone1,
            zone2,
            ac_reference_flow,
            dc_reference_flow,
            allocated_flow,
            pst_flow,
            xnode_flow,
            internal_flow,
            loop_flows,
            residual_flow: 0.0,
        };
        record.residual_flow = dc_reference_flow.abs() - record.explained_flow();
        Ok(record)
    }
}
