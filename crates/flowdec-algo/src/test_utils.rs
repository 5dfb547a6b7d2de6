//! Table-driven collaborators for tests and examples.
//!
//! [`FixedFlowLoadFlowRunner`] writes prescribed branch flows instead of
//! solving, and [`TableSensitivityRunner`] answers sensitivities from a
//! lookup table. Together they make decomposition results computable by hand.
//!
//! Both accept overrides keyed by an outaged branch: they apply whenever that
//! branch is disconnected in the network being solved, which is how
//! post-contingency states are described.

use crate::load_flow::{LoadFlowParameters, LoadFlowResult, LoadFlowRunner};
use crate::sensitivity::{
    SensitivityAnalysisRunner, SensitivityFactor, SensitivityValue, SensitivityVariableSet,
};
use flowdec_core::{
    BranchId, FlowDecompositionError, FlowDecompositionResult, InjectionKind, Network,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Load flow stand-in writing fixed side flows.
///
/// Injection terminals get their set point (`p0` for loads and dangling
/// lines, `-target_p` for generators), so loads added between runs are solved
/// too. Branch sides absent from the tables are left untouched.
#[derive(Debug, Default)]
pub struct FixedFlowLoadFlowRunner {
    ac_flows: HashMap<BranchId, (f64, f64)>,
    dc_flows: HashMap<BranchId, (f64, f64)>,
    outage_flows: HashMap<(BranchId, BranchId), (f64, f64)>,
    ac_diverges: bool,
    dc_diverges: bool,
    runs: AtomicUsize,
}

impl FixedFlowLoadFlowRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same side flows for AC and DC runs.
    pub fn with_flow(self, branch: &str, p1: f64, p2: f64) -> Self {
        self.with_ac_flow(branch, p1, p2).with_dc_flow(branch, p1, p2)
    }

    pub fn with_ac_flow(mut self, branch: &str, p1: f64, p2: f64) -> Self {
        self.ac_flows.insert(BranchId::new(branch), (p1, p2));
        self
    }

    pub fn with_dc_flow(mut self, branch: &str, p1: f64, p2: f64) -> Self {
        self.dc_flows.insert(BranchId::new(branch), (p1, p2));
        self
    }

    /// Side flows of `branch`, AC and DC, while `outage` is disconnected.
    pub fn with_flow_after_outage(mut self, outage: &str, branch: &str, p1: f64, p2: f64) -> Self {
        self.outage_flows
            .insert((BranchId::new(outage), BranchId::new(branch)), (p1, p2));
        self
    }

    pub fn ac_diverging(mut self) -> Self {
        self.ac_diverges = true;
        self
    }

    pub fn dc_diverging(mut self) -> Self {
        self.dc_diverges = true;
        self
    }

    /// Number of `run` calls so far.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl LoadFlowRunner for FixedFlowLoadFlowRunner {
    fn id(&self) -> &str {
        "fixed-flow"
    }

    fn run(&self, network: &mut Network, parameters: &LoadFlowParameters) -> LoadFlowResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let (flows, diverges) = if parameters.dc {
            (&self.dc_flows, self.dc_diverges)
        } else {
            (&self.ac_flows, self.ac_diverges)
        };
        if diverges {
            network.reset_flows();
            return LoadFlowResult::failed();
        }

        for injection in network.injections_mut() {
            injection.terminal.p = if !injection.terminal.connected {
                f64::NAN
            } else {
                match injection.kind {
                    InjectionKind::Generator { target_p } => -target_p,
                    InjectionKind::Load { p0, .. } | InjectionKind::DanglingLine { p0, .. } => p0,
                    _ => 0.0,
                }
            };
        }
        let outages = disconnected_branches(network);
        for branch in network.branches_mut() {
            let flow = outages
                .iter()
                .find_map(|outage| self.outage_flows.get(&(outage.clone(), branch.id.clone())))
                .or_else(|| flows.get(&branch.id));
            if let Some(&(p1, p2)) = flow {
                branch.terminal1.p = if branch.terminal1.connected { p1 } else { f64::NAN };
                branch.terminal2.p = if branch.terminal2.connected { p2 } else { f64::NAN };
            }
        }
        LoadFlowResult::converged(1)
    }
}

/// Sensitivity engine answering from a (branch, variable) table.
///
/// Variable sets are answered as the weighted sum of their members. The
/// function reference is the side-1 flow currently in the network (zero when
/// unsolved). Missing table entries are treated as zero sensitivity.
#[derive(Debug, Default)]
pub struct TableSensitivityRunner {
    values: HashMap<(String, String), f64>,
    outage_values: HashMap<(String, String, String), f64>,
    calls: AtomicUsize,
}

impl TableSensitivityRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensitivity(mut self, branch: &str, variable: &str, value: f64) -> Self {
        self.values
            .insert((branch.to_string(), variable.to_string()), value);
        self
    }

    /// Sensitivity used while `outage` is disconnected.
    pub fn with_sensitivity_after_outage(
        mut self,
        outage: &str,
        branch: &str,
        variable: &str,
        value: f64,
    ) -> Self {
        self.outage_values.insert(
            (outage.to_string(), branch.to_string(), variable.to_string()),
            value,
        );
        self
    }

    /// Number of engine calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn sensitivity(&self, outages: &[BranchId], branch: &BranchId, variable: &str) -> f64 {
        outages
            .iter()
            .find_map(|outage| {
                self.outage_values.get(&(
                    outage.to_string(),
                    branch.to_string(),
                    variable.to_string(),
                ))
            })
            .or_else(|| self.values.get(&(branch.to_string(), variable.to_string())))
            .copied()
            .unwrap_or(0.0)
    }
}

impl SensitivityAnalysisRunner for TableSensitivityRunner {
    fn id(&self) -> &str {
        "table"
    }

    fn run(
        &self,
        network: &Network,
        factors: &[SensitivityFactor],
        variable_sets: &[SensitivityVariableSet],
        _parameters: &LoadFlowParameters,
    ) -> FlowDecompositionResult<Vec<SensitivityValue>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outages = disconnected_branches(network);
        let mut values = Vec::with_capacity(factors.len());
        for (factor_index, factor) in factors.iter().enumerate() {
            let branch = network
                .branch(&factor.function_id)
                .ok_or_else(|| FlowDecompositionError::UnknownElement(factor.function_id.to_string()))?;
            let value = if factor.variable_set {
                let set = variable_sets
                    .iter()
                    .find(|set| set.id == factor.variable_id)
                    .ok_or_else(|| FlowDecompositionError::UnknownElement(factor.variable_id.clone()))?;
                set.variables
                    .iter()
                    .map(|variable| {
                        variable.weight
                            * self.sensitivity(&outages, &factor.function_id, variable.id.as_str())
                    })
                    .sum()
            } else {
                self.sensitivity(&outages, &factor.function_id, &factor.variable_id)
            };
            let function_reference = if branch.terminal1.has_p() {
                branch.terminal1.p
            } else {
                0.0
            };
            values.push(SensitivityValue {
                factor_index,
                value,
                function_reference,
            });
        }
        Ok(values)
    }
}

fn disconnected_branches(network: &Network) -> Vec<BranchId> {
    network
        .branches()
        .filter(|branch| !branch.is_connected())
        .map(|branch| branch.id.clone())
        .collect()
}
