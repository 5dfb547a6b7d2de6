//! XNEC selection.
//!
//! Candidates are the valid branches: both sides connected and inside the
//! main synchronous component. Among them a selector keeps:
//! - [`InterconnectionXnecSelector`]: cross-zone branches only
//! - [`ZonalPtdfXnecSelector`]: cross-zone branches, plus branches whose
//!   zone-to-zone PTDF spread `max - min` reaches [`MAX_ZONE_TO_ZONE_PTDF_THRESHOLD`]
//! - [`AllBranchesXnecSelector`]: every valid branch
//!
//! [`ByIdsXnecSelector`] monitors listed branches instead, and may also define
//! contingencies with the branches monitored after each of them.
//! [`UnionXnecSelector`] merges the choices of several selectors.
//!
//! Selected XNECs always come in network order, without duplicates.

use flowdec_core::{
    Branch, BranchId, FlowDecompositionError, FlowDecompositionResult, MainComponent, Network,
    ZoneId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Minimum zone-to-zone PTDF spread for an internal branch to be monitored.
pub const MAX_ZONE_TO_ZONE_PTDF_THRESHOLD: f64 = 0.05;

/// Branch → zone → zonal PTDF.
pub type ZonalPtdf = BTreeMap<BranchId, BTreeMap<ZoneId, f64>>;

/// Outage of a set of branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contingency {
    pub id: String,
    pub branches: Vec<BranchId>,
}

impl Contingency {
    pub fn new(id: impl Into<String>, branches: Vec<BranchId>) -> Self {
        Self {
            id: id.into(),
            branches,
        }
    }

    pub fn contains(&self, branch: &BranchId) -> bool {
        self.branches.contains(branch)
    }

    /// Disconnects every outaged branch of `network`.
    pub fn apply(&self, network: &mut Network) -> FlowDecompositionResult<()> {
        for branch in &self.branches {
            network.disconnect_branch(branch)?;
        }
        Ok(())
    }
}

/// Strategy choosing the monitored branches of a network.
pub trait XnecSelector {
    /// XNECs of the base case.
    fn select(&self, network: &Network) -> FlowDecompositionResult<Vec<BranchId>>;

    /// Contingencies to study after the base case.
    fn contingencies(&self, _network: &Network) -> FlowDecompositionResult<Vec<Contingency>> {
        Ok(Vec::new())
    }

    /// XNECs monitored once `contingency_id` has happened.
    fn select_after_contingency(
        &self,
        _contingency_id: &str,
        _network: &Network,
    ) -> FlowDecompositionResult<Vec<BranchId>> {
        Ok(Vec::new())
    }
}

/// Connected branches of the main synchronous component, in network order.
pub fn valid_branches(network: &Network) -> Vec<&Branch> {
    let main_component = MainComponent::compute(network);
    network
        .branches()
        .filter(|branch| branch.is_connected())
        .filter(|branch| {
            main_component.contains_terminal(&branch.terminal1)
                && main_component.contains_terminal(&branch.terminal2)
        })
        .collect()
}

/// True when the two sides of `branch` lie in different zones.
pub fn is_interconnection(network: &Network, branch: &Branch) -> FlowDecompositionResult<bool> {
    Ok(network.terminal_zone(&branch.terminal1)? != network.terminal_zone(&branch.terminal2)?)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InterconnectionXnecSelector;

impl XnecSelector for InterconnectionXnecSelector {
    fn select(&self, network: &Network) -> FlowDecompositionResult<Vec<BranchId>> {
        let mut xnecs = Vec::new();
        for branch in valid_branches(network) {
            if is_interconnection(network, branch)? {
                xnecs.push(branch.id.clone());
            }
        }
        Ok(xnecs)
    }
}

pub struct ZonalPtdfXnecSelector<'a> {
    zonal_ptdf: &'a ZonalPtdf,
}

impl<'a> ZonalPtdfXnecSelector<'a> {
    pub fn new(zonal_ptdf: &'a ZonalPtdf) -> Self {
        Self { zonal_ptdf }
    }

    fn has_significant_spread(&self, branch: &BranchId) -> bool {
        let Some(values) = self.zonal_ptdf.get(branch).filter(|row| !row.is_empty()) else {
            return false;
        };
        let max = values.values().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.values().copied().fold(f64::INFINITY, f64::min);
        max - min >= MAX_ZONE_TO_ZONE_PTDF_THRESHOLD
    }
}

impl XnecSelector for ZonalPtdfXnecSelector<'_> {
    fn select(&self, network: &Network) -> FlowDecompositionResult<Vec<BranchId>> {
        let mut xnecs = Vec::new();
        for branch in valid_branches(network) {
            if is_interconnection(network, branch)? || self.has_significant_spread(&branch.id) {
                xnecs.push(branch.id.clone());
            }
        }
        Ok(xnecs)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllBranchesXnecSelector;

impl XnecSelector for AllBranchesXnecSelector {
    fn select(&self, network: &Network) -> FlowDecompositionResult<Vec<BranchId>> {
        Ok(valid_branches(network)
            .iter()
            .map(|branch| branch.id.clone())
            .collect())
    }
}

/// Branches chosen by id, in base case and after contingencies.
///
/// Ids missing from the network are skipped with a warning. A branch cannot
/// be monitored after a contingency that outages it.
#[derive(Debug, Clone, Default)]
pub struct ByIdsXnecSelector {
    base_case: BTreeSet<BranchId>,
    contingencies: Vec<Contingency>,
    after_contingency: BTreeMap<String, BTreeSet<BranchId>>,
}

impl ByIdsXnecSelector {
    pub fn new(ids: impl IntoIterator<Item = BranchId>) -> Self {
        Self {
            base_case: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Registers a contingency; a second definition with the same id replaces the first.
    pub fn with_contingency(mut self, contingency: Contingency) -> Self {
        self.after_contingency
            .entry(contingency.id.clone())
            .or_default();
        match self
            .contingencies
            .iter_mut()
            .find(|existing| existing.id == contingency.id)
        {
            Some(existing) => *existing = contingency,
            None => self.contingencies.push(contingency),
        }
        self
    }

    /// Monitors `branches` after each listed contingency, which must be registered.
    pub fn with_xnecs_after_contingencies(
        mut self,
        branches: &[BranchId],
        contingency_ids: &[&str],
    ) -> FlowDecompositionResult<Self> {
        for &contingency_id in contingency_ids {
            let contingency = self
                .contingencies
                .iter()
                .find(|contingency| contingency.id == contingency_id)
                .ok_or_else(|| {
                    FlowDecompositionError::Config(format!(
                        "contingency {contingency_id} is not defined"
                    ))
                })?;
            let mut monitored = Vec::new();
            for branch in branches {
                if contingency.contains(branch) {
                    warn!(
                        branch = %branch,
                        contingency = contingency_id,
                        "branch is outaged by the contingency, pair ignored"
                    );
                } else {
                    monitored.push(branch.clone());
                }
            }
            self.after_contingency
                .entry(contingency_id.to_string())
                .or_default()
                .extend(monitored);
        }
        Ok(self)
    }

    fn existing(&self, network: &Network, ids: &BTreeSet<BranchId>) -> Vec<BranchId> {
        for id in ids {
            if network.branch(id).is_none() {
                warn!(branch = %id, network = %network.id, "branch not found in network, ignored");
            }
        }
        in_network_order(network, ids)
    }
}

impl XnecSelector for ByIdsXnecSelector {
    fn select(&self, network: &Network) -> FlowDecompositionResult<Vec<BranchId>> {
        Ok(self.existing(network, &self.base_case))
    }

    fn contingencies(&self, _network: &Network) -> FlowDecompositionResult<Vec<Contingency>> {
        Ok(self.contingencies.clone())
    }

    fn select_after_contingency(
        &self,
        contingency_id: &str,
        network: &Network,
    ) -> FlowDecompositionResult<Vec<BranchId>> {
        Ok(self
            .after_contingency
            .get(contingency_id)
            .map(|ids| self.existing(network, ids))
            .unwrap_or_default())
    }
}

/// Union of the XNECs and contingencies of several selectors.
///
/// A contingency id defined by more than one selector must have the same
/// outaged branches everywhere.
pub struct UnionXnecSelector<'a> {
    selectors: Vec<Box<dyn XnecSelector + 'a>>,
}

impl<'a> UnionXnecSelector<'a> {
    pub fn new(selectors: Vec<Box<dyn XnecSelector + 'a>>) -> Self {
        Self { selectors }
    }
}

impl XnecSelector for UnionXnecSelector<'_> {
    fn select(&self, network: &Network) -> FlowDecompositionResult<Vec<BranchId>> {
        let mut ids = BTreeSet::new();
        for selector in &self.selectors {
            ids.extend(selector.select(network)?);
        }
        Ok(in_network_order(network, &ids))
    }

    fn contingencies(&self, network: &Network) -> FlowDecompositionResult<Vec<Contingency>> {
        let mut contingencies: Vec<Contingency> = Vec::new();
        for selector in &self.selectors {
            for contingency in selector.contingencies(network)? {
                match contingencies.iter().find(|known| known.id == contingency.id) {
                    Some(known) => {
                        let known_branches: BTreeSet<&BranchId> = known.branches.iter().collect();
                        let branches: BTreeSet<&BranchId> = contingency.branches.iter().collect();
                        if known_branches != branches {
                            return Err(FlowDecompositionError::Config(format!(
                                "contingency {} definition is not unique across selectors",
                                contingency.id
                            )));
                        }
                    }
                    None => contingencies.push(contingency),
                }
            }
        }
        Ok(contingencies)
    }

    fn select_after_contingency(
        &self,
        contingency_id: &str,
        network: &Network,
    ) -> FlowDecompositionResult<Vec<BranchId>> {
        let mut ids = BTreeSet::new();
        for selector in &self.selectors {
            ids.extend(selector.select_after_contingency(contingency_id, network)?);
        }
        Ok(in_network_order(network, &ids))
    }
}

fn in_network_order(network: &Network, ids: &BTreeSet<BranchId>) -> Vec<BranchId> {
    network
        .branches()
        .filter(|branch| ids.contains(&branch.id))
        .map(|branch| branch.id.clone())
        .collect()
}
