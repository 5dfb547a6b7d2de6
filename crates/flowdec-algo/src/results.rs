//! Output of a decomposition round and its exports.
//!
//! Base case records are keyed by branch id. Post-contingency records are
//! keyed by XNEC id, `<branch>_<contingency>`.

use crate::decomposed_flow::{xnec_id, DecomposedFlow};
use crate::glsk::ZonalGlsks;
use crate::net_position::NetPositions;
use crate::xnec::{Contingency, ZonalPtdf};
use anyhow::{Context, Result};
use chrono::Utc;
use flowdec_core::{BranchId, ZoneId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct FlowDecompositionResults {
    network_id: String,
    id: String,
    zones: BTreeSet<ZoneId>,
    fallback_has_been_activated: bool,
    glsks: ZonalGlsks,
    net_positions: NetPositions,
    zonal_ptdf: ZonalPtdf,
    decomposed_flows: BTreeMap<BranchId, DecomposedFlow>,
    rescaled_flows: BTreeMap<BranchId, DecomposedFlow>,
    contingencies: Vec<Contingency>,
    post_contingency_decomposed_flows: BTreeMap<String, DecomposedFlow>,
    post_contingency_rescaled_flows: BTreeMap<String, DecomposedFlow>,
}

impl FlowDecompositionResults {
    pub fn new(network_id: impl Into<String>, zones: BTreeSet<ZoneId>) -> Self {
        let network_id = network_id.into();
        let id = format!(
            "Flow_Decomposition_Results_of_{}_on_network_{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            network_id
        );
        Self {
            network_id,
            id,
            zones,
            fallback_has_been_activated: false,
            glsks: ZonalGlsks::new(),
            net_positions: NetPositions::new(),
            zonal_ptdf: ZonalPtdf::new(),
            decomposed_flows: BTreeMap::new(),
            rescaled_flows: BTreeMap::new(),
            contingencies: Vec::new(),
            post_contingency_decomposed_flows: BTreeMap::new(),
            post_contingency_rescaled_flows: BTreeMap::new(),
        }
    }

    pub(crate) fn save_fallback_has_been_activated(&mut self, activated: bool) {
        self.fallback_has_been_activated = activated;
    }

    pub(crate) fn save_glsks(&mut self, glsks: ZonalGlsks) {
        self.glsks = glsks;
    }

    pub(crate) fn save_net_positions(&mut self, net_positions: NetPositions) {
        self.net_positions = net_positions;
    }

    pub(crate) fn save_zonal_ptdf(&mut self, zonal_ptdf: ZonalPtdf) {
        self.zonal_ptdf = zonal_ptdf;
    }

    pub(crate) fn save_decomposed_flows(
        &mut self,
        decomposed_flows: BTreeMap<BranchId, DecomposedFlow>,
        rescaled_flows: BTreeMap<BranchId, DecomposedFlow>,
    ) {
        self.decomposed_flows = decomposed_flows;
        self.rescaled_flows = rescaled_flows;
    }

    pub(crate) fn save_contingencies(&mut self, contingencies: Vec<Contingency>) {
        self.contingencies = contingencies;
    }

    pub(crate) fn save_post_contingency_flows(
        &mut self,
        decomposed_flows: BTreeMap<BranchId, DecomposedFlow>,
        rescaled_flows: BTreeMap<BranchId, DecomposedFlow>,
    ) {
        self.post_contingency_decomposed_flows.extend(
            decomposed_flows
                .into_values()
                .map(|flow| (flow.xnec_id(), flow)),
        );
        self.post_contingency_rescaled_flows.extend(
            rescaled_flows
                .into_values()
                .map(|flow| (flow.xnec_id(), flow)),
        );
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    /// Timestamped id of this result set.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn zones(&self) -> &BTreeSet<ZoneId> {
        &self.zones
    }

    /// True when the AC load flow diverged and DC flows stand in for AC flows.
    pub fn fallback_has_been_activated(&self) -> bool {
        self.fallback_has_been_activated
    }

    pub fn glsks(&self) -> &ZonalGlsks {
        &self.glsks
    }

    pub fn net_positions(&self) -> &NetPositions {
        &self.net_positions
    }

    pub fn zonal_ptdf(&self) -> &ZonalPtdf {
        &self.zonal_ptdf
    }

    /// Records before rescaling.
    pub fn decomposed_flows(&self) -> &BTreeMap<BranchId, DecomposedFlow> {
        &self.decomposed_flows
    }

    /// Records after rescaling; equal to [`Self::decomposed_flows`] with `RescaleMode::None`.
    pub fn rescaled_flows(&self) -> &BTreeMap<BranchId, DecomposedFlow> {
        &self.rescaled_flows
    }

    pub fn rescaled_flow(&self, xnec: &BranchId) -> Option<&DecomposedFlow> {
        self.rescaled_flows.get(xnec)
    }

    /// Contingencies studied after the base case.
    pub fn contingencies(&self) -> &[Contingency] {
        &self.contingencies
    }

    /// Post-contingency records before rescaling, by XNEC id.
    pub fn post_contingency_decomposed_flows(&self) -> &BTreeMap<String, DecomposedFlow> {
        &self.post_contingency_decomposed_flows
    }

    /// Post-contingency records after rescaling, by XNEC id.
    pub fn post_contingency_rescaled_flows(&self) -> &BTreeMap<String, DecomposedFlow> {
        &self.post_contingency_rescaled_flows
    }

    pub fn rescaled_flow_after_contingency(
        &self,
        branch: &BranchId,
        contingency_id: &str,
    ) -> Option<&DecomposedFlow> {
        self.post_contingency_rescaled_flows
            .get(&xnec_id(branch, Some(contingency_id)))
    }

    /// Export to JSON format
    pub fn to_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("serializing FlowDecompositionResults to JSON")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing JSON to {}", path.display()))?;
        Ok(())
    }

    /// Convert to JSON value (for streaming/stdout)
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).context("converting FlowDecompositionResults to JSON value")
    }

    /// Export rescaled records to CSV, one row per XNEC, base case first (requires csv feature)
    #[cfg(feature = "csv")]
    pub fn to_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("creating CSV writer for {}", path.display()))?;

        // Loop flow columns differ between internal and cross-border branches
        let flows: Vec<&DecomposedFlow> = self
            .rescaled_flows
            .values()
            .chain(self.post_contingency_rescaled_flows.values())
            .collect();
        let columns: BTreeSet<String> = flows
            .iter()
            .flat_map(|flow| flow.to_map().into_keys())
            .collect();

        let mut header = vec!["xnec".to_string(), "zone1".to_string(), "zone2".to_string()];
        header.extend(columns.iter().cloned());
        wtr.write_record(&header).context("writing CSV header")?;

        for flow in flows {
            let values = flow.to_map();
            let mut record = vec![
                flow.xnec_id(),
                flow.zone1.to_string(),
                flow.zone2.to_string(),
            ];
            record.extend(
                columns
                    .iter()
                    .map(|column| values.get(column).copied().unwrap_or(0.0).to_string()),
            );
            wtr.write_record(&record).context("writing CSV record")?;
        }

        wtr.flush().context("flushing CSV writer")?;
        Ok(())
    }
}
