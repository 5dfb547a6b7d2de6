//! Flow decomposition round.
//!
//! [`FlowDecompositionComputer`] chains every stage on one network snapshot:
//!
//! 1. GLSK from the provider
//! 2. AC load flow (DC fallback per parameters), net positions
//! 3. Zonal PTDF on valid branches, XNEC and contingency selection, AC reference flows
//! 4. Loss compensation (optional), DC load flow, DC reference flows
//! 5. Matrix indexes, reference injections, nodal injection matrix
//! 6. PTDF and PSDF, allocated/loop flows, PST flows
//! 7. Decomposed flow records, rescaling
//!
//! Each contingency then replays stages 2 to 7 on a copy of the network
//! taken after the base case AC load flow, with the outaged branches
//! disconnected. GLSKs and net positions stay those of the base case.
//!
//! The network is mutated by the load flows (terminal P) and by loss
//! compensation (extra loads); every later stage only reads it. Any error
//! aborts the round.

use crate::decomposed_flow::{DecomposedFlow, DecomposedFlowsBuilder};
use crate::glsk::{AutoGlskProvider, GlskProvider, ZonalGlsks};
use crate::indexes::NetworkMatrixIndexes;
use crate::injection::{NodalInjectionComputer, ReferenceNodalInjectionComputer};
use crate::load_flow::{LoadFlowRunner, LoadFlowRunningService};
use crate::losses::LossesCompensator;
use crate::net_position::{NetPositionComputer, NetPositions};
use crate::parameters::{FlowDecompositionParameters, XnecSelectionStrategy};
use crate::pst_flow::PstFlowComputer;
use crate::reference_flow::{ReferenceFlowComputer, ReferenceFlows};
use crate::results::FlowDecompositionResults;
use crate::sensitivity::{SensitivityAnalyser, SensitivityAnalysisRunner, ZonalSensitivityAnalyser};
use crate::xnec::{
    valid_branches, AllBranchesXnecSelector, ByIdsXnecSelector, Contingency,
    InterconnectionXnecSelector, UnionXnecSelector, XnecSelector, ZonalPtdf,
    ZonalPtdfXnecSelector,
};
use flowdec_core::{BranchId, FlowDecompositionResult, Network};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use web_time::Instant;

type FlowRecords = BTreeMap<BranchId, DecomposedFlow>;

/// Builds the selector of `strategy`; `by_ids` reads the id lists of `parameters`.
fn xnec_selector<'a>(
    strategy: &XnecSelectionStrategy,
    parameters: &FlowDecompositionParameters,
    zonal_ptdf: &'a ZonalPtdf,
) -> FlowDecompositionResult<Box<dyn XnecSelector + 'a>> {
    let selector: Box<dyn XnecSelector + 'a> = match strategy {
        XnecSelectionStrategy::OnlyInterconnections => Box::new(InterconnectionXnecSelector),
        XnecSelectionStrategy::ZoneToZonePtdfCriteria => {
            Box::new(ZonalPtdfXnecSelector::new(zonal_ptdf))
        }
        XnecSelectionStrategy::AllBranches => Box::new(AllBranchesXnecSelector),
        XnecSelectionStrategy::ByIds => {
            let mut by_ids = ByIdsXnecSelector::new(parameters.xnec_ids.iter().cloned());
            for contingency in &parameters.contingencies {
                by_ids = by_ids
                    .with_contingency(Contingency::new(
                        contingency.id.clone(),
                        contingency.branches.clone(),
                    ))
                    .with_xnecs_after_contingencies(&contingency.xnecs, &[contingency.id.as_str()])?;
            }
            Box::new(by_ids)
        }
        XnecSelectionStrategy::Union(strategies) => Box::new(UnionXnecSelector::new(
            strategies
                .iter()
                .map(|strategy| xnec_selector(strategy, parameters, zonal_ptdf))
                .collect::<FlowDecompositionResult<Vec<_>>>()?,
        )),
    };
    Ok(selector)
}

pub struct FlowDecompositionComputer {
    parameters: FlowDecompositionParameters,
    load_flow_service: LoadFlowRunningService,
    sensitivity_runner: Arc<dyn SensitivityAnalysisRunner>,
}

impl FlowDecompositionComputer {
    pub fn new(
        parameters: FlowDecompositionParameters,
        load_flow_runner: Arc<dyn LoadFlowRunner>,
        sensitivity_runner: Arc<dyn SensitivityAnalysisRunner>,
    ) -> Self {
        Self {
            parameters,
            load_flow_service: LoadFlowRunningService::new(load_flow_runner),
            sensitivity_runner,
        }
    }

    pub fn parameters(&self) -> &FlowDecompositionParameters {
        &self.parameters
    }

    /// Decomposes with the automatic GLSK.
    pub fn run(&self, network: &mut Network) -> FlowDecompositionResult<FlowDecompositionResults> {
        self.run_with_glsk(network, &AutoGlskProvider)
    }

    pub fn run_with_glsk(
        &self,
        network: &mut Network,
        glsk_provider: &dyn GlskProvider,
    ) -> FlowDecompositionResult<FlowDecompositionResults> {
        let start = Instant::now();
        info!(
            network = %network.id,
            load_flow = ?self.parameters.load_flow,
            "starting flow decomposition"
        );
        let parameters = &self.parameters;
        let mut results = FlowDecompositionResults::new(network.id.clone(), network.zones());

        let glsks = glsk_provider.glsk(network)?;

        let ac = self.load_flow_service.run_ac(
            network,
            &parameters.load_flow,
            parameters.dc_fallback_enabled_after_ac_divergence,
        )?;
        let fallback_has_been_activated = ac.fallback_has_been_activated();
        let net_positions = NetPositionComputer.run(network)?;

        let valid: Vec<BranchId> = valid_branches(network)
            .iter()
            .map(|branch| branch.id.clone())
            .collect();
        let zonal_ptdf = ZonalSensitivityAnalyser::new(
            self.sensitivity_runner.as_ref(),
            &parameters.load_flow,
        )
        .run(network, &valid, &glsks)?;
        let selector = xnec_selector(&parameters.xnec_selection_strategy, parameters, &zonal_ptdf)?;
        let xnecs = selector.select(network)?;
        let contingencies = selector.contingencies(network)?;
        let mut contingency_xnecs = Vec::with_capacity(contingencies.len());
        for contingency in &contingencies {
            contingency_xnecs.push(selector.select_after_contingency(&contingency.id, network)?);
        }
        drop(selector);
        debug!(
            valid_branches = valid.len(),
            xnecs = xnecs.len(),
            contingencies = contingencies.len(),
            "selected XNECs"
        );

        // Post-contingency states start from the base case AC solution.
        let base_state = (!contingencies.is_empty()).then(|| network.clone());

        let ac_reference_flows = if fallback_has_been_activated {
            ReferenceFlowComputer.unavailable(&xnecs)
        } else {
            ReferenceFlowComputer.run(network, &xnecs)?
        };
        let (decomposed_flows, rescaled_flows) = self.decompose_state(
            network,
            None,
            &xnecs,
            &ac_reference_flows,
            &glsks,
            &net_positions,
        )?;
        results.save_decomposed_flows(decomposed_flows, rescaled_flows);

        if let Some(base_state) = base_state {
            for (contingency, xnecs) in contingencies.iter().zip(&contingency_xnecs) {
                if xnecs.is_empty() {
                    debug!(contingency = %contingency.id, "no XNEC after contingency, skipped");
                    continue;
                }
                let mut state = base_state.clone();
                contingency.apply(&mut state)?;
                let ac = self.load_flow_service.run_ac(
                    &mut state,
                    &parameters.load_flow,
                    parameters.dc_fallback_enabled_after_ac_divergence,
                )?;
                if ac.fallback_has_been_activated() {
                    warn!(
                        contingency = %contingency.id,
                        "AC load flow diverged after contingency, AC reference flows unavailable"
                    );
                }
                let ac_reference_flows = if ac.fallback_has_been_activated() {
                    ReferenceFlowComputer.unavailable(xnecs)
                } else {
                    ReferenceFlowComputer.run(&state, xnecs)?
                };
                let (decomposed_flows, rescaled_flows) = self.decompose_state(
                    &mut state,
                    Some(contingency.id.as_str()),
                    xnecs,
                    &ac_reference_flows,
                    &glsks,
                    &net_positions,
                )?;
                info!(
                    contingency = %contingency.id,
                    xnecs = xnecs.len(),
                    "post-contingency state decomposed"
                );
                results.save_post_contingency_flows(decomposed_flows, rescaled_flows);
            }
        }

        results.save_fallback_has_been_activated(fallback_has_been_activated);
        results.save_glsks(glsks);
        results.save_net_positions(net_positions);
        results.save_zonal_ptdf(zonal_ptdf);
        results.save_contingencies(contingencies);

        info!(
            network = %network.id,
            xnecs = xnecs.len(),
            fallback = fallback_has_been_activated,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "flow decomposition finished"
        );
        Ok(results)
    }

    /// Stages 4 to 7 on one network state whose AC reference flows are known.
    fn decompose_state(
        &self,
        network: &mut Network,
        contingency_id: Option<&str>,
        xnecs: &[BranchId],
        ac_reference_flows: &ReferenceFlows,
        glsks: &ZonalGlsks,
        net_positions: &NetPositions,
    ) -> FlowDecompositionResult<(FlowRecords, FlowRecords)> {
        let parameters = &self.parameters;
        if parameters.enable_losses_compensation {
            LossesCompensator::new(parameters.losses_compensation_epsilon).run(network)?;
        }
        self.load_flow_service.run_dc(network, &parameters.load_flow)?;
        let dc_reference_flows = ReferenceFlowComputer.run(network, xnecs)?;

        let indexes = NetworkMatrixIndexes::new(network, xnecs)?;
        let reference_injections = ReferenceNodalInjectionComputer::new(&indexes).run(network)?;
        let nodal_injections = NodalInjectionComputer::new(&indexes).run(
            network,
            glsks,
            net_positions,
            &reference_injections,
        )?;

        let analyser = SensitivityAnalyser::new(
            self.sensitivity_runner.as_ref(),
            &parameters.load_flow,
            &indexes,
            parameters.sensitivity_epsilon,
            parameters.sensitivity_variable_batch_size,
        );
        let ptdf = analyser.ptdf(network)?.to_csc();
        let psdf = analyser.psdf(network)?.to_csc();
        debug!(
            contingency = contingency_id.unwrap_or("base case"),
            ptdf_entries = ptdf.nnz(),
            psdf_entries = psdf.nnz(),
            "sensitivity matrices assembled"
        );

        let allocated_and_loop_flows = ptdf.multiply(&nodal_injections.to_csc())?.to_map(true);
        let pst_flows = PstFlowComputer
            .run(network, &indexes, &psdf)?
            .to_map(true);

        let mut builder = DecomposedFlowsBuilder::new(
            &allocated_and_loop_flows,
            &pst_flows,
            ac_reference_flows,
            &dc_reference_flows,
        );
        if let Some(contingency_id) = contingency_id {
            builder = builder.with_contingency(contingency_id);
        }
        let decomposed_flows = builder.build(network, xnecs)?;
        let rescaled_flows: FlowRecords = decomposed_flows
            .iter()
            .map(|(xnec, flow)| (xnec.clone(), parameters.rescale_mode.rescale(flow)))
            .collect();
        Ok((decomposed_flows, rescaled_flows))
    }
}
