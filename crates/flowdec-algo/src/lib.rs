//! # flowdec-algo: Flow Decomposition of Monitored Branches
//!
//! This crate splits the active power flow on monitored branches (XNECs) into
//! the contributions of market zones and phase shifting transformers, from a
//! solved network and externally computed sensitivities.
//!
//! ## Decomposition
//!
//! For every XNEC the DC flow is split into additive parts:
//!
//! | Part | Origin | Computation |
//! |------|--------|-------------|
//! | Allocated | Zonal net positions | PTDF × (GLSK × net position) |
//! | Loop from zone Z | Remaining injections of Z | PTDF × (reference − allocated) |
//! | Internal | Loop flow of the branch's own zone | moved out of the loop flows |
//! | PST | Tap offsets from neutral | PSDF × Δα |
//! | X-node | Unpaired boundary injections | PTDF × (reference − allocated) |
//! | Residual | Model gap | \|DC flow\| − Σ parts |
//!
//! The parts can then be rescaled onto the AC flow (see [`rescale`]).
//!
//! ### Architecture
//!
//! External engines sit behind traits and are injected into the orchestrator:
//!
//! - **[`LoadFlowRunner`]**: AC/DC load flow, wrapped by [`LoadFlowRunningService`]
//!   which owns the DC fallback policy
//! - **[`SensitivityAnalysisRunner`]**: PTDF/PSDF engine, queried in batches by
//!   [`SensitivityAnalyser`]
//! - **[`GlskProvider`]**: zonal shift keys, automatic or document based
//! - **[`XnecSelector`]**: monitored branch selection, and the contingencies
//!   after which branches are monitored again
//!
//! [`FlowDecompositionComputer`] runs one round on a network snapshot. All
//! matrices of a round share the [`sparse::SparseIndex`] instances held by
//! [`NetworkMatrixIndexes`]. Post-contingency records are keyed by
//! [`xnec_id`], `<branch>_<contingency>`.
//!
//! ## Example
//!
//! ```ignore
//! use flowdec_algo::{FlowDecompositionComputer, FlowDecompositionParameters};
//! use std::sync::Arc;
//!
//! let parameters = FlowDecompositionParameters::load("flowdec.toml")?;
//! let computer = FlowDecompositionComputer::new(
//!     parameters,
//!     Arc::new(my_load_flow),
//!     Arc::new(my_sensitivity_engine),
//! );
//!
//! let results = computer.run(&mut network)?;
//! for (xnec, flow) in results.rescaled_flows() {
//!     println!("{xnec}: allocated {:.1} MW", flow.allocated_flow);
//! }
//! ```

pub mod computer;
pub mod decomposed_flow;
pub mod glsk;
pub mod indexes;
pub mod injection;
pub mod load_flow;
pub mod losses;
pub mod net_position;
pub mod parameters;
pub mod pst_flow;
pub mod reference_flow;
pub mod rescale;
pub mod results;
pub mod sensitivity;
pub mod sparse;
pub mod test_utils;
pub mod xnec;

pub use computer::FlowDecompositionComputer;
pub use decomposed_flow::{
    loop_flow_column, xnec_id, DecomposedFlow, DecomposedFlowsBuilder, AC_REFERENCE_FLOW_COLUMN_NAME,
    ALLOCATED_COLUMN_NAME, DC_REFERENCE_FLOW_COLUMN_NAME, INTERNAL_COLUMN_NAME,
    LOOP_FLOWS_COLUMN_PREFIX, PST_COLUMN_NAME, RESIDUAL_COLUMN_NAME,
    XNODE_COLUMN_NAME,
};
pub use glsk::{
    AutoGlskProvider, DocumentBasedGlskProvider, GlskDocument, GlskInstant, GlskPoint,
    GlskProvider, InMemoryGlskDocument, ZonalGlsks,
};
pub use indexes::NetworkMatrixIndexes;
pub use injection::{NodalInjectionComputer, NodalInjections, ReferenceNodalInjectionComputer};
pub use load_flow::{
    ComputationStatus, LoadFlowParameters, LoadFlowResult, LoadFlowRunResult, LoadFlowRunner,
    LoadFlowRunningService,
};
pub use losses::{losses_load_id, LossesCompensator, DEFAULT_LOSSES_COMPENSATION_EPSILON};
pub use net_position::{NetPositionComputer, NetPositions};
pub use parameters::{ContingencyParameters, FlowDecompositionParameters, XnecSelectionStrategy};
pub use pst_flow::PstFlowComputer;
pub use reference_flow::{ReferenceFlowComputer, ReferenceFlows};
pub use rescale::RescaleMode;
pub use results::FlowDecompositionResults;
pub use sensitivity::{
    SensitivityAnalyser, SensitivityAnalysisRunner, SensitivityFactor, SensitivityValue,
    SensitivityVariableSet, SensitivityVariableType, WeightedSensitivityVariable,
    ZonalSensitivityAnalyser,
};
pub use xnec::{
    AllBranchesXnecSelector, ByIdsXnecSelector, Contingency, InterconnectionXnecSelector,
    UnionXnecSelector, XnecSelector, ZonalPtdf, ZonalPtdfXnecSelector,
    MAX_ZONE_TO_ZONE_PTDF_THRESHOLD,
};
