//! Sensitivity matrix assembly.
//!
//! PTDF and PSDF values come from an external engine behind
//! [`SensitivityAnalysisRunner`]. This module builds the factor lists, queries
//! the engine in batches, and stores the answers in sparse matrices over the
//! shared indexes.
//!
//! ## Orientation
//!
//! Every sensitivity is reported with respect to the reference flow direction
//! of its branch:
//! ```text
//! oriented = -s   if reference flow < 0
//! oriented =  s   otherwise
//! ```

use crate::glsk::ZonalGlsks;
use crate::indexes::NetworkMatrixIndexes;
use crate::load_flow::LoadFlowParameters;
use crate::sparse::{SparseIndex, SparseMatrixTriplet};
use flowdec_core::{
    BranchId, FlowDecompositionError, FlowDecompositionResult, InjectionId, Network, ZoneId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Default number of variables per engine call.
pub const SENSITIVITY_VARIABLE_BATCH_SIZE: usize = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityVariableType {
    /// Active power injected by an injection (PTDF)
    InjectionActivePower,
    /// Phase shift of a transformer, in degrees (PSDF)
    TransformerPhase,
}

/// Sensitivity of the side-1 active power of a branch to one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityFactor {
    pub function_id: BranchId,
    pub variable_type: SensitivityVariableType,
    /// Injection id, transformer id, or variable set id
    pub variable_id: String,
    pub variable_set: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSensitivityVariable {
    pub id: InjectionId,
    pub weight: f64,
}

/// Weighted group of injections shifted together.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityVariableSet {
    pub id: String,
    pub variables: Vec<WeightedSensitivityVariable>,
}

/// Engine answer for one factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensitivityValue {
    /// Position of the factor in the submitted list
    pub factor_index: usize,
    pub value: f64,
    /// Branch flow of the base case
    pub function_reference: f64,
}

/// External sensitivity engine.
pub trait SensitivityAnalysisRunner: Send + Sync {
    /// Unique identifier (e.g., "open-loadflow", "mock")
    fn id(&self) -> &str;

    fn run(
        &self,
        network: &Network,
        factors: &[SensitivityFactor],
        variable_sets: &[SensitivityVariableSet],
        parameters: &LoadFlowParameters,
    ) -> FlowDecompositionResult<Vec<SensitivityValue>>;
}

/// Builds XNEC × variable sensitivity matrices.
pub struct SensitivityAnalyser<'a> {
    runner: &'a dyn SensitivityAnalysisRunner,
    parameters: LoadFlowParameters,
    indexes: &'a NetworkMatrixIndexes,
    epsilon: f64,
    batch_size: usize,
}

impl<'a> SensitivityAnalyser<'a> {
    pub fn new(
        runner: &'a dyn SensitivityAnalysisRunner,
        parameters: &LoadFlowParameters,
        indexes: &'a NetworkMatrixIndexes,
        epsilon: f64,
        batch_size: usize,
    ) -> Self {
        Self {
            runner,
            parameters: parameters.with_dc(true),
            indexes,
            epsilon,
            batch_size: batch_size.max(1),
        }
    }

    /// XNEC × node PTDF matrix.
    pub fn ptdf(&self, network: &Network) -> FlowDecompositionResult<SparseMatrixTriplet> {
        self.run(
            network,
            self.indexes.node_index(),
            SensitivityVariableType::InjectionActivePower,
        )
    }

    /// XNEC × PST PSDF matrix.
    pub fn psdf(&self, network: &Network) -> FlowDecompositionResult<SparseMatrixTriplet> {
        self.run(
            network,
            self.indexes.pst_index(),
            SensitivityVariableType::TransformerPhase,
        )
    }

    /// Fills a matrix over `variable_index`, one engine call per batch of variables.
    pub fn run(
        &self,
        network: &Network,
        variable_index: &Arc<SparseIndex>,
        variable_type: SensitivityVariableType,
    ) -> FlowDecompositionResult<SparseMatrixTriplet> {
        debug!(epsilon = self.epsilon, "filtering sensitivity values");
        let mut matrix = SparseMatrixTriplet::new(
            Arc::clone(self.indexes.xnec_index()),
            Arc::clone(variable_index),
            self.epsilon,
        );
        for batch in variable_index.labels().chunks(self.batch_size) {
            let factors = factors(self.indexes.xnecs(), batch, variable_type, false);
            let values = self.runner.run(network, &factors, &[], &self.parameters)?;
            for value in values {
                let factor = factor_at(&factors, value.factor_index)?;
                matrix.add_item(
                    factor.function_id.as_str(),
                    &factor.variable_id,
                    oriented(value),
                )?;
            }
        }
        Ok(matrix)
    }
}

/// Branch × zone PTDF computed on GLSK variable sets.
pub struct ZonalSensitivityAnalyser<'a> {
    runner: &'a dyn SensitivityAnalysisRunner,
    parameters: LoadFlowParameters,
}

impl<'a> ZonalSensitivityAnalyser<'a> {
    pub fn new(runner: &'a dyn SensitivityAnalysisRunner, parameters: &LoadFlowParameters) -> Self {
        Self {
            runner,
            parameters: parameters.with_dc(true),
        }
    }

    /// Zonal PTDF of every branch in `functions`, one variable set per zone.
    pub fn run(
        &self,
        network: &Network,
        functions: &[BranchId],
        glsks: &ZonalGlsks,
    ) -> FlowDecompositionResult<BTreeMap<BranchId, BTreeMap<ZoneId, f64>>> {
        let variable_sets: Vec<SensitivityVariableSet> = glsks
            .iter()
            .map(|(zone, weights)| SensitivityVariableSet {
                id: zone.to_string(),
                variables: weights
                    .iter()
                    .map(|(id, weight)| WeightedSensitivityVariable {
                        id: id.clone(),
                        weight: *weight,
                    })
                    .collect(),
            })
            .collect();
        let zones: Vec<String> = glsks.keys().map(ZoneId::to_string).collect();
        let factors = factors(
            functions,
            &zones,
            SensitivityVariableType::InjectionActivePower,
            true,
        );

        let mut zonal_ptdf: BTreeMap<BranchId, BTreeMap<ZoneId, f64>> = BTreeMap::new();
        for value in self
            .runner
            .run(network, &factors, &variable_sets, &self.parameters)?
        {
            let factor = factor_at(&factors, value.factor_index)?;
            zonal_ptdf
                .entry(factor.function_id.clone())
                .or_default()
                .insert(ZoneId::new(factor.variable_id.as_str()), value.value);
        }
        Ok(zonal_ptdf)
    }
}

/// Factors ordered variable by variable, then function by function.
fn factors(
    functions: &[BranchId],
    variables: &[String],
    variable_type: SensitivityVariableType,
    variable_set: bool,
) -> Vec<SensitivityFactor> {
    variables
        .iter()
        .flat_map(|variable| {
            functions.iter().map(move |function| SensitivityFactor {
                function_id: function.clone(),
                variable_type,
                variable_id: variable.clone(),
                variable_set,
            })
        })
        .collect()
}

fn factor_at(factors: &[SensitivityFactor], index: usize) -> FlowDecompositionResult<&SensitivityFactor> {
    factors.get(index).ok_or_else(|| {
        FlowDecompositionError::Sensitivity(format!(
            "factor index {index} out of range ({} factors)",
            factors.len()
        ))
    })
}

fn oriented(value: SensitivityValue) -> f64 {
    if value.function_reference < 0.0 {
        -value.value
    } else {
        value.value
    }
}
