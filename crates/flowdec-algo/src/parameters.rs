//! Flow decomposition configuration.
//!
//! Parameters are plain serde structs and can be read from TOML. Every field
//! has a default, so partial files are accepted:
//!
//! ```toml
//! enable_losses_compensation = true
//! rescale_mode = "acer_methodology"
//!
//! [load_flow]
//! max_iterations = 50
//! ```
//!
//! Monitoring listed branches, in base case and after a contingency:
//!
//! ```toml
//! xnec_selection_strategy = { union = ["only_interconnections", "by_ids"] }
//! xnec_ids = ["FR_DE_1"]
//!
//! [[contingencies]]
//! id = "N-1 FR_BE_1"
//! branches = ["FR_BE_1"]
//! xnecs = ["FR_DE_1", "FR_BE_2"]
//! ```

use crate::load_flow::LoadFlowParameters;
use crate::losses::DEFAULT_LOSSES_COMPENSATION_EPSILON;
use crate::rescale::RescaleMode;
use crate::sensitivity::SENSITIVITY_VARIABLE_BATCH_SIZE;
use flowdec_core::{BranchId, FlowDecompositionError, FlowDecompositionResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Default sensitivity filtering threshold.
pub const DEFAULT_SENSITIVITY_EPSILON: f64 = 1e-5;

/// How monitored branches are chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XnecSelectionStrategy {
    /// Cross-zone branches only
    OnlyInterconnections,
    /// Cross-zone branches and branches with a significant zone-to-zone PTDF spread
    #[default]
    ZoneToZonePtdfCriteria,
    /// `xnec_ids` in base case, `contingencies` afterwards
    ByIds,
    /// Every connected branch of the main component
    AllBranches,
    /// Everything chosen by at least one of the listed strategies
    Union(Vec<XnecSelectionStrategy>),
}

/// A contingency and the branches monitored once it has happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContingencyParameters {
    pub id: String,
    /// Branches put out of service
    pub branches: Vec<BranchId>,
    /// Branches monitored after the outage
    #[serde(default)]
    pub xnecs: Vec<BranchId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowDecompositionParameters {
    /// Turn branch losses into loads before the DC load flow
    pub enable_losses_compensation: bool,

    /// Loss updates at or below this magnitude are skipped (negative disables)
    pub losses_compensation_epsilon: f64,

    /// Sensitivities at or below this magnitude are dropped (negative disables)
    pub sensitivity_epsilon: f64,

    pub rescale_mode: RescaleMode,

    /// Run a DC load flow when the AC load flow diverges
    pub dc_fallback_enabled_after_ac_divergence: bool,

    pub xnec_selection_strategy: XnecSelectionStrategy,

    /// Base case XNECs of the `by_ids` strategy
    pub xnec_ids: Vec<BranchId>,

    /// Contingencies of the `by_ids` strategy
    pub contingencies: Vec<ContingencyParameters>,

    /// Variables per sensitivity engine call
    pub sensitivity_variable_batch_size: usize,

    /// Passed to the load flow and sensitivity engines
    pub load_flow: LoadFlowParameters,
}

impl Default for FlowDecompositionParameters {
    fn default() -> Self {
        Self {
            enable_losses_compensation: false,
            losses_compensation_epsilon: DEFAULT_LOSSES_COMPENSATION_EPSILON,
            sensitivity_epsilon: DEFAULT_SENSITIVITY_EPSILON,
            rescale_mode: RescaleMode::None,
            dc_fallback_enabled_after_ac_divergence: true,
            xnec_selection_strategy: XnecSelectionStrategy::ZoneToZonePtdfCriteria,
            xnec_ids: Vec::new(),
            contingencies: Vec::new(),
            sensitivity_variable_batch_size: SENSITIVITY_VARIABLE_BATCH_SIZE,
            load_flow: LoadFlowParameters::default(),
        }
    }
}

impl FlowDecompositionParameters {
    pub fn from_toml_str(contents: &str) -> FlowDecompositionResult<Self> {
        let parameters: Self = toml::from_str(contents)
            .map_err(|e| FlowDecompositionError::Config(e.to_string()))?;
        parameters.validate()?;
        Ok(parameters)
    }

    /// Load parameters from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> FlowDecompositionResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Save parameters to a TOML file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> FlowDecompositionResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| FlowDecompositionError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> FlowDecompositionResult<()> {
        if self.sensitivity_variable_batch_size == 0 {
            return Err(FlowDecompositionError::Config(
                "sensitivity_variable_batch_size must be positive".to_string(),
            ));
        }
        if self.losses_compensation_epsilon.is_nan() || self.sensitivity_epsilon.is_nan() {
            return Err(FlowDecompositionError::Config(
                "epsilons must be numbers".to_string(),
            ));
        }
        let mut contingency_ids = BTreeSet::new();
        for contingency in &self.contingencies {
            if !contingency_ids.insert(contingency.id.as_str()) {
                return Err(FlowDecompositionError::Config(format!(
                    "contingency {} is defined twice",
                    contingency.id
                )));
            }
            if contingency.branches.is_empty() {
                return Err(FlowDecompositionError::Config(format!(
                    "contingency {} outages no branch",
                    contingency.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_parameters() {
        let parameters = FlowDecompositionParameters::default();
        assert!(!parameters.enable_losses_compensation);
        assert_eq!(parameters.losses_compensation_epsilon, 1e-5);
        assert_eq!(parameters.sensitivity_epsilon, 1e-5);
        assert_eq!(parameters.rescale_mode, RescaleMode::None);
        assert!(parameters.dc_fallback_enabled_after_ac_divergence);
        assert_eq!(
            parameters.xnec_selection_strategy,
            XnecSelectionStrategy::ZoneToZonePtdfCriteria
        );
        assert_eq!(parameters.sensitivity_variable_batch_size, 15_000);
        assert!(parameters.xnec_ids.is_empty());
        assert!(parameters.contingencies.is_empty());
    }

    #[test]
    fn test_union_strategy_with_contingencies_parsing() {
        let toml = r#"
            xnec_selection_strategy = { union = ["all_branches", "by_ids"] }
            xnec_ids = ["FR_BE"]

            [[contingencies]]
            id = "CO_FR_DE"
            branches = ["FR_DE"]
            xnecs = ["FR_BE", "BE_DE"]
        "#;
        let parameters = FlowDecompositionParameters::from_toml_str(toml).unwrap();
        assert_eq!(
            parameters.xnec_selection_strategy,
            XnecSelectionStrategy::Union(vec![
                XnecSelectionStrategy::AllBranches,
                XnecSelectionStrategy::ByIds,
            ])
        );
        assert_eq!(parameters.xnec_ids, vec![BranchId::new("FR_BE")]);
        let contingency = &parameters.contingencies[0];
        assert_eq!(contingency.id, "CO_FR_DE");
        assert_eq!(contingency.branches, vec![BranchId::new("FR_DE")]);
        assert_eq!(contingency.xnecs.len(), 2);
    }

    #[test]
    fn test_duplicate_contingency_is_config_error() {
        let toml = r#"
            [[contingencies]]
            id = "CO"
            branches = ["A"]

            [[contingencies]]
            id = "CO"
            branches = ["B"]
        "#;
        let err = FlowDecompositionParameters::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, FlowDecompositionError::Config(_)));
    }

    #[test]
    fn test_partial_config_parsing() {
        let toml = r#"
            enable_losses_compensation = true
            rescale_mode = "proportional"
            xnec_selection_strategy = "only_interconnections"

            [load_flow]
            max_iterations = 50
        "#;
        let parameters = FlowDecompositionParameters::from_toml_str(toml).unwrap();
        assert!(parameters.enable_losses_compensation);
        assert_eq!(parameters.rescale_mode, RescaleMode::Proportional);
        assert_eq!(
            parameters.xnec_selection_strategy,
            XnecSelectionStrategy::OnlyInterconnections
        );
        assert_eq!(parameters.load_flow.max_iterations, 50);
        assert_eq!(parameters.load_flow.tolerance, 1e-6);
        assert_eq!(parameters.sensitivity_epsilon, 1e-5);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = FlowDecompositionParameters::from_toml_str("rescale_mode = \"sideways\"")
            .unwrap_err();
        assert!(matches!(err, FlowDecompositionError::Config(_)));

        let err = FlowDecompositionParameters::from_toml_str("sensitivity_variable_batch_size = 0")
            .unwrap_err();
        assert!(matches!(err, FlowDecompositionError::Config(_)));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let parameters = FlowDecompositionParameters {
            enable_losses_compensation: true,
            rescale_mode: RescaleMode::AcerMethodology,
            xnec_selection_strategy: XnecSelectionStrategy::Union(vec![
                XnecSelectionStrategy::OnlyInterconnections,
                XnecSelectionStrategy::ByIds,
            ]),
            xnec_ids: vec![BranchId::new("FR_BE")],
            contingencies: vec![ContingencyParameters {
                id: "CO".to_string(),
                branches: vec![BranchId::new("FR_DE")],
                xnecs: vec![BranchId::new("FR_BE")],
            }],
            ..Default::default()
        };
        parameters.save_to(file.path()).unwrap();
        let loaded = FlowDecompositionParameters::load(file.path()).unwrap();
        assert_eq!(loaded, parameters);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = FlowDecompositionParameters::load("/nonexistent/flowdec.toml").unwrap_err();
        assert!(matches!(err, FlowDecompositionError::Io(_)));
    }
}
