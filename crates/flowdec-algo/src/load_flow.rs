//! Load flow orchestration with DC fallback.
//!
//! The solver itself is an external collaborator behind [`LoadFlowRunner`].
//! [`LoadFlowRunningService`] forces the AC or DC mode on a copy of the caller
//! parameters and turns non-convergence into the matching error:
//!
//! | Call      | Diverged, fallback on     | Diverged, fallback off |
//! |-----------|---------------------------|------------------------|
//! | `run_ac`  | DC solve, flag set        | `AcDivergence`         |
//! | `run_dc`  | n/a                       | `DcDivergence`         |

use flowdec_core::{FlowDecompositionError, FlowDecompositionResult, Network};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Parameters handed to the load flow solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadFlowParameters {
    /// DC approximation instead of full AC
    pub dc: bool,
    /// Maximum solver iterations (AC only)
    pub max_iterations: usize,
    /// Convergence tolerance (AC only)
    pub tolerance: f64,
}

impl Default for LoadFlowParameters {
    fn default() -> Self {
        Self {
            dc: false,
            max_iterations: 30,
            tolerance: 1e-6,
        }
    }
}

impl LoadFlowParameters {
    /// Copy with the DC flag forced.
    pub fn with_dc(&self, dc: bool) -> Self {
        Self {
            dc,
            ..self.clone()
        }
    }
}

/// Solver verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationStatus {
    Converged,
    MaxIterationReached,
    Failed,
}

/// Raw outcome of one solver run.
#[derive(Debug, Clone)]
pub struct LoadFlowResult {
    pub status: ComputationStatus,
    pub iterations: usize,
}

impl LoadFlowResult {
    pub fn converged(iterations: usize) -> Self {
        Self {
            status: ComputationStatus::Converged,
            iterations,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: ComputationStatus::Failed,
            iterations: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ComputationStatus::Converged
    }
}

/// External load flow solver.
///
/// A converged run writes the active power of every connected terminal of
/// the network (injections and both branch sides).
pub trait LoadFlowRunner: Send + Sync {
    /// Unique identifier (e.g., "open-loadflow", "mock")
    fn id(&self) -> &str;

    fn run(&self, network: &mut Network, parameters: &LoadFlowParameters) -> LoadFlowResult;
}

/// Outcome of an orchestrated load flow.
#[derive(Debug, Clone)]
pub struct LoadFlowRunResult {
    pub result: LoadFlowResult,
    ac_attempted: bool,
    fallback_has_been_activated: bool,
}

impl LoadFlowRunResult {
    /// True when an AC load flow was run first, whatever its outcome.
    pub fn ac_attempted(&self) -> bool {
        self.ac_attempted
    }

    /// True when the AC load flow diverged and the result comes from DC.
    pub fn fallback_has_been_activated(&self) -> bool {
        self.fallback_has_been_activated
    }
}

/// Runs AC or DC load flows with the fallback policy.
#[derive(Clone)]
pub struct LoadFlowRunningService {
    runner: Arc<dyn LoadFlowRunner>,
}

impl LoadFlowRunningService {
    pub fn new(runner: Arc<dyn LoadFlowRunner>) -> Self {
        Self { runner }
    }

    pub fn run_ac(
        &self,
        network: &mut Network,
        parameters: &LoadFlowParameters,
        dc_fallback_enabled: bool,
    ) -> FlowDecompositionResult<LoadFlowRunResult> {
        debug!(runner = self.runner.id(), "running AC load flow");
        let result = self.runner.run(network, &parameters.with_dc(false));
        if result.is_ok() {
            return Ok(LoadFlowRunResult {
                result,
                ac_attempted: true,
                fallback_has_been_activated: false,
            });
        }
        if !dc_fallback_enabled {
            return Err(FlowDecompositionError::AcDivergence);
        }
        warn!("AC load flow divergence, running DC load flow as fallback procedure");
        let mut fallback = self.run_dc(network, parameters)?;
        fallback.ac_attempted = true;
        fallback.fallback_has_been_activated = true;
        Ok(fallback)
    }

    pub fn run_dc(
        &self,
        network: &mut Network,
        parameters: &LoadFlowParameters,
    ) -> FlowDecompositionResult<LoadFlowRunResult> {
        debug!(runner = self.runner.id(), "running DC load flow");
        let result = self.runner.run(network, &parameters.with_dc(true));
        if !result.is_ok() {
            return Err(FlowDecompositionError::DcDivergence);
        }
        Ok(LoadFlowRunResult {
            result,
            ac_attempted: false,
            fallback_has_been_activated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the DC flag of every call and converges only in the listed modes.
    struct ScriptedRunner {
        ac_converges: bool,
        dc_converges: bool,
        calls: Mutex<Vec<bool>>,
    }

    impl ScriptedRunner {
        fn new(ac_converges: bool, dc_converges: bool) -> Arc<Self> {
            Arc::new(Self {
                ac_converges,
                dc_converges,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl LoadFlowRunner for ScriptedRunner {
        fn id(&self) -> &str {
            "scripted"
        }

        fn run(&self, _network: &mut Network, parameters: &LoadFlowParameters) -> LoadFlowResult {
            self.calls.lock().unwrap().push(parameters.dc);
            let ok = if parameters.dc {
                self.dc_converges
            } else {
                self.ac_converges
            };
            if ok {
                LoadFlowResult::converged(3)
            } else {
                LoadFlowResult::failed()
            }
        }
    }

    #[test]
    fn test_ac_is_forced_even_with_dc_parameters() {
        let runner = ScriptedRunner::new(true, true);
        let service = LoadFlowRunningService::new(runner.clone());
        let mut network = Network::new("n");
        let dc_params = LoadFlowParameters::default().with_dc(true);
        let result = service.run_ac(&mut network, &dc_params, true).unwrap();
        assert!(result.ac_attempted());
        assert!(!result.fallback_has_been_activated());
        assert_eq!(*runner.calls.lock().unwrap(), vec![false]);
    }

    #[test]
    fn test_ac_divergence_with_fallback_runs_dc() {
        let runner = ScriptedRunner::new(false, true);
        let service = LoadFlowRunningService::new(runner.clone());
        let mut network = Network::new("n");
        let result = service
            .run_ac(&mut network, &LoadFlowParameters::default(), true)
            .unwrap();
        assert!(result.ac_attempted());
        assert!(result.fallback_has_been_activated());
        assert!(result.result.is_ok());
        assert_eq!(*runner.calls.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_direct_dc_run_does_not_attempt_ac() {
        let runner = ScriptedRunner::new(false, true);
        let service = LoadFlowRunningService::new(runner.clone());
        let mut network = Network::new("n");
        let result = service
            .run_dc(&mut network, &LoadFlowParameters::default())
            .unwrap();
        assert!(!result.ac_attempted());
        assert!(!result.fallback_has_been_activated());
        assert_eq!(*runner.calls.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_ac_divergence_without_fallback_fails() {
        let service = LoadFlowRunningService::new(ScriptedRunner::new(false, true));
        let mut network = Network::new("n");
        let err = service
            .run_ac(&mut network, &LoadFlowParameters::default(), false)
            .unwrap_err();
        assert!(matches!(err, FlowDecompositionError::AcDivergence));
    }

    #[test]
    fn test_fallback_dc_divergence_fails() {
        let service = LoadFlowRunningService::new(ScriptedRunner::new(false, false));
        let mut network = Network::new("n");
        let err = service
            .run_ac(&mut network, &LoadFlowParameters::default(), true)
            .unwrap_err();
        assert!(matches!(err, FlowDecompositionError::DcDivergence));
    }

    #[test]
    fn test_parameters_are_not_mutated() {
        let params = LoadFlowParameters::default();
        let dc = params.with_dc(true);
        assert!(!params.dc);
        assert!(dc.dc);
        assert_eq!(dc.max_iterations, params.max_iterations);
    }
}
