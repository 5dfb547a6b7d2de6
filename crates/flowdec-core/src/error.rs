//! Unified error type for flow decomposition
//!
//! Every fatal condition of a decomposition round maps onto one variant of
//! [`FlowDecompositionError`]. Degraded-but-valid outcomes (DC fallback,
//! uniform GLSK weights, filtered matrix entries) are not errors and never
//! surface here.
//!
//! # Example
//!
//! ```ignore
//! use flowdec_core::{FlowDecompositionError, FlowDecompositionResult};
//!
//! fn decompose(network: &mut Network) -> FlowDecompositionResult<()> {
//!     compensator.run(network)?;
//!     service.run_dc(network, &parameters)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all flow decomposition operations.
#[derive(Error, Debug)]
pub enum FlowDecompositionError {
    /// I/O errors (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bus topology that loss compensation cannot handle
    #[error("Unsupported topology: {0}")]
    UnsupportedTopology(String),

    /// A converged load flow left an indexed node without active power
    #[error("Reference nodal injection cannot be NaN for node {0}")]
    NanReferenceInjection(String),

    /// AC load flow diverged and the DC fallback is disabled
    #[error("AC load flow divergence without fallback procedure enabled")]
    AcDivergence,

    /// DC load flow diverged (no further fallback exists)
    #[error("DC load flow divergence")]
    DcDivergence,

    /// Matrices built over different index instances were combined
    #[error("Index mismatch: {0}")]
    IndexMismatch(String),

    /// Identifier not present in the network or in an index
    #[error("Unknown element: {0}")]
    UnknownElement(String),

    /// Zone referenced by a computation but absent from its input maps
    #[error("Missing zone: {0}")]
    MissingZone(String),

    /// Network element added twice with the same identifier
    #[error("Duplicate element: {0}")]
    DuplicateElement(String),

    /// Sensitivity engine returned unusable output
    #[error("Sensitivity analysis error: {0}")]
    Sensitivity(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using FlowDecompositionError.
pub type FlowDecompositionResult<T> = Result<T, FlowDecompositionError>;

impl From<anyhow::Error> for FlowDecompositionError {
    fn from(err: anyhow::Error) -> Self {
        FlowDecompositionError::Other(err.to_string())
    }
}

impl From<String> for FlowDecompositionError {
    fn from(s: String) -> Self {
        FlowDecompositionError::Other(s)
    }
}

impl From<&str> for FlowDecompositionError {
    fn from(s: &str) -> Self {
        FlowDecompositionError::Other(s.to_string())
    }
}
