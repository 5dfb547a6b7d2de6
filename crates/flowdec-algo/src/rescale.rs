//! Rescaling of decomposed flows onto the AC reference flow.
//!
//! The linear decomposition explains the DC flow. Rescaling distributes the
//! AC/DC gap over the flow parts:
//!
//! | Mode              | Rule                                                          |
//! |-------------------|---------------------------------------------------------------|
//! | `None`            | unchanged                                                     |
//! | `AcerMethodology` | `part += (|AC| - explained) × relu(part) / Σ relu(explained)` |
//! | `Proportional`    | `part *= |AC / DC|`, residual included                        |
//!
//! The ACER parts are allocated, PST, x-node, every loop flow and internal.
//! The residual takes no share and keeps its value, so after rescaling the
//! explained parts sum to `|AC|`.
//!
//! A record whose AC reference is NaN (DC fallback) is never rescaled.

use crate::decomposed_flow::DecomposedFlow;
use serde::{Deserialize, Serialize};

/// DC flows under this magnitude (MW) are not rescaled proportionally.
pub const MIN_FLOW_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescaleMode {
    #[default]
    None,
    AcerMethodology,
    Proportional,
}

impl RescaleMode {
    pub fn rescale(&self, flow: &DecomposedFlow) -> DecomposedFlow {
        match self {
            RescaleMode::None => flow.clone(),
            RescaleMode::AcerMethodology => rescale_acer(flow),
            RescaleMode::Proportional => rescale_proportional(flow),
        }
    }
}

fn relu(value: f64) -> f64 {
    if value > 0.0 {
        value
    } else {
        0.0
    }
}

fn rescale_acer(flow: &DecomposedFlow) -> DecomposedFlow {
    if flow.ac_reference_flow.is_nan() {
        return flow.clone();
    }
    let delta = flow.ac_reference_flow.abs() - flow.explained_flow();
    let sum_of_relu = relu(flow.allocated_flow)
        + relu(flow.pst_flow)
        + relu(flow.xnode_flow)
        + flow.loop_flows.values().copied().map(relu).sum::<f64>()
        + relu(flow.internal_flow);
    if sum_of_relu == 0.0 {
        return flow.clone();
    }
    flow.map_parts(|part| part + delta * relu(part) / sum_of_relu)
}

fn rescale_proportional(flow: &DecomposedFlow) -> DecomposedFlow {
    if flow.ac_reference_flow.is_nan() || flow.dc_reference_flow.abs() < MIN_FLOW_TOLERANCE {
        return flow.clone();
    }
    let factor = (flow.ac_reference_flow / flow.dc_reference_flow).abs();
    let mut rescaled = flow.map_parts(|part| part * factor);
    rescaled.residual_flow = flow.residual_flow * factor;
    rescaled
}
