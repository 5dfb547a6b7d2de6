//! Shared test network and collaborators.
//!
//! Three buses, two zones, slack at B:
//! ```text
//!        F1 (G1 +100) ─── F2 (L2 -50)       zone FR
//!          \              /
//!           \            /
//!            B (LB -50)                     zone BE
//! ```
//! Equal reactances give, for injections withdrawn at B:
//!
//! | Branch | G1  | L2   |
//! |--------|-----|------|
//! | F1_F2  | 1/3 | -1/3 |
//! | F1_B   | 2/3 | 1/3  |
//! | F2_B   | 1/3 | 2/3  |
//!
//! and the DC flows F1_F2 = 50, F1_B = 50, F2_B = 0.

#![allow(dead_code)]

use flowdec_algo::test_utils::{FixedFlowLoadFlowRunner, TableSensitivityRunner};
use flowdec_core::{Branch, Bus, Injection, Network, Terminal, VoltageLevel};

pub const TOL: f64 = 1e-9;

pub fn triangle_network() -> Network {
    let mut network = Network::new("triangle");
    network
        .add_voltage_level(VoltageLevel::bus_breaker("VL_FR", "FR"))
        .unwrap();
    network
        .add_voltage_level(VoltageLevel::bus_breaker("VL_BE", "BE"))
        .unwrap();
    network.add_bus(Bus::new("F1", "VL_FR")).unwrap();
    network.add_bus(Bus::new("F2", "VL_FR")).unwrap();
    network.add_bus(Bus::new("B", "VL_BE")).unwrap();

    for (id, a, b) in [("F1_F2", "F1", "F2"), ("F1_B", "F1", "B"), ("F2_B", "F2", "B")] {
        network
            .add_branch(Branch::line(id, 0.5, Terminal::new(a), Terminal::new(b)))
            .unwrap();
    }

    network
        .add_injection(Injection::generator("G1", 100.0, Terminal::new("F1")))
        .unwrap();
    network
        .add_injection(Injection::load("L2", 50.0, Terminal::new("F2")))
        .unwrap();
    network
        .add_injection(Injection::load("LB", 50.0, Terminal::new("B")))
        .unwrap();
    network
}

/// Lossless flows, identical in AC and DC.
pub fn triangle_load_flow() -> FixedFlowLoadFlowRunner {
    FixedFlowLoadFlowRunner::new()
        .with_flow("F1_F2", 50.0, -50.0)
        .with_flow("F1_B", 50.0, -50.0)
        .with_flow("F2_B", 0.0, 0.0)
}

pub fn triangle_sensitivities() -> TableSensitivityRunner {
    TableSensitivityRunner::new()
        .with_sensitivity("F1_F2", "G1", 1.0 / 3.0)
        .with_sensitivity("F1_F2", "L2", -1.0 / 3.0)
        .with_sensitivity("F1_B", "G1", 2.0 / 3.0)
        .with_sensitivity("F1_B", "L2", 1.0 / 3.0)
        .with_sensitivity("F2_B", "G1", 1.0 / 3.0)
        .with_sensitivity("F2_B", "L2", 2.0 / 3.0)
}
