//! Nodal injections feeding the flow partitioning.
//!
//! The reference injection of a node is the opposite of its terminal P after
//! the DC load flow (terminal P follows the load sign convention). It is then
//! split into two parts:
//! ```text
//! allocated(node) = GLSK[zone][node] × netPosition[zone]
//! loop(node)      = reference(node) - allocated(node)
//! ```
//! The loop part lands in the `Loop Flow from <zone>` column of the node's
//! zone, the allocated part in the `Allocated Flow` column. For an x-node
//! (unpaired dangling line) the loop part goes to the `Xnode Flow` column
//! instead, so boundary exchanges never count as a zone's loop flow.

use crate::decomposed_flow::{loop_flow_column, ALLOCATED_COLUMN_NAME, XNODE_COLUMN_NAME};
use crate::glsk::ZonalGlsks;
use crate::indexes::NetworkMatrixIndexes;
use crate::net_position::NetPositions;
use crate::sparse::{SparseIndex, SparseMatrixTriplet};
use flowdec_core::{FlowDecompositionError, FlowDecompositionResult, InjectionId, Network};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Node → reference injection (MW).
pub type NodalInjections = BTreeMap<InjectionId, f64>;

/// Reads the reference injection of every indexed node.
pub struct ReferenceNodalInjectionComputer<'a> {
    indexes: &'a NetworkMatrixIndexes,
}

impl<'a> ReferenceNodalInjectionComputer<'a> {
    pub fn new(indexes: &'a NetworkMatrixIndexes) -> Self {
        Self { indexes }
    }

    /// Fails on the first indexed node whose terminal carries no active power.
    pub fn run(&self, network: &Network) -> FlowDecompositionResult<NodalInjections> {
        let mut injections = NodalInjections::new();
        for id in self.indexes.nodes() {
            let injection = network
                .injection(id)
                .ok_or_else(|| FlowDecompositionError::UnknownElement(id.to_string()))?;
            let p = injection.terminal.p;
            if p.is_nan() {
                return Err(FlowDecompositionError::NanReferenceInjection(
                    id.to_string(),
                ));
            }
            injections.insert(id.clone(), -p);
        }
        Ok(injections)
    }
}

/// Builds the node × (allocated, x-node, loop per zone) injection matrix.
pub struct NodalInjectionComputer<'a> {
    indexes: &'a NetworkMatrixIndexes,
}

impl<'a> NodalInjectionComputer<'a> {
    pub fn new(indexes: &'a NetworkMatrixIndexes) -> Self {
        Self { indexes }
    }

    pub fn run(
        &self,
        network: &Network,
        glsks: &ZonalGlsks,
        net_positions: &NetPositions,
        reference_injections: &NodalInjections,
    ) -> FlowDecompositionResult<SparseMatrixTriplet> {
        let columns = SparseIndex::new(
            glsks
                .keys()
                .map(loop_flow_column)
                .chain([
                    ALLOCATED_COLUMN_NAME.to_string(),
                    XNODE_COLUMN_NAME.to_string(),
                ]),
        )?;
        let mut matrix =
            SparseMatrixTriplet::unfiltered(Arc::clone(self.indexes.node_index()), columns);

        for id in self.indexes.nodes() {
            let injection = network
                .injection(id)
                .ok_or_else(|| FlowDecompositionError::UnknownElement(id.to_string()))?;
            let zone = network.terminal_zone(&injection.terminal)?;
            let weights = glsks
                .get(zone)
                .ok_or_else(|| FlowDecompositionError::MissingZone(zone.to_string()))?;
            let net_position = net_positions
                .get(zone)
                .ok_or_else(|| FlowDecompositionError::MissingZone(zone.to_string()))?;
            let reference = reference_injections
                .get(id)
                .copied()
                .ok_or_else(|| FlowDecompositionError::UnknownElement(id.to_string()))?;

            let allocated = weights.get(id).copied().unwrap_or(0.0) * net_position;
            matrix.add_item(id.as_str(), ALLOCATED_COLUMN_NAME, allocated)?;
            if self.indexes.is_xnode(id) {
                matrix.add_item(id.as_str(), XNODE_COLUMN_NAME, reference - allocated)?;
            } else {
                matrix.add_item(id.as_str(), &loop_flow_column(zone), reference - allocated)?;
            }
        }
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdec_core::{Bus, Injection, Terminal, VoltageLevel, ZoneId};

    fn network() -> Network {
        let mut network = Network::new("inj");
        network
            .add_voltage_level(VoltageLevel::bus_breaker("VL_FR", "FR"))
            .unwrap();
        network
            .add_voltage_level(VoltageLevel::bus_breaker("VL_BE", "BE"))
            .unwrap();
        network.add_bus(Bus::new("F", "VL_FR")).unwrap();
        network.add_bus(Bus::new("B", "VL_BE")).unwrap();
        network
            .add_branch(flowdec_core::Branch::line(
                "F_B",
                1.0,
                Terminal::new("F").with_p(100.0),
                Terminal::new("B").with_p(-100.0),
            ))
            .unwrap();
        network
            .add_injection(Injection::generator(
                "GEN_FR",
                150.0,
                Terminal::new("F").with_p(-150.0),
            ))
            .unwrap();
        network
            .add_injection(Injection::load("LOAD_FR", 50.0, Terminal::new("F").with_p(50.0)))
            .unwrap();
        network
            .add_injection(Injection::load("LOAD_BE", 100.0, Terminal::new("B").with_p(100.0)))
            .unwrap();
        network
    }

    fn glsks() -> ZonalGlsks {
        ZonalGlsks::from([
            (
                ZoneId::new("FR"),
                BTreeMap::from([(InjectionId::new("GEN_FR"), 1.0)]),
            ),
            (ZoneId::new("BE"), BTreeMap::new()),
        ])
    }

    #[test]
    fn test_reference_injection_flips_terminal_sign() {
        let network = network();
        let indexes = NetworkMatrixIndexes::new(&network, &[]).unwrap();
        let injections = ReferenceNodalInjectionComputer::new(&indexes)
            .run(&network)
            .unwrap();
        assert_eq!(injections[&InjectionId::new("GEN_FR")], 150.0);
        assert_eq!(injections[&InjectionId::new("LOAD_BE")], -100.0);
    }

    #[test]
    fn test_nan_reference_injection_names_the_node() {
        let mut network = network();
        network
            .injection_mut(&InjectionId::new("LOAD_FR"))
            .unwrap()
            .terminal
            .p = f64::NAN;
        let indexes = NetworkMatrixIndexes::new(&network, &[]).unwrap();
        let err = ReferenceNodalInjectionComputer::new(&indexes)
            .run(&network)
            .unwrap_err();
        match err {
            FlowDecompositionError::NanReferenceInjection(node) => assert_eq!(node, "LOAD_FR"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_allocated_and_loop_parts_sum_to_reference() {
        let network = network();
        let indexes = NetworkMatrixIndexes::new(&network, &[]).unwrap();
        let reference = ReferenceNodalInjectionComputer::new(&indexes)
            .run(&network)
            .unwrap();
        let net_positions =
            NetPositions::from([(ZoneId::new("FR"), 100.0), (ZoneId::new("BE"), -100.0)]);
        let matrix = NodalInjectionComputer::new(&indexes)
            .run(&network, &glsks(), &net_positions, &reference)
            .unwrap()
            .to_csc();

        assert_eq!(matrix.get("GEN_FR", ALLOCATED_COLUMN_NAME), Some(100.0));
        assert_eq!(matrix.get("GEN_FR", "Loop Flow from FR"), Some(50.0));
        assert_eq!(matrix.get("LOAD_FR", ALLOCATED_COLUMN_NAME), Some(0.0));
        assert_eq!(matrix.get("LOAD_FR", "Loop Flow from FR"), Some(-50.0));
        assert_eq!(matrix.get("LOAD_BE", "Loop Flow from BE"), Some(-100.0));
        assert_eq!(matrix.get("LOAD_BE", "Loop Flow from FR"), Some(0.0));
    }

    #[test]
    fn test_xnode_injection_goes_to_xnode_column() {
        let mut network = network();
        network
            .add_injection(Injection::dangling_line(
                "X_BE",
                -20.0,
                Terminal::new("B").with_p(-20.0),
            ))
            .unwrap();
        let indexes = NetworkMatrixIndexes::new(&network, &[]).unwrap();
        let reference = ReferenceNodalInjectionComputer::new(&indexes)
            .run(&network)
            .unwrap();
        let net_positions =
            NetPositions::from([(ZoneId::new("FR"), 100.0), (ZoneId::new("BE"), -100.0)]);
        let matrix = NodalInjectionComputer::new(&indexes)
            .run(&network, &glsks(), &net_positions, &reference)
            .unwrap()
            .to_csc();

        assert_eq!(matrix.get("X_BE", XNODE_COLUMN_NAME), Some(20.0));
        assert_eq!(matrix.get("X_BE", ALLOCATED_COLUMN_NAME), Some(0.0));
        assert_eq!(matrix.get("X_BE", "Loop Flow from BE"), Some(0.0));
        assert_eq!(matrix.get("LOAD_BE", "Loop Flow from BE"), Some(-100.0));
        assert_eq!(matrix.get("LOAD_BE", XNODE_COLUMN_NAME), Some(0.0));
    }

    #[test]
    fn test_zone_without_glsk_is_reported() {
        let network = network();
        let indexes = NetworkMatrixIndexes::new(&network, &[]).unwrap();
        let reference = ReferenceNodalInjectionComputer::new(&indexes)
            .run(&network)
            .unwrap();
        let mut glsks = glsks();
        glsks.remove(&ZoneId::new("BE"));
        let net_positions =
            NetPositions::from([(ZoneId::new("FR"), 100.0), (ZoneId::new("BE"), -100.0)]);
        let err = NodalInjectionComputer::new(&indexes)
            .run(&network, &glsks, &net_positions, &reference)
            .unwrap_err();
        assert!(matches!(err, FlowDecompositionError::MissingZone(zone) if zone == "BE"));
    }
}
