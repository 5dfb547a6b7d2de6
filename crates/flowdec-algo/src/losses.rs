//! Loss compensation.
//!
//! Branch losses are moved onto explicit loads so that a lossless DC load
//! flow reproduces the AC injections:
//! ```text
//! losses = P1 + P2
//! ```
//! Every bus touched by a branch gets one load `LOSSES <bus>` (created at
//! zero once, reused afterwards). The losses of a branch go to the load of its
//! sending side (the side with `P > 0`, side 2 otherwise). Tie line losses are
//! split between both sides in proportion to each half's resistance.

use flowdec_core::{
    BranchKind, BusId, FlowDecompositionError, FlowDecompositionResult, Injection, InjectionId,
    InjectionKind, Network, Terminal, TopologyKind,
};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Default threshold under which a loss update is skipped (MW).
pub const DEFAULT_LOSSES_COMPENSATION_EPSILON: f64 = 1e-5;

/// Identifier of the loss load attached to `bus`.
pub fn losses_load_id(bus: &BusId) -> InjectionId {
    InjectionId::new(format!("LOSSES {bus}"))
}

#[derive(Debug, Clone, Copy)]
pub struct LossesCompensator {
    epsilon: f64,
}

impl Default for LossesCompensator {
    fn default() -> Self {
        Self::new(DEFAULT_LOSSES_COMPENSATION_EPSILON)
    }
}

impl LossesCompensator {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// Adds loss loads and charges the solved branch losses onto them.
    ///
    /// Must complete before the DC load flow of the same round.
    pub fn run(&self, network: &mut Network) -> FlowDecompositionResult<()> {
        let mut buses = Vec::new();
        let mut seen = HashSet::new();
        for branch in network.branches() {
            for terminal in [&branch.terminal1, &branch.terminal2] {
                if seen.insert(terminal.connectable_bus.clone()) {
                    buses.push(terminal.connectable_bus.clone());
                }
            }
        }
        for bus in &buses {
            add_null_load(network, bus)?;
        }

        let updates = self.collect_updates(network);
        debug!(
            loads = buses.len(),
            updates = updates.len(),
            "compensating branch losses"
        );
        for (bus, losses) in updates {
            let id = losses_load_id(&bus);
            let load = network
                .injection_mut(&id)
                .ok_or_else(|| FlowDecompositionError::UnknownElement(id.to_string()))?;
            if let InjectionKind::Load { p0, .. } = &mut load.kind {
                *p0 += losses;
                trace!(load = %id, losses, p0 = *p0, "loss load updated");
            }
        }
        Ok(())
    }

    fn collect_updates(&self, network: &Network) -> Vec<(BusId, f64)> {
        let mut updates = Vec::new();
        for branch in network.branches() {
            let (Some(bus1), Some(bus2)) = (branch.terminal1.bus(), branch.terminal2.bus()) else {
                continue;
            };
            if !branch.terminal1.has_p() || !branch.terminal2.has_p() {
                continue;
            }
            let losses = branch.terminal1.p + branch.terminal2.p;
            match &branch.kind {
                BranchKind::TieLine { half1, half2 } => {
                    let r = half1.r + half2.r;
                    let (share1, share2) = if r == 0.0 {
                        (0.5, 0.5)
                    } else {
                        (half1.r / r, half2.r / r)
                    };
                    updates.push((bus1.clone(), losses * share1));
                    updates.push((bus2.clone(), losses * share2));
                }
                _ => {
                    let sending = if branch.terminal1.p > 0.0 { bus1 } else { bus2 };
                    updates.push((sending.clone(), losses));
                }
            }
        }
        updates.retain(|(_, losses)| losses.abs() > self.epsilon);
        updates
    }
}

fn add_null_load(network: &mut Network, bus: &BusId) -> FlowDecompositionResult<()> {
    let id = losses_load_id(bus);
    if network.injection(&id).is_some() {
        return Ok(());
    }
    let (voltage_level, topology, node_count) = {
        let level = network.bus_voltage_level(bus)?;
        (level.id.clone(), level.topology, level.node_count)
    };
    let terminal = match topology {
        TopologyKind::BusBreaker => Terminal::new(bus.as_str()),
        TopologyKind::NodeBreaker => {
            // A bus without nodes borrows the first node of its voltage level.
            let existing = match network.bus(bus)?.nodes.first() {
                Some(&node) => node,
                None if node_count > 0 => {
                    debug!(bus = %bus, voltage_level = %voltage_level, "bus has no node, loss load attached to node 0");
                    0
                }
                None => {
                    return Err(FlowDecompositionError::UnsupportedTopology(format!(
                        "voltage level {voltage_level} has no node to attach the loss load of bus {bus}"
                    )))
                }
            };
            let node = network.allocate_node(&voltage_level)?;
            network.add_internal_connection(&voltage_level, node, existing)?;
            Terminal::at_node(bus.as_str(), node)
        }
    };
    network.add_injection(Injection::new(
        id.as_str(),
        InjectionKind::Load { p0: 0.0, q0: 0.0 },
        terminal,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdec_core::{Branch, Bus, HalfLine, VoltageLevel, VoltageLevelId};

    fn p0(network: &Network, bus: &str) -> f64 {
        match network
            .injection(&losses_load_id(&BusId::new(bus)))
            .map(|load| &load.kind)
        {
            Some(InjectionKind::Load { p0, .. }) => *p0,
            other => panic!("no loss load on {bus}: {other:?}"),
        }
    }

    fn bus_breaker_network(p1: f64, p2: f64) -> Network {
        let mut network = Network::new("losses");
        network
            .add_voltage_level(VoltageLevel::bus_breaker("VL", "FR"))
            .unwrap();
        network.add_bus(Bus::new("A", "VL")).unwrap();
        network.add_bus(Bus::new("B", "VL")).unwrap();
        network
            .add_branch(Branch::line(
                "AB",
                1.0,
                Terminal::new("A").with_p(p1),
                Terminal::new("B").with_p(p2),
            ))
            .unwrap();
        network
    }

    #[test]
    fn test_losses_go_to_sending_terminal() {
        let mut network = bus_breaker_network(100.0, -95.0);
        LossesCompensator::default().run(&mut network).unwrap();
        assert!((p0(&network, "A") - 5.0).abs() < 1e-9);
        assert!(p0(&network, "B").abs() < 1e-9);
    }

    #[test]
    fn test_reverse_flow_sends_from_side_two() {
        let mut network = bus_breaker_network(-95.0, 100.0);
        LossesCompensator::default().run(&mut network).unwrap();
        assert!((p0(&network, "B") - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_second_run_reuses_loads() {
        let mut network = bus_breaker_network(100.0, -95.0);
        let compensator = LossesCompensator::default();
        compensator.run(&mut network).unwrap();
        let count = network.injections().count();
        compensator.run(&mut network).unwrap();
        assert_eq!(network.injections().count(), count);
        assert!((p0(&network, "A") - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_negligible_losses_are_skipped() {
        let mut network = bus_breaker_network(100.0, -100.0 + 1e-7);
        LossesCompensator::default().run(&mut network).unwrap();
        assert_eq!(p0(&network, "A"), 0.0);
    }

    #[test]
    fn test_unsolved_branch_is_skipped() {
        let mut network = bus_breaker_network(f64::NAN, -95.0);
        LossesCompensator::default().run(&mut network).unwrap();
        assert_eq!(p0(&network, "A"), 0.0);
        assert_eq!(p0(&network, "B"), 0.0);
    }

    #[test]
    fn test_tie_line_losses_split_by_resistance() {
        let mut network = Network::new("tie");
        network
            .add_voltage_level(VoltageLevel::bus_breaker("VL_FR", "FR"))
            .unwrap();
        network
            .add_voltage_level(VoltageLevel::bus_breaker("VL_BE", "BE"))
            .unwrap();
        network.add_bus(Bus::new("F", "VL_FR")).unwrap();
        network.add_bus(Bus::new("B", "VL_BE")).unwrap();
        network
            .add_branch(Branch::tie_line(
                "F_X_B",
                HalfLine {
                    id: "F_X".into(),
                    r: 1.0,
                },
                HalfLine {
                    id: "X_B".into(),
                    r: 3.0,
                },
                Terminal::new("F").with_p(50.0),
                Terminal::new("B").with_p(-46.0),
            ))
            .unwrap();
        LossesCompensator::default().run(&mut network).unwrap();
        assert!((p0(&network, "F") - 1.0).abs() < 1e-9);
        assert!((p0(&network, "B") - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_node_breaker_load_on_new_node() {
        let mut network = Network::new("nb");
        network
            .add_voltage_level(VoltageLevel::node_breaker("VL", "FR", 4))
            .unwrap();
        network
            .add_bus(Bus::new("BUS1", "VL").with_nodes(vec![0, 1]))
            .unwrap();
        network
            .add_bus(Bus::new("BUS2", "VL").with_nodes(vec![2, 3]))
            .unwrap();
        network
            .add_branch(Branch::line(
                "L",
                1.0,
                Terminal::at_node("BUS1", 1).with_p(30.0),
                Terminal::at_node("BUS2", 2).with_p(-29.0),
            ))
            .unwrap();
        LossesCompensator::default().run(&mut network).unwrap();

        let load = network
            .injection(&losses_load_id(&BusId::new("BUS1")))
            .unwrap();
        let node = load.terminal.node.unwrap();
        assert!(node >= 4);
        assert!(network.bus(&BusId::new("BUS1")).unwrap().nodes.contains(&node));
        assert!((p0(&network, "BUS1") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_node_breaker_bus_without_node_uses_first_level_node() {
        let mut network = Network::new("nb");
        network
            .add_voltage_level(VoltageLevel::node_breaker("VL", "FR", 2))
            .unwrap();
        network.add_bus(Bus::new("EMPTY", "VL")).unwrap();
        network
            .add_bus(Bus::new("OTHER", "VL").with_nodes(vec![0, 1]))
            .unwrap();
        network
            .add_branch(Branch::line(
                "L",
                1.0,
                Terminal::new("EMPTY").with_p(20.0),
                Terminal::at_node("OTHER", 0).with_p(-18.0),
            ))
            .unwrap();
        LossesCompensator::default().run(&mut network).unwrap();

        let load = network
            .injection(&losses_load_id(&BusId::new("EMPTY")))
            .unwrap();
        assert_eq!(load.terminal.connectable_bus, BusId::new("EMPTY"));
        let node = load.terminal.node.unwrap();
        assert!(node >= 2);
        let level = network.voltage_level(&VoltageLevelId::new("VL")).unwrap();
        assert!(level
            .internal_connections
            .iter()
            .any(|c| c.node1 == node && c.node2 == 0));
        assert!((p0(&network, "EMPTY") - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_node_breaker_level_without_nodes_fails() {
        let mut network = Network::new("nb");
        network
            .add_voltage_level(VoltageLevel::node_breaker("VL", "FR", 0))
            .unwrap();
        network
            .add_voltage_level(VoltageLevel::bus_breaker("VL_BB", "FR"))
            .unwrap();
        network.add_bus(Bus::new("EMPTY", "VL")).unwrap();
        network.add_bus(Bus::new("A", "VL_BB")).unwrap();
        network
            .add_branch(Branch::line(
                "L",
                1.0,
                Terminal::new("EMPTY"),
                Terminal::new("A"),
            ))
            .unwrap();
        let err = LossesCompensator::default().run(&mut network).unwrap_err();
        assert!(matches!(err, FlowDecompositionError::UnsupportedTopology(_)));
    }
}
