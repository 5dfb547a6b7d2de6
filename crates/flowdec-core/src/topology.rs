//! Synchronous component detection.
//!
//! Buses are grouped by breadth-first search over branches whose two sides are
//! connected. The largest group is the main synchronous component; equal sizes
//! keep the first group discovered in bus insertion order.

use crate::{BusId, Network, NodeIndex, Terminal};
use petgraph::visit::EdgeRef;
use std::collections::{HashSet, VecDeque};

/// Bus groups linked by connected branches.
#[derive(Debug, Clone)]
pub struct Components {
    pub members: Vec<Vec<NodeIndex>>,
}

/// Labels connected components over in-service branches.
pub fn synchronous_components(network: &Network) -> Components {
    let mut visited = HashSet::new();
    let mut members = Vec::new();
    for start in network.graph.node_indices() {
        if visited.contains(&start) {
            continue;
        }
        let mut queue = VecDeque::new();
        queue.push_back(start);
        let mut component = Vec::new();
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            component.push(node);
            for edge in network.graph.edges(node) {
                if !edge.weight().is_connected() {
                    continue;
                }
                let neighbor = if edge.source() == node {
                    edge.target()
                } else {
                    edge.source()
                };
                if !visited.contains(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        members.push(component);
    }
    Components { members }
}

/// Buses of the main synchronous component.
#[derive(Debug, Clone, Default)]
pub struct MainComponent {
    buses: HashSet<BusId>,
}

impl MainComponent {
    pub fn compute(network: &Network) -> Self {
        let components = synchronous_components(network);
        let mut largest: Option<&Vec<NodeIndex>> = None;
        for component in &components.members {
            if largest.map_or(true, |l| component.len() > l.len()) {
                largest = Some(component);
            }
        }
        let buses = largest
            .map(|nodes| {
                nodes
                    .iter()
                    .map(|&n| network.graph[n].id.clone())
                    .collect()
            })
            .unwrap_or_default();
        Self { buses }
    }

    pub fn contains(&self, bus: &BusId) -> bool {
        self.buses.contains(bus)
    }

    /// True when the terminal is connected to a bus of the main component.
    pub fn contains_terminal(&self, terminal: &Terminal) -> bool {
        terminal.bus().is_some_and(|bus| self.contains(bus))
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}
