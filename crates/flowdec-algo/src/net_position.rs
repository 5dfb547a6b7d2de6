//! Zonal net positions from a solved network.
//!
//! The net position of a zone is the active power leaving it. Cross-zone
//! branches contribute half of the side difference,
//! ```text
//! leaving(zone of side 1) =  (P1 - P2) / 2
//! leaving(zone of side 2) = -(P1 - P2) / 2
//! ```
//! and unpaired dangling lines contribute their terminal P. A disconnected or
//! unsolved side counts as zero.

use flowdec_core::{FlowDecompositionResult, Network, Terminal, ZoneId};
use std::collections::BTreeMap;

/// Zone → net position (MW).
pub type NetPositions = BTreeMap<ZoneId, f64>;

#[derive(Debug, Clone, Copy, Default)]
pub struct NetPositionComputer;

impl NetPositionComputer {
    /// Net position of every zone of the network; isolated zones get zero.
    pub fn run(&self, network: &Network) -> FlowDecompositionResult<NetPositions> {
        let mut net_positions: NetPositions =
            network.zones().into_iter().map(|zone| (zone, 0.0)).collect();

        for branch in network.branches() {
            let zone1 = network.terminal_zone(&branch.terminal1)?;
            let zone2 = network.terminal_zone(&branch.terminal2)?;
            if zone1 == zone2 {
                continue;
            }
            let direct = (leaving_flow(&branch.terminal1) - leaving_flow(&branch.terminal2)) / 2.0;
            *net_positions.entry(zone1.clone()).or_default() += direct;
            *net_positions.entry(zone2.clone()).or_default() -= direct;
        }

        for dangling_line in network
            .injections()
            .filter(|injection| injection.is_unpaired_dangling_line())
        {
            let zone = network.terminal_zone(&dangling_line.terminal)?;
            *net_positions.entry(zone.clone()).or_default() += leaving_flow(&dangling_line.terminal);
        }

        Ok(net_positions)
    }
}

fn leaving_flow(terminal: &Terminal) -> f64 {
    if terminal.connected && terminal.has_p() {
        terminal.p
    } else {
        0.0
    }
}
