//! # flowdec-core: Network Model for Flow Decomposition
//!
//! Provides the network snapshot consumed by the flow decomposition algorithms:
//! buses grouped into voltage levels, power injections, and branches carrying
//! solved terminal flows.
//!
//! ## Design Philosophy
//!
//! Networks are modeled as **undirected multigraphs** where:
//! - **Nodes**: Buses
//! - **Edges**: Branches (lines, two-winding transformers, tie lines)
//!
//! Injections (generators, loads, dangling lines, ...) hang off buses through a
//! [`Terminal`] and are kept in insertion order next to the graph. Every
//! terminal records its connectable bus, whether it is connected, and the
//! active power written by the last load flow (`NaN` until then).
//!
//! ## Quick Start
//!
//! ```rust
//! use flowdec_core::*;
//!
//! let mut network = Network::new("two-zones");
//! network
//!     .add_voltage_level(VoltageLevel::bus_breaker("VL_FR", "FR"))
//!     .unwrap();
//! network
//!     .add_voltage_level(VoltageLevel::bus_breaker("VL_BE", "BE"))
//!     .unwrap();
//! network.add_bus(Bus::new("B_FR", "VL_FR")).unwrap();
//! network.add_bus(Bus::new("B_BE", "VL_BE")).unwrap();
//!
//! network
//!     .add_injection(Injection::generator("GEN_FR", 100.0, Terminal::new("B_FR")))
//!     .unwrap();
//! network
//!     .add_injection(Injection::load("LOAD_BE", 100.0, Terminal::new("B_BE")))
//!     .unwrap();
//! network
//!     .add_branch(Branch::line(
//!         "FR_BE",
//!         0.5,
//!         Terminal::new("B_FR"),
//!         Terminal::new("B_BE"),
//!     ))
//!     .unwrap();
//!
//! assert_eq!(network.zones().len(), 2);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Unified error type
//! - [`topology`] - Main synchronous component detection

use chrono::{DateTime, Utc};
use petgraph::graph::{EdgeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

pub mod error;
pub mod topology;

pub use error::{FlowDecompositionError, FlowDecompositionResult};
pub use petgraph::graph::NodeIndex;
pub use topology::MainComponent;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[inline]
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }
    };
}

string_id!(
    /// Bus identifier
    BusId
);
string_id!(
    /// Branch identifier (lines, transformers, tie lines)
    BranchId
);
string_id!(
    /// Injection identifier (generators, loads, dangling lines, ...)
    InjectionId
);
string_id!(
    /// Voltage level identifier
    VoltageLevelId
);
string_id!(
    /// Market zone code (country or bidding zone), e.g. `FR`
    ZoneId
);

/// How buses of a voltage level are described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyKind {
    /// Buses are explicit objects; equipment attaches to a bus directly.
    BusBreaker,
    /// Equipment attaches to numbered nodes; buses group nodes.
    NodeBreaker,
}

/// Node-to-node link inside a node-breaker voltage level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalConnection {
    pub node1: usize,
    pub node2: usize,
}

#[derive(Debug, Clone)]
pub struct VoltageLevel {
    pub id: VoltageLevelId,
    /// Zone owning every bus of this voltage level
    pub zone: ZoneId,
    pub topology: TopologyKind,
    /// Number of allocated nodes (node-breaker only); nodes are `0..node_count`
    pub node_count: usize,
    pub internal_connections: Vec<InternalConnection>,
}

impl VoltageLevel {
    pub fn bus_breaker(id: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            id: VoltageLevelId::new(id),
            zone: ZoneId::new(zone),
            topology: TopologyKind::BusBreaker,
            node_count: 0,
            internal_connections: Vec::new(),
        }
    }

    pub fn node_breaker(id: impl Into<String>, zone: impl Into<String>, node_count: usize) -> Self {
        Self {
            id: VoltageLevelId::new(id),
            zone: ZoneId::new(zone),
            topology: TopologyKind::NodeBreaker,
            node_count,
            internal_connections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bus {
    pub id: BusId,
    pub voltage_level: VoltageLevelId,
    /// Nodes grouped by this bus (node-breaker voltage levels only)
    pub nodes: Vec<usize>,
}

impl Bus {
    pub fn new(id: impl Into<String>, voltage_level: impl Into<String>) -> Self {
        Self {
            id: BusId::new(id),
            voltage_level: VoltageLevelId::new(voltage_level),
            nodes: Vec::new(),
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<usize>) -> Self {
        self.nodes = nodes;
        self
    }
}

/// Connection point of an injection or of one side of a branch.
#[derive(Debug, Clone)]
pub struct Terminal {
    /// Bus the terminal belongs to when connected
    pub connectable_bus: BusId,
    /// Node inside a node-breaker voltage level
    pub node: Option<usize>,
    pub connected: bool,
    /// Active power flowing out of the bus into the equipment (MW), `NaN` until solved
    pub p: f64,
}

impl Terminal {
    pub fn new(bus: impl Into<String>) -> Self {
        Self {
            connectable_bus: BusId::new(bus),
            node: None,
            connected: true,
            p: f64::NAN,
        }
    }

    pub fn at_node(bus: impl Into<String>, node: usize) -> Self {
        Self {
            node: Some(node),
            ..Self::new(bus)
        }
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn with_p(mut self, p: f64) -> Self {
        self.p = p;
        self
    }

    /// Bus of a connected terminal.
    pub fn bus(&self) -> Option<&BusId> {
        self.connected.then_some(&self.connectable_bus)
    }

    pub fn has_p(&self) -> bool {
        !self.p.is_nan()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InjectionKind {
    Generator { target_p: f64 },
    Load { p0: f64, q0: f64 },
    /// Boundary injection; `paired` when merged into a tie line
    DanglingLine { p0: f64, paired: bool },
    BusbarSection,
    ShuntCompensator,
    StaticVarCompensator,
}

#[derive(Debug, Clone)]
pub struct Injection {
    pub id: InjectionId,
    pub kind: InjectionKind,
    pub terminal: Terminal,
}

impl Injection {
    pub fn new(id: impl Into<String>, kind: InjectionKind, terminal: Terminal) -> Self {
        Self {
            id: InjectionId::new(id),
            kind,
            terminal,
        }
    }

    pub fn generator(id: impl Into<String>, target_p: f64, terminal: Terminal) -> Self {
        Self::new(id, InjectionKind::Generator { target_p }, terminal)
    }

    pub fn load(id: impl Into<String>, p0: f64, terminal: Terminal) -> Self {
        Self::new(id, InjectionKind::Load { p0, q0: 0.0 }, terminal)
    }

    pub fn dangling_line(id: impl Into<String>, p0: f64, terminal: Terminal) -> Self {
        Self::new(id, InjectionKind::DanglingLine { p0, paired: false }, terminal)
    }

    pub fn is_generator(&self) -> bool {
        matches!(self.kind, InjectionKind::Generator { .. })
    }

    pub fn is_load(&self) -> bool {
        matches!(self.kind, InjectionKind::Load { .. })
    }

    pub fn is_unpaired_dangling_line(&self) -> bool {
        matches!(self.kind, InjectionKind::DanglingLine { paired: false, .. })
    }
}

/// One tap of a phase tap changer; `alpha` is the phase shift in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTapChangerStep {
    pub alpha: f64,
}

#[derive(Debug, Clone)]
pub struct PhaseTapChanger {
    pub steps: Vec<PhaseTapChangerStep>,
    pub tap_position: usize,
    /// Position whose phase shift is the zero reference, if any
    pub neutral_position: Option<usize>,
}

impl PhaseTapChanger {
    /// Builds a tap changer from step angles, detecting the zero-angle step as neutral.
    pub fn from_alphas(alphas: &[f64], tap_position: usize) -> Self {
        let neutral_position = alphas.iter().position(|alpha| *alpha == 0.0);
        Self {
            steps: alphas
                .iter()
                .map(|&alpha| PhaseTapChangerStep { alpha })
                .collect(),
            tap_position,
            neutral_position,
        }
    }

    pub fn current_alpha(&self) -> Option<f64> {
        self.steps.get(self.tap_position).map(|s| s.alpha)
    }

    pub fn neutral_alpha(&self) -> Option<f64> {
        self.neutral_position
            .and_then(|position| self.steps.get(position))
            .map(|s| s.alpha)
    }

    pub fn has_neutral_step(&self) -> bool {
        self.neutral_alpha().is_some()
    }
}

/// Half of a tie line, from its own side up to the boundary point.
#[derive(Debug, Clone)]
pub struct HalfLine {
    pub id: String,
    /// Series resistance (ohm)
    pub r: f64,
}

#[derive(Debug, Clone)]
pub enum BranchKind {
    Line {
        r: f64,
    },
    TwoWindingsTransformer {
        r: f64,
        phase_tap_changer: Option<PhaseTapChanger>,
    },
    TieLine {
        half1: HalfLine,
        half2: HalfLine,
    },
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub id: BranchId,
    pub kind: BranchKind,
    pub terminal1: Terminal,
    pub terminal2: Terminal,
}

impl Branch {
    pub fn line(id: impl Into<String>, r: f64, terminal1: Terminal, terminal2: Terminal) -> Self {
        Self {
            id: BranchId::new(id),
            kind: BranchKind::Line { r },
            terminal1,
            terminal2,
        }
    }

    pub fn transformer(
        id: impl Into<String>,
        r: f64,
        phase_tap_changer: Option<PhaseTapChanger>,
        terminal1: Terminal,
        terminal2: Terminal,
    ) -> Self {
        Self {
            id: BranchId::new(id),
            kind: BranchKind::TwoWindingsTransformer {
                r,
                phase_tap_changer,
            },
            terminal1,
            terminal2,
        }
    }

    pub fn tie_line(
        id: impl Into<String>,
        half1: HalfLine,
        half2: HalfLine,
        terminal1: Terminal,
        terminal2: Terminal,
    ) -> Self {
        Self {
            id: BranchId::new(id),
            kind: BranchKind::TieLine { half1, half2 },
            terminal1,
            terminal2,
        }
    }

    /// True when both sides are connected.
    pub fn is_connected(&self) -> bool {
        self.terminal1.connected && self.terminal2.connected
    }

    pub fn phase_tap_changer(&self) -> Option<&PhaseTapChanger> {
        match &self.kind {
            BranchKind::TwoWindingsTransformer {
                phase_tap_changer, ..
            } => phase_tap_changer.as_ref(),
            _ => None,
        }
    }

    pub fn phase_tap_changer_mut(&mut self) -> Option<&mut PhaseTapChanger> {
        match &mut self.kind {
            BranchKind::TwoWindingsTransformer {
                phase_tap_changer, ..
            } => phase_tap_changer.as_mut(),
            _ => None,
        }
    }
}

/// Network snapshot: bus graph, voltage levels and injections.
#[derive(Debug, Clone)]
pub struct Network {
    pub id: String,
    /// Timestamp of the study case, used to pick time-dependent inputs
    pub case_date: Option<DateTime<Utc>>,
    pub graph: UnGraph<Bus, Branch>,
    voltage_levels: Vec<VoltageLevel>,
    injections: Vec<Injection>,
    bus_lookup: HashMap<BusId, NodeIndex>,
    branch_lookup: HashMap<BranchId, EdgeIndex>,
    injection_lookup: HashMap<InjectionId, usize>,
}

impl Network {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            case_date: None,
            graph: UnGraph::default(),
            voltage_levels: Vec::new(),
            injections: Vec::new(),
            bus_lookup: HashMap::new(),
            branch_lookup: HashMap::new(),
            injection_lookup: HashMap::new(),
        }
    }

    pub fn with_case_date(mut self, case_date: DateTime<Utc>) -> Self {
        self.case_date = Some(case_date);
        self
    }

    pub fn add_voltage_level(&mut self, voltage_level: VoltageLevel) -> FlowDecompositionResult<()> {
        if self.voltage_level(&voltage_level.id).is_some() {
            return Err(FlowDecompositionError::DuplicateElement(
                voltage_level.id.to_string(),
            ));
        }
        self.voltage_levels.push(voltage_level);
        Ok(())
    }

    pub fn add_bus(&mut self, bus: Bus) -> FlowDecompositionResult<NodeIndex> {
        if self.bus_lookup.contains_key(&bus.id) {
            return Err(FlowDecompositionError::DuplicateElement(bus.id.to_string()));
        }
        if self.voltage_level(&bus.voltage_level).is_none() {
            return Err(FlowDecompositionError::UnknownElement(
                bus.voltage_level.to_string(),
            ));
        }
        let id = bus.id.clone();
        let index = self.graph.add_node(bus);
        self.bus_lookup.insert(id, index);
        Ok(index)
    }

    pub fn add_injection(&mut self, injection: Injection) -> FlowDecompositionResult<()> {
        if self.injection_lookup.contains_key(&injection.id) {
            return Err(FlowDecompositionError::DuplicateElement(
                injection.id.to_string(),
            ));
        }
        self.bus_index(&injection.terminal.connectable_bus)?;
        self.injection_lookup
            .insert(injection.id.clone(), self.injections.len());
        self.injections.push(injection);
        Ok(())
    }

    pub fn add_branch(&mut self, branch: Branch) -> FlowDecompositionResult<EdgeIndex> {
        if self.branch_lookup.contains_key(&branch.id) {
            return Err(FlowDecompositionError::DuplicateElement(branch.id.to_string()));
        }
        let from = self.bus_index(&branch.terminal1.connectable_bus)?;
        let to = self.bus_index(&branch.terminal2.connectable_bus)?;
        let id = branch.id.clone();
        let index = self.graph.add_edge(from, to, branch);
        self.branch_lookup.insert(id, index);
        Ok(index)
    }

    /// Reserves a fresh node in a node-breaker voltage level and returns its number.
    pub fn allocate_node(&mut self, voltage_level: &VoltageLevelId) -> FlowDecompositionResult<usize> {
        let level = self.voltage_level_mut(voltage_level)?;
        let node = level.node_count;
        level.node_count += 1;
        Ok(node)
    }

    /// Links two nodes; a node not yet grouped joins the bus of the other one.
    pub fn add_internal_connection(
        &mut self,
        voltage_level: &VoltageLevelId,
        node1: usize,
        node2: usize,
    ) -> FlowDecompositionResult<()> {
        let level = self.voltage_level_mut(voltage_level)?;
        if node1.max(node2) >= level.node_count {
            return Err(FlowDecompositionError::UnknownElement(format!(
                "node {} in voltage level {}",
                node1.max(node2),
                voltage_level
            )));
        }
        level
            .internal_connections
            .push(InternalConnection { node1, node2 });

        let owner = self.graph.node_indices().find(|&n| {
            let bus = &self.graph[n];
            &bus.voltage_level == voltage_level
                && (bus.nodes.contains(&node1) || bus.nodes.contains(&node2))
        });
        if let Some(owner) = owner {
            let bus = &mut self.graph[owner];
            for node in [node1, node2] {
                if !bus.nodes.contains(&node) {
                    bus.nodes.push(node);
                }
            }
        }
        Ok(())
    }

    pub fn voltage_level(&self, id: &VoltageLevelId) -> Option<&VoltageLevel> {
        self.voltage_levels.iter().find(|vl| &vl.id == id)
    }

    fn voltage_level_mut(&mut self, id: &VoltageLevelId) -> FlowDecompositionResult<&mut VoltageLevel> {
        self.voltage_levels
            .iter_mut()
            .find(|vl| &vl.id == id)
            .ok_or_else(|| FlowDecompositionError::UnknownElement(id.to_string()))
    }

    pub fn voltage_levels(&self) -> impl Iterator<Item = &VoltageLevel> {
        self.voltage_levels.iter()
    }

    pub fn bus_index(&self, id: &BusId) -> FlowDecompositionResult<NodeIndex> {
        self.bus_lookup
            .get(id)
            .copied()
            .ok_or_else(|| FlowDecompositionError::UnknownElement(id.to_string()))
    }

    pub fn bus(&self, id: &BusId) -> FlowDecompositionResult<&Bus> {
        Ok(&self.graph[self.bus_index(id)?])
    }

    pub fn buses(&self) -> impl Iterator<Item = &Bus> {
        self.graph.node_weights()
    }

    pub fn bus_voltage_level(&self, id: &BusId) -> FlowDecompositionResult<&VoltageLevel> {
        let bus = self.bus(id)?;
        self.voltage_level(&bus.voltage_level)
            .ok_or_else(|| FlowDecompositionError::UnknownElement(bus.voltage_level.to_string()))
    }

    pub fn bus_zone(&self, id: &BusId) -> FlowDecompositionResult<&ZoneId> {
        Ok(&self.bus_voltage_level(id)?.zone)
    }

    /// Zone of the connectable bus of a terminal.
    pub fn terminal_zone(&self, terminal: &Terminal) -> FlowDecompositionResult<&ZoneId> {
        self.bus_zone(&terminal.connectable_bus)
    }

    /// All zones present in the network, sorted.
    pub fn zones(&self) -> BTreeSet<ZoneId> {
        self.voltage_levels.iter().map(|vl| vl.zone.clone()).collect()
    }

    pub fn injections(&self) -> impl Iterator<Item = &Injection> {
        self.injections.iter()
    }

    pub fn injections_mut(&mut self) -> impl Iterator<Item = &mut Injection> {
        self.injections.iter_mut()
    }

    pub fn injection(&self, id: &InjectionId) -> Option<&Injection> {
        self.injection_lookup.get(id).map(|&i| &self.injections[i])
    }

    pub fn injection_mut(&mut self, id: &InjectionId) -> Option<&mut Injection> {
        match self.injection_lookup.get(id) {
            Some(&i) => self.injections.get_mut(i),
            None => None,
        }
    }

    /// Branches in insertion order.
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.graph.edge_weights()
    }

    pub fn branches_mut(&mut self) -> impl Iterator<Item = &mut Branch> {
        self.graph.edge_weights_mut()
    }

    pub fn branch(&self, id: &BranchId) -> Option<&Branch> {
        self.branch_lookup.get(id).map(|&e| &self.graph[e])
    }

    pub fn branch_mut(&mut self, id: &BranchId) -> Option<&mut Branch> {
        match self.branch_lookup.get(id) {
            Some(&e) => self.graph.edge_weight_mut(e),
            None => None,
        }
    }

    /// Opens both sides of a branch and clears their flows.
    pub fn disconnect_branch(&mut self, id: &BranchId) -> FlowDecompositionResult<()> {
        let branch = self
            .branch_mut(id)
            .ok_or_else(|| FlowDecompositionError::UnknownElement(id.to_string()))?;
        for terminal in [&mut branch.terminal1, &mut branch.terminal2] {
            terminal.connected = false;
            terminal.p = f64::NAN;
        }
        Ok(())
    }

    /// Sets the active power of every terminal (injections and both branch sides) to `NaN`.
    pub fn reset_flows(&mut self) {
        for injection in self.injections.iter_mut() {
            injection.terminal.p = f64::NAN;
        }
        for branch in self.graph.edge_weights_mut() {
            branch.terminal1.p = f64::NAN;
            branch.terminal2.p = f64::NAN;
        }
    }
}
