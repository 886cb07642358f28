//! Node registry: orchestrator ids, engine handles, and per-node state.
//!
//! One bijective mapping between the orchestrator's node ids and locally
//! allocated handles. Both directions are updated by the same insert, and
//! the underlying maps are never exposed. Each node carries a tagged state
//! variant fixed at creation, so no downcasting happens at use time.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("node id {0} already exists")]
    DuplicateNode(u32),
    #[error("node id {0} is not registered")]
    UnknownNode(u32),
    #[error("node handle {0} is not registered")]
    UnknownHandle(u32),
    #[error("node id {0} has no radio")]
    NotRadio(u32),
}

/// Locally allocated node handle. Dense, never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WifiConfig {
    pub on: bool,
    pub ip: Option<u32>,
    pub transmit_power_mw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CellConfig {
    pub on: bool,
    pub ip: Option<u32>,
}

/// Per-node state, tagged at creation.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Radio {
        position: Position,
        wifi: WifiConfig,
        cell: CellConfig,
    },
    Wired {
        position: Position,
    },
    /// Cell base station. Stationary after creation.
    CellTower {
        position: Position,
    },
}

impl NodeState {
    pub fn is_radio(&self) -> bool {
        matches!(self, NodeState::Radio { .. })
    }

    pub fn is_wired(&self) -> bool {
        matches!(self, NodeState::Wired { .. })
    }

    pub fn position(&self) -> Position {
        match self {
            NodeState::Radio { position, .. }
            | NodeState::Wired { position }
            | NodeState::CellTower { position } => *position,
        }
    }
}

struct NodeEntry {
    external: u32,
    state: NodeState,
    active: bool,
}

/// The registry. Handles index into a dense vec; the external-id map points
/// back at it. All mutation goes through methods that keep both in step.
#[derive(Default)]
pub struct NodeRegistry {
    by_external: HashMap<u32, NodeHandle>,
    entries: Vec<NodeEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, external: u32, state: NodeState) -> Result<NodeHandle, RegistryError> {
        if self.by_external.contains_key(&external) {
            return Err(RegistryError::DuplicateNode(external));
        }
        let handle = NodeHandle(self.entries.len() as u32);
        self.entries.push(NodeEntry {
            external,
            state,
            active: true,
        });
        self.by_external.insert(external, handle);
        tracing::info!(node = external, %handle, "registered node");
        Ok(handle)
    }

    pub fn create_radio_node(
        &mut self,
        external: u32,
        position: Position,
    ) -> Result<NodeHandle, RegistryError> {
        self.insert(
            external,
            NodeState::Radio {
                position,
                wifi: WifiConfig::default(),
                cell: CellConfig::default(),
            },
        )
    }

    pub fn create_wired_node(
        &mut self,
        external: u32,
        position: Position,
    ) -> Result<NodeHandle, RegistryError> {
        self.insert(external, NodeState::Wired { position })
    }

    pub fn create_cell_tower(
        &mut self,
        external: u32,
        position: Position,
    ) -> Result<NodeHandle, RegistryError> {
        self.insert(external, NodeState::CellTower { position })
    }

    pub fn handle_of(&self, external: u32) -> Result<NodeHandle, RegistryError> {
        self.by_external
            .get(&external)
            .copied()
            .ok_or(RegistryError::UnknownNode(external))
    }

    pub fn external_of(&self, handle: NodeHandle) -> Result<u32, RegistryError> {
        self.entry(handle).map(|e| e.external)
    }

    fn entry(&self, handle: NodeHandle) -> Result<&NodeEntry, RegistryError> {
        self.entries
            .get(handle.index())
            .ok_or(RegistryError::UnknownHandle(handle.0))
    }

    fn entry_by_external(&mut self, external: u32) -> Result<&mut NodeEntry, RegistryError> {
        let handle = self.handle_of(external)?;
        Ok(&mut self.entries[handle.index()])
    }

    pub fn is_active(&self, handle: NodeHandle) -> bool {
        self.entries.get(handle.index()).is_some_and(|e| e.active)
    }

    pub fn state_of(&self, handle: NodeHandle) -> Result<&NodeState, RegistryError> {
        self.entry(handle).map(|e| &e.state)
    }

    /// Move a node. Ignored for deactivated nodes.
    pub fn update_position(&mut self, external: u32, position: Position) -> Result<(), RegistryError> {
        let entry = self.entry_by_external(external)?;
        if !entry.active {
            tracing::debug!(node = external, "position update for deactivated node ignored");
            return Ok(());
        }
        match &mut entry.state {
            NodeState::Radio { position: p, .. }
            | NodeState::Wired { position: p }
            | NodeState::CellTower { position: p } => *p = position,
        }
        Ok(())
    }

    /// Take a node out of the simulation. State is kept so late lookups
    /// still resolve; further operations on it become no-ops.
    pub fn deactivate(&mut self, external: u32) -> Result<(), RegistryError> {
        let entry = self.entry_by_external(external)?;
        if !entry.active {
            tracing::debug!(node = external, "node already deactivated");
            return Ok(());
        }
        entry.active = false;
        tracing::info!(node = external, "deactivated node");
        Ok(())
    }

    pub fn configure_wifi(
        &mut self,
        external: u32,
        on: bool,
        ip: u32,
        transmit_power_mw: f64,
    ) -> Result<(), RegistryError> {
        let entry = self.entry_by_external(external)?;
        if !entry.active {
            tracing::debug!(node = external, "wifi config for deactivated node ignored");
            return Ok(());
        }
        match &mut entry.state {
            NodeState::Radio { wifi, .. } => {
                wifi.on = on;
                wifi.ip = Some(ip);
                wifi.transmit_power_mw = transmit_power_mw;
                Ok(())
            }
            _ => Err(RegistryError::NotRadio(external)),
        }
    }

    pub fn configure_cell(
        &mut self,
        external: u32,
        on: bool,
        ip: u32,
    ) -> Result<(), RegistryError> {
        let entry = self.entry_by_external(external)?;
        if !entry.active {
            tracing::debug!(node = external, "cell config for deactivated node ignored");
            return Ok(());
        }
        match &mut entry.state {
            NodeState::Radio { cell, .. } => {
                cell.on = on;
                cell.ip = Some(ip);
                Ok(())
            }
            _ => Err(RegistryError::NotRadio(external)),
        }
    }

    /// Active radio nodes with wifi turned on.
    pub fn wifi_capable(&self) -> impl Iterator<Item = (NodeHandle, Position, WifiConfig)> + '_ {
        self.entries.iter().enumerate().filter_map(|(i, e)| match e.state {
            NodeState::Radio { position, wifi, .. } if e.active && wifi.on => {
                Some((NodeHandle(i as u32), position, wifi))
            }
            _ => None,
        })
    }

    /// Active radio node owning the given cell IP, if any.
    pub fn find_by_cell_ip(&self, ip: u32) -> Option<NodeHandle> {
        self.entries.iter().enumerate().find_map(|(i, e)| match e.state {
            NodeState::Radio { cell, .. } if e.active && cell.on && cell.ip == Some(ip) => {
                Some(NodeHandle(i as u32))
            }
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.active).count()
    }
}
