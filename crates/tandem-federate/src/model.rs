//! Network model seam: the opaque operations the dispatcher schedules.
//!
//! The physical layer proper is out of scope for the coupling; the
//! dispatcher only needs somebody to answer "who receives this transmission,
//! and when". `RangeModel` is a deliberately small built-in answer.

use crate::registry::{NodeHandle, NodeRegistry};

/// One message arriving at a node some delay after the transmission event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delay: i64,
    pub node: NodeHandle,
    pub message_id: u32,
    pub rssi: i32,
}

/// External collaborator interface. Node lifecycle and radio state live in
/// the registry; the model decides propagation and owns the session hooks.
pub trait NetworkModel {
    /// One-time hook, run when the first time advance completes the setup
    /// phase. Topology bring-up that must happen after node creation but
    /// before any event executes belongs here.
    fn on_start(&mut self);

    /// Teardown hook, run on SHUT_DOWN before the engine stops.
    fn on_shutdown(&mut self, registry: &NodeRegistry);

    /// Recipients of a wifi transmission. `dest` is an IPv4 address as u32;
    /// all-ones is broadcast.
    fn wifi_deliveries(
        &self,
        registry: &NodeRegistry,
        sender: NodeHandle,
        dest: u32,
        message_id: u32,
        length: u32,
    ) -> Vec<Delivery>;

    /// Recipients of a cell transmission, routed by configured cell IP.
    fn cell_deliveries(
        &self,
        registry: &NodeRegistry,
        sender: NodeHandle,
        dest: u32,
        message_id: u32,
        length: u32,
    ) -> Vec<Delivery>;
}

/// Broadcast wifi address.
pub const BROADCAST_ADDRESS: u32 = u32::MAX;

/// Range-gated wifi broadcast plus IP-addressed cell delivery, both with
/// fixed latency. Received signal strength is reported as 0, matching the
/// reference federate.
pub struct RangeModel {
    pub wifi_range: f64,
    pub link_delay_ns: i64,
    pub cell_delay_ns: i64,
}

impl RangeModel {
    pub fn new(wifi_range: f64, link_delay_ns: i64, cell_delay_ns: i64) -> Self {
        Self {
            wifi_range,
            link_delay_ns,
            cell_delay_ns,
        }
    }
}

impl NetworkModel for RangeModel {
    fn on_start(&mut self) {
        tracing::info!(
            wifi_range = self.wifi_range,
            link_delay_ns = self.link_delay_ns,
            "network model started"
        );
    }

    fn on_shutdown(&mut self, registry: &NodeRegistry) {
        tracing::info!(
            nodes = registry.len(),
            active = registry.active_count(),
            "network model shut down"
        );
    }

    fn wifi_deliveries(
        &self,
        registry: &NodeRegistry,
        sender: NodeHandle,
        dest: u32,
        message_id: u32,
        length: u32,
    ) -> Vec<Delivery> {
        let Ok(state) = registry.state_of(sender) else {
            return Vec::new();
        };
        if !registry.is_active(sender) || !state.is_radio() {
            tracing::warn!(%sender, "wifi send from inactive or non-radio node dropped");
            return Vec::new();
        }
        let origin = state.position();
        tracing::debug!(%sender, dest, message_id, length, "wifi transmission");

        registry
            .wifi_capable()
            .filter(|(handle, position, wifi)| {
                *handle != sender
                    && origin.distance_to(position) <= self.wifi_range
                    && (dest == BROADCAST_ADDRESS || wifi.ip == Some(dest))
            })
            .map(|(handle, _, _)| Delivery {
                delay: self.link_delay_ns,
                node: handle,
                message_id,
                rssi: 0,
            })
            .collect()
    }

    fn cell_deliveries(
        &self,
        registry: &NodeRegistry,
        sender: NodeHandle,
        dest: u32,
        message_id: u32,
        length: u32,
    ) -> Vec<Delivery> {
        if !registry.is_active(sender) {
            tracing::warn!(%sender, "cell send from inactive node dropped");
            return Vec::new();
        }
        tracing::debug!(%sender, dest, message_id, length, "cell transmission");

        match registry.find_by_cell_ip(dest) {
            Some(node) if node != sender => vec![Delivery {
                delay: self.cell_delay_ns,
                node,
                message_id,
                rssi: 0,
            }],
            _ => Vec::new(),
        }
    }
}
