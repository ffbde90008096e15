use std::time::Duration;

use serde::Deserialize;

use crate::engine::NodeState;
use crate::error::MeshError;
use crate::frame::{Address, COLOR_OVERHEAD};
use crate::FRAME_SIZE;

/// Largest route table: slots travel as a single byte.
pub const MAX_ROUTE_CAPACITY: usize = 256;

/// Engine tick period per state, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Cadence {
    pub init_ms: u64,
    pub conf_ms: u64,
    pub addr_ms: u64,
    pub color_ms: u64,
    pub sleep_ms: u64,
}

impl Default for Cadence {
    fn default() -> Self {
        Self { init_ms: 5000, conf_ms: 100, addr_ms: 100, color_ms: 10, sleep_ms: 5000 }
    }
}

impl Cadence {
    pub fn period(&self, state: NodeState) -> Duration {
        let ms = match state {
            NodeState::Init => self.init_ms,
            NodeState::Conf => self.conf_ms,
            NodeState::Addr => self.addr_ms,
            NodeState::Color => self.color_ms,
            NodeState::Error => 0,
            NodeState::Sleep => self.sleep_ms,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's mesh address.
    pub address: Address,
    pub route_capacity: usize,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub startup_delay_ms: u64,
    pub reconnect_delay_ms: u64,
    pub shutdown_grace_ms: u64,
    pub cadence: Cadence,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: Address::default(),
            route_capacity: 64,
            inbound_capacity: 50_000,
            outbound_capacity: 50_000,
            startup_delay_ms: 5000,
            reconnect_delay_ms: 5000,
            shutdown_grace_ms: 2000,
            cadence: Cadence::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(address: Address) -> Self {
        Self { address, ..Self::default() }
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Largest COLOR frame a full table produces.
    pub fn max_color_frame(&self) -> usize {
        3 * self.route_capacity + COLOR_OVERHEAD
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.route_capacity == 0 || self.route_capacity > MAX_ROUTE_CAPACITY {
            return Err(MeshError::Config(format!(
                "route_capacity must be within 1..={}, got {}",
                MAX_ROUTE_CAPACITY, self.route_capacity
            )));
        }
        let record = self.max_color_frame().max(FRAME_SIZE);
        if self.inbound_capacity < record {
            return Err(MeshError::Config(format!(
                "inbound_capacity {} cannot hold a {}-byte frame",
                self.inbound_capacity, record
            )));
        }
        let fan_out = (self.route_capacity * FRAME_SIZE).max(record);
        if self.outbound_capacity < fan_out {
            return Err(MeshError::Config(format!(
                "outbound_capacity {} cannot hold a {}-byte fan-out",
                self.outbound_capacity, fan_out
            )));
        }
        Ok(())
    }
}
