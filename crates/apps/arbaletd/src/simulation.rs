//! Several nodes in one process, meshed over a loopback hub. The first node
//! is root and dials the backend over TCP.

use std::sync::Arc;
use std::time::Duration;

use arbalet_mesh::iface::{LoopbackHub, TcpServerLink};
use arbalet_mesh::{Address, MeshError, Node, NodeConfig, NodeHandle, NodeStatus};

/// Locally administered address of simulated node `index`.
pub fn simulated_address(index: usize) -> Address {
    let [hi, lo] = (index as u16 + 1).to_be_bytes();
    Address::new([0x02, 0x00, 0x00, 0x00, hi, lo])
}

pub struct Simulation {
    hub: LoopbackHub,
    nodes: Vec<NodeHandle>,
}

impl Simulation {
    /// Spawn `count` nodes sharing `template`, with addresses assigned by
    /// [`simulated_address`].
    pub fn spawn(count: usize, server: &str, template: &NodeConfig) -> Result<Self, MeshError> {
        if count == 0 {
            return Err(MeshError::Config("simulation needs at least one node".into()));
        }
        let hub = LoopbackHub::new();
        let mut nodes = Vec::with_capacity(count);
        for index in 0..count {
            let config = NodeConfig { address: simulated_address(index), ..template.clone() };
            let mesh = Arc::new(hub.join(config.address));
            let mut node = Node::new(config, mesh);
            if index == 0 {
                node = node.with_server_link(Arc::new(TcpServerLink::new(server)));
            }
            nodes.push(node.spawn()?);
        }
        log::info!("simulation: {} nodes, root {}", count, simulated_address(0));
        Ok(Self { hub, nodes })
    }

    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }

    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn statuses(&self) -> Vec<(Address, NodeStatus)> {
        self.nodes.iter().map(|node| (node.address(), node.status())).collect()
    }

    /// Stop every node, returning the first fatal fault.
    pub async fn shutdown(self, grace: Duration) -> Result<(), MeshError> {
        let mut first = Ok(());
        for node in self.nodes {
            let address = node.address();
            if let Err(err) = node.shutdown(grace).await {
                log::error!("simulation: {} stopped on {}", address, err);
                if first.is_ok() {
                    first = Err(err);
                }
            }
        }
        first
    }
}
