use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use super::BUFFER_SIZE;
use crate::frame::Address;
use crate::transport::{MeshTarget, MeshTransport, TransportError};

/// Mesh over plain UDP with a fixed peer map.
///
/// There is no tree formation: the root is whichever member the map names
/// as root, and every member can reach every other member directly.
pub struct UdpMesh {
    socket: UdpSocket,
    address: Address,
    root: Address,
    peers: HashMap<Address, SocketAddr>,
    members: HashMap<SocketAddr, Address>,
}

impl UdpMesh {
    pub async fn bind<I>(
        bind: SocketAddr,
        address: Address,
        root: Address,
        peers: I,
    ) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = (Address, SocketAddr)>,
    {
        let socket = UdpSocket::bind(bind).await?;
        let peers: HashMap<Address, SocketAddr> = peers.into_iter().collect();
        let members = peers.iter().map(|(address, endpoint)| (*endpoint, *address)).collect();
        log::info!(
            "udp_mesh: {} bound to <{}> with {} peers (root {})",
            address,
            socket.local_addr()?,
            peers.len(),
            root
        );
        Ok(Self { socket, address, root, peers, members })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl MeshTransport for UdpMesh {
    fn is_root(&self) -> bool {
        self.address == self.root
    }

    async fn send(&self, target: MeshTarget, frame: &[u8]) -> Result<(), TransportError> {
        let address = match target {
            MeshTarget::Root => self.root,
            MeshTarget::Node(address) => address,
        };
        let endpoint = self.peers.get(&address).ok_or(TransportError::Unreachable(address))?;
        self.socket.send_to(frame, endpoint).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(Address, Vec<u8>), TransportError> {
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            let (n, endpoint) = self.socket.recv_from(&mut buffer).await?;
            match self.members.get(&endpoint) {
                Some(address) => return Ok((*address, buffer[..n].to_vec())),
                None => log::warn!("udp_mesh: dropping datagram from unknown <{}>", endpoint),
            }
        }
    }
}
