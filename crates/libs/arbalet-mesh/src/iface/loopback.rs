use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::frame::Address;
use crate::transport::{MeshTarget, MeshTransport, TransportError};

const INBOX_DEPTH: usize = 1024;

type Datagram = (Address, Vec<u8>);

#[derive(Default)]
struct Hub {
    members: HashMap<Address, mpsc::Sender<Datagram>>,
    root: Option<Address>,
}

/// In-process mesh: every joined member can reach every other member.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a member. The first member to join becomes root.
    pub fn join(&self, address: Address) -> LoopbackMesh {
        let (tx, rx) = mpsc::channel(INBOX_DEPTH);
        let mut hub = self.lock();
        hub.members.insert(address, tx);
        hub.root.get_or_insert(address);
        LoopbackMesh { address, hub: self.clone(), inbox: tokio::sync::Mutex::new(rx) }
    }

    pub fn set_root(&self, address: Address) {
        log::info!("loopback: root is now {}", address);
        self.lock().root = Some(address);
    }

    pub fn root(&self) -> Option<Address> {
        self.lock().root
    }

    /// Detach a member; its pending and future datagrams are dropped.
    pub fn leave(&self, address: &Address) {
        self.lock().members.remove(address);
    }
}

pub struct LoopbackMesh {
    address: Address,
    hub: LoopbackHub,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Datagram>>,
}

impl LoopbackMesh {
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl MeshTransport for LoopbackMesh {
    fn is_root(&self) -> bool {
        self.hub.root() == Some(self.address)
    }

    async fn send(&self, target: MeshTarget, frame: &[u8]) -> Result<(), TransportError> {
        let (address, inbox) = {
            let hub = self.hub.lock();
            let address = match target {
                MeshTarget::Root => hub.root.ok_or(TransportError::Unreachable(self.address))?,
                MeshTarget::Node(address) => address,
            };
            let inbox = hub.members.get(&address).cloned();
            (address, inbox)
        };
        let inbox = inbox.ok_or(TransportError::Unreachable(address))?;
        inbox
            .send((self.address, frame.to_vec()))
            .await
            .map_err(|_| TransportError::Unreachable(address))
    }

    async fn recv(&self) -> Result<(Address, Vec<u8>), TransportError> {
        self.inbox.lock().await.recv().await.ok_or(TransportError::Closed)
    }
}
