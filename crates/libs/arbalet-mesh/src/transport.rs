//! Boundary traits for the two external collaborators: the radio mesh and,
//! on the root only, the stream link to the backend server.

use async_trait::async_trait;

use crate::frame::Address;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("peer unreachable: {0}")]
    Unreachable(Address),
}

/// Destination of one mesh send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshTarget {
    /// The current mesh root, wherever it sits in the tree.
    Root,
    Node(Address),
}

#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Whether this node currently holds the root role.
    fn is_root(&self) -> bool;

    async fn send(&self, target: MeshTarget, frame: &[u8]) -> Result<(), TransportError>;

    /// Blocks until a datagram arrives.
    async fn recv(&self) -> Result<(Address, Vec<u8>), TransportError>;
}

#[async_trait]
pub trait ServerLink: Send + Sync {
    /// Open (or reopen) the stream to the backend.
    async fn connect(&self) -> Result<(), TransportError>;

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Next chunk of the byte stream. Chunks need not align with frames.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;
}
