//! Concrete transports.
//!
//! - [`tcp_link::TcpServerLink`] is the root's stream to the backend.
//! - [`udp_mesh::UdpMesh`] stands in for the radio mesh with a static peer map.
//! - [`loopback::LoopbackHub`] connects nodes inside one process.

pub mod loopback;
pub mod tcp_link;
pub mod udp_mesh;

pub use loopback::{LoopbackHub, LoopbackMesh};
pub use tcp_link::TcpServerLink;
pub use udp_mesh::UdpMesh;

/// Read buffer for a single stream read or datagram.
pub(crate) const BUFFER_SIZE: usize = 2048;
