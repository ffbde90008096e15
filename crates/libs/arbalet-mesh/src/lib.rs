//! # arbalet-mesh
//!
//! Application protocol spoken by every controller of the Arbalet light
//! installation mesh. One node (the root) bridges the mesh to the backend
//! server over a TCP stream, every other node only talks to its mesh peers.
//!
//! The radio mesh itself (tree formation, parent election, hop-by-hop
//! delivery) is an external capability consumed through
//! [`MeshTransport`]. This crate owns what runs on top of it:
//!
//! - the binary frame format and its 7-bit parity [`integrity`] code
//! - two bounded byte [`channel`]s decoupling I/O from protocol processing
//! - the positional [`route_table`] handing out compact member slots
//! - the wraparound-tolerant [`sequence`] guard for color updates
//! - the six-state protocol [`engine`] and the [`node`] runtime driving it
//!
//! ## Wire Format
//!
//! ```text
//! [version:1][type:1][data:13][code:1]              fixed frames, 16 bytes
//! [version:1][type:1][seq:2][rgb:3 * members][code:1] COLOR, 3n + 5 bytes
//! ```
//!
//! ## Example
//!
//! ```rust
//! use arbalet_mesh::frame::{Address, Frame};
//! use arbalet_mesh::integrity;
//!
//! let sender: Address = "24:0a:c4:00:00:01".parse().unwrap();
//! let mut wire = Frame::Beacon { sender }.encode();
//! integrity::seal(&mut wire);
//! assert!(integrity::verify(&wire));
//! assert_eq!(Frame::decode(&wire).unwrap(), Frame::Beacon { sender });
//! ```

pub mod channel;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod frame;
pub mod iface;
pub mod integrity;
pub mod link;
pub mod node;
pub mod route_table;
pub mod sequence;
pub mod transport;

pub use config::{Cadence, NodeConfig};
pub use engine::{Engine, NodeState, TickReport};
pub use error::MeshError;
pub use frame::{Address, Frame, FrameType, Rgb};
pub use node::{Node, NodeHandle, NodeStatus};
pub use transport::{MeshTarget, MeshTransport, ServerLink, TransportError};

/// Protocol version carried in byte 0 of every frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of every frame except COLOR.
pub const FRAME_SIZE: usize = 16;
