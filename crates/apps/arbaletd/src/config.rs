use arbalet_mesh::{Address, NodeConfig};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
}

/// Backend endpoint, dialled while this node is root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "10.42.0.1".into(), port: 8080 }
    }
}

impl ServerConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// This node is the mesh root.
    #[serde(default)]
    pub root: bool,
    pub root_address: Option<Address>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self { bind: default_bind(), root: false, root_address: None, peers: Vec::new() }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7000))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerConfig {
    pub address: Address,
    pub endpoint: SocketAddr,
}

impl DaemonConfig {
    pub fn from_toml(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    /// Address of the mesh root, this node's own when `mesh.root` is set.
    pub fn root_address(&self) -> Option<Address> {
        if self.mesh.root {
            Some(self.node.address)
        } else {
            self.mesh.root_address
        }
    }

    pub fn is_root(&self) -> bool {
        self.root_address() == Some(self.node.address)
    }

    pub fn peer_endpoints(&self) -> Vec<(Address, SocketAddr)> {
        self.mesh.peers.iter().map(|peer| (peer.address, peer.endpoint)).collect()
    }
}
