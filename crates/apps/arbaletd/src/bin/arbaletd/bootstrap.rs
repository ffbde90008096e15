use anyhow::{bail, Context};
use arbalet_daemon::config::DaemonConfig;
use arbalet_mesh::iface::{TcpServerLink, UdpMesh};
use arbalet_mesh::{Address, Node};
use std::path::PathBuf;
use std::sync::Arc;

pub(super) async fn run(path: PathBuf, address: Option<Address>, root: bool) -> anyhow::Result<()> {
    let mut config = DaemonConfig::from_path(&path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    if let Some(address) = address {
        config.node.address = address;
    }
    if root {
        config.mesh.root = true;
    }
    let Some(root_address) = config.root_address() else {
        bail!("config {} names no mesh root: set mesh.root or mesh.root_address", path.display());
    };

    let mesh = UdpMesh::bind(
        config.mesh.bind,
        config.node.address,
        root_address,
        config.peer_endpoints(),
    )
    .await
    .context("failed to bind the mesh socket")?;

    let grace = config.node.shutdown_grace();
    let mut node = Node::new(config.node.clone(), Arc::new(mesh));
    if config.is_root() {
        let endpoint = config.server.endpoint();
        log::info!("[daemon] root node, backend at <{}>", endpoint);
        node = node.with_server_link(Arc::new(TcpServerLink::new(endpoint)));
    }
    let handle = node.spawn()?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            log::info!("[daemon] interrupted, shutting down");
        }
        _ = handle.stopped() => log::error!("[daemon] node stopped"),
    }
    handle.shutdown(grace).await?;
    Ok(())
}
