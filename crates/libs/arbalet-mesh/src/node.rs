//! Node runtime: the tasks around one [`Engine`].
//!
//! ```text
//!  mesh ──> mesh reader ──┐                      ┌──> sender ──> mesh / server
//!                         ├─> inbound ─> engine ─> outbound ──> sender ──> ...
//!  server ─> link task ───┘                      └──> sender ──> ...
//! ```
//!
//! Readers validate every record before it enters the inbound channel. Each
//! record the engine enqueues is transmitted by its own short-lived sender
//! task, tracked so shutdown can wait for in-flight sends.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::NodeConfig;
use crate::display::{ColorSink, LogSink};
use crate::engine::{Dispatch, Engine, SharedState};
use crate::error::MeshError;
use crate::frame::{self, Address, FrameAssembler, FrameType};
use crate::integrity;
use crate::link::LinkState;
use crate::transport::{MeshTarget, MeshTransport, ServerLink, TransportError};

pub use crate::engine::NodeStatus;

/// Where one outbound record goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Server,
    Mesh(MeshTarget),
    /// Every route table member except this node.
    FanOut,
    Discard,
}

/// Destination of `record` as sent by a node that is (or is not) root.
pub fn route(is_root: bool, record: &[u8]) -> Route {
    let Some(&type_byte) = record.get(frame::TYPE_OFFSET) else {
        return Route::Discard;
    };
    match FrameType::from_byte(type_byte) {
        Ok(FrameType::Beacon) if is_root => Route::Server,
        Ok(FrameType::Beacon) => Route::Mesh(MeshTarget::Root),
        Ok(FrameType::BeaconAck | FrameType::ColorEntry) => {
            match frame::extract_sender_address(record) {
                Some(target) => Route::Mesh(MeshTarget::Node(target)),
                None => Route::Discard,
            }
        }
        Ok(_) => Route::FanOut,
        Err(_) => Route::Discard,
    }
}

pub struct Node {
    config: NodeConfig,
    mesh: Arc<dyn MeshTransport>,
    server: Option<Arc<dyn ServerLink>>,
    display: Arc<dyn ColorSink>,
}

impl Node {
    pub fn new(config: NodeConfig, mesh: Arc<dyn MeshTransport>) -> Self {
        Self { config, mesh, server: None, display: Arc::new(LogSink) }
    }

    /// The backend link, used while this node is root.
    pub fn with_server_link(mut self, server: Arc<dyn ServerLink>) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_display(mut self, display: Arc<dyn ColorSink>) -> Self {
        self.display = display;
        self
    }

    /// Start every task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> Result<NodeHandle, MeshError> {
        self.config.validate()?;

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        let senders = TaskTracker::new();
        let shared = SharedState::new(&self.config);
        let link = Arc::new(LinkState::new());

        let pool = Arc::new(SenderPool {
            tracker: senders.clone(),
            shared: shared.clone(),
            address: self.config.address,
            mesh: self.mesh.clone(),
            server: self.server.clone(),
        });
        let engine = Engine::new(
            &self.config,
            shared.clone(),
            self.mesh.clone(),
            link.clone(),
            self.display.clone(),
            pool,
        );
        let (status_tx, status_rx) = watch::channel(engine.status());

        log::info!(
            "node: starting {} ({} member slots)",
            self.config.address,
            self.config.route_capacity
        );

        tasks.spawn(read_mesh(self.mesh.clone(), shared.clone(), cancel.clone()));
        if let Some(server) = self.server.clone() {
            tasks.spawn(supervise_link(
                server,
                link.clone(),
                shared.clone(),
                self.config.reconnect_delay(),
                cancel.clone(),
            ));
        }
        let engine_task = tasks.spawn(run_engine(
            engine,
            self.config.startup_delay(),
            status_tx,
            cancel.clone(),
        ));
        tasks.close();

        Ok(NodeHandle {
            address: self.config.address,
            cancel,
            tasks,
            senders,
            status: status_rx,
            engine: engine_task,
        })
    }
}

pub struct NodeHandle {
    address: Address,
    cancel: CancellationToken,
    tasks: TaskTracker,
    senders: TaskTracker,
    status: watch::Receiver<NodeStatus>,
    engine: JoinHandle<Result<(), MeshError>>,
}

impl NodeHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status.clone()
    }

    /// Resolves once the node stops, either cancelled or on a fatal fault.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await;
    }

    /// Stop every loop and wait up to `grace` for in-flight sends.
    ///
    /// Returns the engine's fatal fault, if it stopped on one.
    pub async fn shutdown(self, grace: Duration) -> Result<(), MeshError> {
        self.cancel.cancel();
        self.senders.close();
        let deadline = tokio::time::Instant::now() + grace;

        let result = match tokio::time::timeout_at(deadline, self.engine).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                log::error!("node: engine task failed: {}", err);
                Ok(())
            }
            Err(_) => {
                log::warn!("node: engine did not stop within {:?}", grace);
                Ok(())
            }
        };

        let drained = tokio::time::timeout_at(deadline, async {
            self.tasks.wait().await;
            self.senders.wait().await;
        })
        .await;
        if drained.is_err() {
            log::warn!("node: abandoning {} in-flight sends", self.senders.len());
        }
        result
    }
}

async fn run_engine(
    mut engine: Engine,
    startup_delay: Duration,
    status: watch::Sender<NodeStatus>,
    cancel: CancellationToken,
) -> Result<(), MeshError> {
    tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        _ = tokio::time::sleep(startup_delay) => {}
    }

    let mut was_root = engine.status().is_root;
    log::info!("node: engine running as {}", if was_root { "root" } else { "leaf" });

    loop {
        let next_tick = tokio::select! {
            _ = cancel.cancelled() => break,
            result = engine.tick() => match result {
                Ok(report) => report.next_tick,
                Err(err) if err.is_retryable() => {
                    log::warn!("node: tick failed: {}", err);
                    engine.next_tick()
                }
                Err(err) => {
                    log::error!("node: fatal fault, stopping: {}", err);
                    cancel.cancel();
                    return Err(err);
                }
            },
        };

        let snapshot = engine.status();
        if snapshot.is_root != was_root {
            log::info!("node: role changed to {}", if snapshot.is_root { "root" } else { "leaf" });
            was_root = snapshot.is_root;
        }
        status.send_if_modified(|current| {
            let changed = *current != snapshot;
            *current = snapshot;
            changed
        });

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(next_tick) => {}
        }
    }
    log::debug!("node: engine loop stopped");
    Ok(())
}

/// Gate a received record and queue it for the engine.
async fn admit(shared: &SharedState, source: &str, record: &[u8]) {
    match frame::validate(record, shared.members()) {
        Ok(kind) => {
            log::trace!("node: {} << {} {}", source, kind, hex::encode(record));
            if let Err(err) = shared.inbound.write(record).await {
                log::warn!("node: dropping {} record: {}", source, err);
            }
        }
        Err(err) => log::warn!("node: dropping {} record: {}", source, err),
    }
}

async fn read_mesh(mesh: Arc<dyn MeshTransport>, shared: SharedState, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = mesh.recv() => match received {
                Ok((from, record)) => {
                    log::debug!("node: {} bytes from {}", record.len(), from);
                    admit(&shared, "mesh", &record).await;
                }
                Err(TransportError::Closed) => {
                    log::warn!("node: mesh transport closed");
                    break;
                }
                Err(err) => log::warn!("node: mesh receive failed: {}", err),
            },
        }
    }
}

/// Connects on the engine's first request, then keeps the link up.
async fn supervise_link(
    server: Arc<dyn ServerLink>,
    link: Arc<LinkState>,
    shared: SharedState,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = link.connect_requested() => {}
    }

    loop {
        match server.connect().await {
            Ok(()) => {
                link.set_connected(true);
                if let Err(err) = read_server(server.as_ref(), &shared, &cancel).await {
                    log::warn!("node: server link lost: {}", err);
                }
                link.set_connected(false);
                if cancel.is_cancelled() {
                    return;
                }
            }
            Err(err) => log::info!("node: couldn't connect to server: {}", err),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
}

async fn read_server(
    server: &dyn ServerLink,
    shared: &SharedState,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let mut assembler = FrameAssembler::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = server.recv() => chunk?,
        };
        assembler.push(&chunk);
        while let Some(record) = assembler.next_frame(shared.members()) {
            admit(shared, "server", &record).await;
        }
    }
}

struct SenderPool {
    tracker: TaskTracker,
    shared: SharedState,
    address: Address,
    mesh: Arc<dyn MeshTransport>,
    server: Option<Arc<dyn ServerLink>>,
}

impl Dispatch for SenderPool {
    fn enqueued(&self) {
        let shared = self.shared.clone();
        let address = self.address;
        let mesh = self.mesh.clone();
        let server = self.server.clone();
        self.tracker.spawn(async move {
            send_one(shared, address, mesh, server).await;
        });
    }
}

async fn send_one(
    shared: SharedState,
    address: Address,
    mesh: Arc<dyn MeshTransport>,
    server: Option<Arc<dyn ServerLink>>,
) {
    let Some(mut record) = shared.outbound.try_read() else {
        log::debug!("node: sender found the outbound channel empty");
        return;
    };
    integrity::seal(&mut record);

    match route(mesh.is_root(), &record) {
        Route::Server => match server {
            Some(server) => {
                if let Err(err) = server.send(&record).await {
                    log::warn!("node: server send failed: {}", err);
                }
            }
            None => log::warn!("node: no server link, dropping {} bytes", record.len()),
        },
        Route::Mesh(target) => {
            if let Err(err) = mesh.send(target, &record).await {
                log::warn!("node: mesh send to {:?} failed: {}", target, err);
            }
        }
        Route::FanOut => {
            let members: Vec<Address> = shared
                .routes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .addresses()
                .filter(|member| *member != address)
                .collect();
            for member in members {
                if let Err(err) = mesh.send(MeshTarget::Node(member), &record).await {
                    log::warn!("node: mesh send to {} failed: {}", member, err);
                }
            }
        }
        Route::Discard => log::warn!("node: no route for outbound record"),
    }
}
