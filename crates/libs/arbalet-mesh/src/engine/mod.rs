//! The protocol engine: six states driving discovery, addressing, color
//! delivery and sleep.
//!
//! Each [`Engine::tick`] consumes at most one record from the inbound
//! channel and may enqueue records on the outbound channel. Sending is not
//! the engine's business: every enqueue is reported to a [`Dispatch`],
//! which in the node runtime spawns a short-lived sender task.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::channel::ByteChannel;
use crate::config::{Cadence, NodeConfig};
use crate::display::ColorSink;
use crate::error::{MeshError, RouteError};
use crate::frame::{Address, AddressingKind, Frame, Rgb, SleepKind};
use crate::link::LinkState;
use crate::route_table::{RouteTable, Upsert};
use crate::sequence::SequenceGuard;
use crate::transport::MeshTransport;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Init,
    Conf,
    Addr,
    Color,
    Error,
    Sleep,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Conf => "CONF",
            Self::Addr => "ADDR",
            Self::Color => "COLOR",
            Self::Error => "ERROR",
            Self::Sleep => "SLEEP",
        };
        f.write_str(name)
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// State after the tick.
    pub state: NodeState,
    /// Records enqueued for transmission during the tick.
    pub enqueued: usize,
    /// Delay before the next tick.
    pub next_tick: Duration,
}

/// Snapshot of a node for concurrent readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub state: NodeState,
    pub asleep: bool,
    pub is_root: bool,
    pub members: usize,
    pub sequence: u16,
    pub link_connected: bool,
}

/// Notified once per record written to the outbound channel.
pub trait Dispatch: Send + Sync {
    fn enqueued(&self);
}

/// Channels and route table shared between the engine and the I/O tasks.
#[derive(Debug, Clone)]
pub struct SharedState {
    pub inbound: Arc<ByteChannel>,
    pub outbound: Arc<ByteChannel>,
    pub routes: Arc<RwLock<RouteTable>>,
}

impl SharedState {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            inbound: Arc::new(ByteChannel::new("inbound", config.inbound_capacity)),
            outbound: Arc::new(ByteChannel::new("outbound", config.outbound_capacity)),
            routes: Arc::new(RwLock::new(RouteTable::new(config.route_capacity))),
        }
    }

    /// Current member count, which sizes COLOR records.
    pub fn members(&self) -> usize {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct Engine {
    address: Address,
    cadence: Cadence,
    state: NodeState,
    asleep: bool,
    routes: Arc<RwLock<RouteTable>>,
    sequence: SequenceGuard,
    /// INSTALLs that arrived ahead of a lower slot, keyed by slot.
    deferred: BTreeMap<usize, Address>,
    inbound: Arc<ByteChannel>,
    outbound: Arc<ByteChannel>,
    mesh: Arc<dyn MeshTransport>,
    link: Arc<LinkState>,
    display: Arc<dyn ColorSink>,
    dispatch: Arc<dyn Dispatch>,
    enqueued: usize,
}

impl Engine {
    pub fn new(
        config: &NodeConfig,
        shared: SharedState,
        mesh: Arc<dyn MeshTransport>,
        link: Arc<LinkState>,
        display: Arc<dyn ColorSink>,
        dispatch: Arc<dyn Dispatch>,
    ) -> Self {
        Self {
            address: config.address,
            cadence: config.cadence,
            state: NodeState::Init,
            asleep: false,
            routes: shared.routes,
            sequence: SequenceGuard::new(),
            deferred: BTreeMap::new(),
            inbound: shared.inbound,
            outbound: shared.outbound,
            mesh,
            link,
            display,
            dispatch,
            enqueued: 0,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub fn inbound(&self) -> Arc<ByteChannel> {
        self.inbound.clone()
    }

    pub fn outbound(&self) -> Arc<ByteChannel> {
        self.outbound.clone()
    }

    pub fn routes(&self) -> Arc<RwLock<RouteTable>> {
        self.routes.clone()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            state: self.state,
            asleep: self.asleep,
            is_root: self.mesh.is_root(),
            members: self.read_routes().len(),
            sequence: self.sequence.current(),
            link_connected: self.link.is_connected(),
        }
    }

    fn read_routes(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.routes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_routes(&self) -> RwLockWriteGuard<'_, RouteTable> {
        self.routes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one step of the state machine.
    pub async fn tick(&mut self) -> Result<TickReport, MeshError> {
        self.enqueued = 0;
        let is_root = self.mesh.is_root();

        if self.state == NodeState::Init && is_root && !self.link.is_connected() {
            log::debug!("engine: waiting for the server link");
            self.link.request_connect();
            return Ok(self.report());
        }

        if self.state == NodeState::Error {
            self.recover();
            return Ok(self.report());
        }

        let record = self.inbound.try_read().unwrap_or_default();
        let received = if record.is_empty() {
            None
        } else {
            log::trace!("engine: << {}", hex::encode(&record));
            match Frame::decode(&record) {
                Ok(frame) => Some(frame),
                Err(err) => {
                    log::warn!("engine: dropping undecodable record: {}", err);
                    None
                }
            }
        };

        match self.state {
            NodeState::Init => self.on_init(is_root, received).await?,
            NodeState::Conf => {
                if let Some(frame) = received {
                    self.on_conf(frame, &record).await?;
                }
            }
            NodeState::Addr => {
                if let Some(frame) = received {
                    self.on_addr(is_root, frame).await?;
                }
            }
            NodeState::Color => {
                if let Some(frame) = received {
                    self.on_color(is_root, frame).await?;
                }
            }
            NodeState::Sleep => {
                if let Some(frame) = received {
                    self.on_sleep(is_root, frame).await?;
                }
            }
            NodeState::Error => {}
        }

        Ok(self.report())
    }

    /// Delay before the next tick in the current state.
    pub fn next_tick(&self) -> Duration {
        self.cadence.period(self.state)
    }

    fn report(&self) -> TickReport {
        TickReport { state: self.state, enqueued: self.enqueued, next_tick: self.next_tick() }
    }

    fn enter(&mut self, next: NodeState) {
        if self.state != next {
            log::info!("engine: {} -> {}", self.state, next);
        }
        self.state = next;
        match next {
            NodeState::Sleep => self.asleep = true,
            NodeState::Init if self.asleep => {
                self.asleep = false;
                self.sequence.reset();
            }
            _ => {}
        }
    }

    async fn on_init(&mut self, is_root: bool, received: Option<Frame>) -> Result<(), MeshError> {
        match received {
            Some(Frame::BeaconAck { target }) if !is_root && target == self.address => {
                self.enter(NodeState::Addr);
            }
            Some(Frame::Install { address, slot }) if is_root => {
                if slot != 0 {
                    log::debug!("engine: first INSTALL names slot {}, using slot 0", slot);
                }
                self.install(address, 0)?;
                self.enter(NodeState::Conf);
            }
            Some(frame) => {
                self.ignore(&frame);
                self.emit(&Frame::Beacon { sender: self.address }).await?;
            }
            None => self.emit(&Frame::Beacon { sender: self.address }).await?,
        }
        Ok(())
    }

    async fn on_conf(&mut self, frame: Frame, record: &[u8]) -> Result<(), MeshError> {
        match frame {
            Frame::Beacon { sender } => {
                log::debug!("engine: relaying BEACON from {}", sender);
                self.enqueue(record).await?;
            }
            Frame::Install { address, slot } => {
                if self.install(address, slot as usize)? && address != self.address {
                    self.emit(&Frame::BeaconAck { target: address }).await?;
                }
            }
            Frame::Addressing(AddressingKind::Init) => self.enter(NodeState::Addr),
            other => self.ignore(&other),
        }
        Ok(())
    }

    async fn on_addr(&mut self, is_root: bool, frame: Frame) -> Result<(), MeshError> {
        match frame {
            Frame::Install { address, slot } => {
                self.install(address, slot as usize)?;
                if is_root {
                    self.emit(&Frame::Install { address, slot }).await?;
                }
            }
            Frame::Addressing(AddressingKind::ColorDone) => {
                if is_root {
                    self.emit(&Frame::Addressing(AddressingKind::ColorDone)).await?;
                }
                self.enter(NodeState::Color);
            }
            other => self.on_colors(is_root, other).await?,
        }
        Ok(())
    }

    async fn on_color(&mut self, is_root: bool, frame: Frame) -> Result<(), MeshError> {
        match frame {
            Frame::Beacon { sender } if is_root => {
                log::warn!("engine: {} re-announced itself mid-session", sender);
                self.enter(NodeState::Error);
            }
            Frame::Sleep(SleepKind::ServerSleep) if is_root => {
                self.emit(&Frame::Sleep(SleepKind::MeshSleep)).await?;
                self.enter(NodeState::Sleep);
            }
            Frame::Sleep(SleepKind::MeshSleep) => self.enter(NodeState::Sleep),
            Frame::Addressing(AddressingKind::Resume) => {
                if is_root {
                    self.emit(&Frame::Addressing(AddressingKind::Resume)).await?;
                }
                self.enter(NodeState::Addr);
            }
            other => self.on_colors(is_root, other).await?,
        }
        Ok(())
    }

    async fn on_sleep(&mut self, is_root: bool, frame: Frame) -> Result<(), MeshError> {
        match frame {
            Frame::Sleep(SleepKind::WakeUp) => {
                if is_root {
                    self.emit(&Frame::Sleep(SleepKind::WakeUp)).await?;
                }
                self.enter(NodeState::Init);
            }
            other => self.ignore(&other),
        }
        Ok(())
    }

    /// COLOR and COLOR_ENTRY handling shared by ADDR and COLOR.
    async fn on_colors(&mut self, is_root: bool, frame: Frame) -> Result<(), MeshError> {
        match frame {
            Frame::Color { sequence, colors } if is_root => {
                if !self.sequence.accept(sequence) {
                    log::debug!("engine: stale COLOR {}", sequence);
                    return Ok(());
                }
                self.fan_out(sequence, &colors).await?;
            }
            Frame::ColorEntry { sequence, color, target } => {
                if target != self.address {
                    log::debug!("engine: COLOR_ENTRY for {} is not ours", target);
                } else if self.sequence.accept(sequence) {
                    self.display.show(color);
                } else {
                    log::debug!("engine: stale COLOR_ENTRY {}", sequence);
                }
            }
            other => self.ignore(&other),
        }
        Ok(())
    }

    async fn fan_out(&mut self, sequence: u16, colors: &[Rgb]) -> Result<(), MeshError> {
        let members: Vec<Address> = self.read_routes().addresses().collect();
        for (slot, target) in members.into_iter().enumerate() {
            let Some(&color) = colors.get(slot) else {
                log::warn!("engine: COLOR {} has no triplet for slot {}", sequence, slot);
                continue;
            };
            if target == self.address {
                self.display.show(color);
            } else {
                self.emit(&Frame::ColorEntry { sequence, color, target }).await?;
            }
        }
        Ok(())
    }

    fn recover(&mut self) {
        // TODO: ask the backend to replay the INSTALL map before resuming.
        log::warn!("engine: recovering from desynchronization");
        self.enter(NodeState::Color);
    }

    /// Returns whether the table now holds `address` at `slot`.
    ///
    /// An INSTALL past the next free slot is held back and applied once the
    /// slots below it are filled, since fan-out delivery is unordered.
    fn install(&mut self, address: Address, slot: usize) -> Result<bool, MeshError> {
        let outcome = self.write_routes().upsert(address, slot);
        match outcome {
            Ok(Upsert::Duplicate { .. }) => Ok(false),
            Ok(outcome) => {
                log::debug!("engine: installed {} at slot {} ({:?})", address, slot, outcome);
                self.install_deferred();
                Ok(true)
            }
            Err(RouteError::SlotGap { slot, size }) => {
                log::warn!(
                    "engine: holding INSTALL of {} at slot {} until slot {} is filled",
                    address,
                    slot,
                    size
                );
                self.deferred.retain(|_, held| *held != address);
                self.deferred.insert(slot, address);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn install_deferred(&mut self) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        while let Some(address) = self.deferred.remove(&routes.len()) {
            let slot = routes.len();
            match routes.upsert(address, slot) {
                Ok(outcome) => log::debug!(
                    "engine: installed held {} at slot {} ({:?})",
                    address,
                    slot,
                    outcome
                ),
                Err(err) => log::warn!("engine: dropping held INSTALL of {}: {}", address, err),
            }
        }
        // Slots below the table size were filled directly.
        self.deferred = self.deferred.split_off(&routes.len());
    }

    async fn emit(&mut self, frame: &Frame) -> Result<(), MeshError> {
        self.enqueue(&frame.encode()).await
    }

    async fn enqueue(&mut self, record: &[u8]) -> Result<(), MeshError> {
        log::trace!("engine: >> {}", hex::encode(record));
        self.outbound.write(record).await?;
        self.enqueued += 1;
        self.dispatch.enqueued();
        Ok(())
    }

    fn ignore(&self, frame: &Frame) {
        match frame {
            Frame::Error { sender } => log::warn!("engine: {} reported an error", sender),
            other => log::debug!("engine: ignoring {} in {}", other.frame_type(), self.state),
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("asleep", &self.asleep)
            .field("sequence", &self.sequence)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}
