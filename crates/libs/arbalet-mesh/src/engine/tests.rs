use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::frame::FrameType;
use crate::integrity;
use crate::transport::{MeshTarget, TransportError};

const ROOT: Address = Address::new([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01]);
const LEAF: Address = Address::new([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x02]);
const OTHER: Address = Address::new([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x03]);

struct FakeMesh {
    root: AtomicBool,
}

#[async_trait]
impl MeshTransport for FakeMesh {
    fn is_root(&self) -> bool {
        self.root.load(Ordering::Acquire)
    }

    async fn send(&self, _target: MeshTarget, _frame: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn recv(&self) -> Result<(Address, Vec<u8>), TransportError> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct RecordingSink {
    shown: Mutex<Vec<Rgb>>,
}

impl ColorSink for RecordingSink {
    fn show(&self, color: Rgb) {
        self.shown.lock().unwrap().push(color);
    }
}

#[derive(Default)]
struct CountingDispatch {
    count: AtomicUsize,
}

impl Dispatch for CountingDispatch {
    fn enqueued(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    engine: Engine,
    link: Arc<LinkState>,
    sink: Arc<RecordingSink>,
    dispatch: Arc<CountingDispatch>,
}

fn harness(address: Address, root: bool) -> Harness {
    let config = NodeConfig {
        route_capacity: 8,
        inbound_capacity: 1024,
        outbound_capacity: 1024,
        ..NodeConfig::new(address)
    };
    let mesh = Arc::new(FakeMesh { root: AtomicBool::new(root) });
    let link = Arc::new(LinkState::new());
    let sink = Arc::new(RecordingSink::default());
    let dispatch = Arc::new(CountingDispatch::default());
    let shared = SharedState::new(&config);
    let engine = Engine::new(&config, shared, mesh, link.clone(), sink.clone(), dispatch.clone());
    Harness { engine, link, sink, dispatch }
}

fn connected_root() -> Harness {
    let h = harness(ROOT, true);
    h.link.set_connected(true);
    h
}

impl Harness {
    fn at(mut self, state: NodeState) -> Self {
        self.engine.state = state;
        self
    }

    fn with_members(self, members: &[Address]) -> Self {
        {
            let routes = self.engine.routes();
            let mut routes = routes.write().unwrap();
            for (slot, address) in members.iter().enumerate() {
                routes.upsert(*address, slot).unwrap();
            }
        }
        self
    }

    async fn deliver(&self, frame: &Frame) {
        let mut wire = frame.encode();
        integrity::seal(&mut wire);
        self.engine.inbound().write(&wire).await.unwrap();
    }

    fn members(&self) -> Vec<Address> {
        self.engine.routes().read().unwrap().addresses().collect()
    }

    fn sent(&self) -> Vec<Frame> {
        let outbound = self.engine.outbound();
        std::iter::from_fn(|| outbound.try_read())
            .map(|record| Frame::decode(&record).unwrap())
            .collect()
    }

    fn shown(&self) -> Vec<Rgb> {
        self.sink.shown.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn leaf_in_init_beacons_to_the_mesh() {
    let mut h = harness(LEAF, false);
    let report = h.engine.tick().await.unwrap();

    assert_eq!(report.state, NodeState::Init);
    assert_eq!(report.enqueued, 1);
    assert_eq!(report.next_tick, Duration::from_secs(5));
    assert_eq!(h.sent(), vec![Frame::Beacon { sender: LEAF }]);
    assert_eq!(h.dispatch.count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unlinked_root_only_requests_a_connection() {
    let mut h = harness(ROOT, true);
    h.deliver(&Frame::Install { address: ROOT, slot: 0 }).await;

    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Init);
    assert_eq!(report.enqueued, 0);
    assert_eq!(h.engine.inbound().len(), 16, "inbound frame left untouched");

    tokio::time::timeout(Duration::from_millis(100), h.link.connect_requested())
        .await
        .expect("connect requested");
}

#[tokio::test]
async fn linked_root_in_init_beacons_to_the_server() {
    let mut h = connected_root();
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.enqueued, 1);
    assert_eq!(h.sent(), vec![Frame::Beacon { sender: ROOT }]);
}

#[tokio::test]
async fn root_install_in_init_lands_at_slot_zero() {
    let mut h = connected_root();
    h.deliver(&Frame::Install { address: LEAF, slot: 3 }).await;

    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Conf);
    assert_eq!(report.next_tick, Duration::from_millis(100));
    assert_eq!(h.members(), vec![LEAF]);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn leaf_ignores_install_in_init() {
    let mut h = harness(LEAF, false);
    h.deliver(&Frame::Install { address: LEAF, slot: 0 }).await;
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Init);
    assert!(h.members().is_empty());
    assert_eq!(h.sent(), vec![Frame::Beacon { sender: LEAF }]);
}

#[tokio::test]
async fn leaf_moves_to_addr_on_its_own_ack() {
    let mut h = harness(LEAF, false);
    h.deliver(&Frame::BeaconAck { target: OTHER }).await;
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Init);
    assert_eq!(h.sent(), vec![Frame::Beacon { sender: LEAF }], "beacon keeps its cadence");

    h.deliver(&Frame::BeaconAck { target: LEAF }).await;
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Addr);
}

#[tokio::test]
async fn conf_relays_beacons_verbatim() {
    let mut h = connected_root().at(NodeState::Conf).with_members(&[ROOT]);
    let mut wire = Frame::Beacon { sender: LEAF }.encode();
    wire[12] = 0x5a;
    integrity::seal(&mut wire);
    h.engine.inbound().write(&wire).await.unwrap();

    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.enqueued, 1);
    assert_eq!(h.engine.outbound().try_read(), Some(wire));
}

#[tokio::test]
async fn conf_install_acknowledges_the_member() {
    let mut h = connected_root().at(NodeState::Conf).with_members(&[ROOT]);

    h.deliver(&Frame::Install { address: LEAF, slot: 1 }).await;
    h.engine.tick().await.unwrap();
    assert_eq!(h.members(), vec![ROOT, LEAF]);
    assert_eq!(h.sent(), vec![Frame::BeaconAck { target: LEAF }]);

    h.deliver(&Frame::Install { address: ROOT, slot: 0 }).await;
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.enqueued, 0, "no ack to ourselves");

    h.deliver(&Frame::Addressing(AddressingKind::Init)).await;
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Addr);
}

#[tokio::test]
async fn install_past_capacity_is_fatal() {
    let mut h = connected_root().at(NodeState::Conf).with_members(&[ROOT]);
    h.deliver(&Frame::Install { address: LEAF, slot: 8 }).await;
    let err = h.engine.tick().await.unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn install_with_gap_waits_for_lower_slots() {
    let mut h = connected_root().at(NodeState::Conf).with_members(&[ROOT]);
    h.deliver(&Frame::Install { address: LEAF, slot: 2 }).await;
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.enqueued, 0);
    assert_eq!(h.members(), vec![ROOT]);

    h.deliver(&Frame::Install { address: OTHER, slot: 1 }).await;
    h.engine.tick().await.unwrap();
    assert_eq!(h.members(), vec![ROOT, OTHER, LEAF]);
    assert_eq!(h.sent(), vec![Frame::BeaconAck { target: OTHER }]);
}

#[tokio::test]
async fn root_rebroadcasts_installs_in_addr() {
    let mut h = connected_root().at(NodeState::Addr).with_members(&[ROOT]);
    h.deliver(&Frame::Install { address: LEAF, slot: 1 }).await;
    h.engine.tick().await.unwrap();
    assert_eq!(h.members(), vec![ROOT, LEAF]);
    assert_eq!(h.sent(), vec![Frame::Install { address: LEAF, slot: 1 }]);
}

#[tokio::test]
async fn leaf_converges_on_rebroadcast_installs() {
    let mut h = harness(LEAF, false).at(NodeState::Addr);
    h.deliver(&Frame::Install { address: ROOT, slot: 0 }).await;
    h.deliver(&Frame::Install { address: LEAF, slot: 1 }).await;
    h.engine.tick().await.unwrap();
    h.engine.tick().await.unwrap();
    assert_eq!(h.members(), vec![ROOT, LEAF]);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn leaf_converges_when_installs_arrive_out_of_order() {
    let mut h = harness(LEAF, false).at(NodeState::Addr);
    h.deliver(&Frame::Install { address: OTHER, slot: 2 }).await;
    h.deliver(&Frame::Install { address: LEAF, slot: 1 }).await;
    h.deliver(&Frame::Install { address: ROOT, slot: 0 }).await;

    h.engine.tick().await.unwrap();
    h.engine.tick().await.unwrap();
    assert!(h.members().is_empty());

    h.engine.tick().await.unwrap();
    assert_eq!(h.members(), vec![ROOT, LEAF, OTHER]);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn root_relays_every_valid_install() {
    let mut h = connected_root().at(NodeState::Addr).with_members(&[ROOT, LEAF]);
    h.deliver(&Frame::Install { address: OTHER, slot: 3 }).await;
    h.deliver(&Frame::Install { address: LEAF, slot: 2 }).await;
    h.deliver(&Frame::Install { address: LEAF, slot: 1 }).await;
    for _ in 0..3 {
        h.engine.tick().await.unwrap();
    }
    assert_eq!(
        h.sent(),
        vec![
            Frame::Install { address: OTHER, slot: 3 },
            Frame::Install { address: LEAF, slot: 2 },
            Frame::Install { address: LEAF, slot: 1 },
        ]
    );
    assert_eq!(h.members(), vec![ROOT, LEAF]);
}

#[tokio::test]
async fn color_queued_before_a_table_change_is_still_handled() {
    let mut h = connected_root().at(NodeState::Addr).with_members(&[ROOT]);
    h.deliver(&Frame::Install { address: LEAF, slot: 1 }).await;
    h.deliver(&Frame::Color { sequence: 5, colors: vec![Rgb::new(7, 7, 7)] }).await;
    h.deliver(&Frame::Install { address: OTHER, slot: 2 }).await;

    for _ in 0..3 {
        h.engine.tick().await.unwrap();
    }
    assert_eq!(h.members(), vec![ROOT, LEAF, OTHER]);
    assert_eq!(h.shown(), vec![Rgb::new(7, 7, 7)]);
    assert_eq!(h.engine.status().sequence, 5);
    assert_eq!(
        h.sent(),
        vec![
            Frame::Install { address: LEAF, slot: 1 },
            Frame::Install { address: OTHER, slot: 2 },
        ]
    );
    assert!(h.engine.inbound().is_empty());
}

#[tokio::test]
async fn color_fans_out_one_entry_per_member() {
    let mut h = connected_root().at(NodeState::Addr).with_members(&[LEAF, OTHER]);
    let colors = vec![Rgb::new(255, 0, 0), Rgb::new(0, 0, 255)];
    h.deliver(&Frame::Color { sequence: 10, colors: colors.clone() }).await;

    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.enqueued, 2);
    assert_eq!(
        h.sent(),
        vec![
            Frame::ColorEntry { sequence: 10, color: colors[0], target: LEAF },
            Frame::ColorEntry { sequence: 10, color: colors[1], target: OTHER },
        ]
    );
    assert!(h.shown().is_empty());
}

#[tokio::test]
async fn color_for_the_root_is_displayed_locally() {
    let mut h = connected_root().at(NodeState::Addr).with_members(&[ROOT, LEAF]);
    h.deliver(&Frame::Color { sequence: 10, colors: vec![Rgb::new(1, 2, 3), Rgb::new(4, 5, 6)] })
        .await;

    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.enqueued, 1);
    assert_eq!(
        h.sent(),
        vec![Frame::ColorEntry { sequence: 10, color: Rgb::new(4, 5, 6), target: LEAF }]
    );
    assert_eq!(h.shown(), vec![Rgb::new(1, 2, 3)]);
}

#[tokio::test]
async fn stale_color_is_not_fanned_out() {
    let mut h = connected_root().at(NodeState::Color).with_members(&[ROOT, LEAF]);
    let colors = vec![Rgb::new(1, 1, 1), Rgb::new(2, 2, 2)];
    h.deliver(&Frame::Color { sequence: 10, colors: colors.clone() }).await;
    h.deliver(&Frame::Color { sequence: 10, colors: colors.clone() }).await;
    h.deliver(&Frame::Color { sequence: 9, colors }).await;

    for _ in 0..3 {
        h.engine.tick().await.unwrap();
    }
    assert_eq!(h.sent().len(), 1);
    assert_eq!(h.shown().len(), 1);
    assert_eq!(h.engine.status().sequence, 10);
}

#[tokio::test]
async fn stale_color_entry_is_not_displayed() {
    let mut h = harness(LEAF, false).at(NodeState::Color).with_members(&[ROOT, LEAF]);
    h.deliver(&Frame::ColorEntry { sequence: 20, color: Rgb::new(9, 9, 9), target: LEAF }).await;
    h.deliver(&Frame::ColorEntry { sequence: 20, color: Rgb::new(1, 1, 1), target: LEAF }).await;
    h.deliver(&Frame::ColorEntry { sequence: 15, color: Rgb::new(2, 2, 2), target: LEAF }).await;
    h.deliver(&Frame::ColorEntry { sequence: 30, color: Rgb::new(3, 3, 3), target: OTHER }).await;

    for _ in 0..4 {
        h.engine.tick().await.unwrap();
    }
    assert_eq!(h.shown(), vec![Rgb::new(9, 9, 9)]);
    assert_eq!(h.engine.status().sequence, 20);
}

#[tokio::test]
async fn color_done_moves_everyone_to_color() {
    let mut root = connected_root().at(NodeState::Addr).with_members(&[ROOT, LEAF]);
    root.deliver(&Frame::Addressing(AddressingKind::ColorDone)).await;
    let report = root.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Color);
    assert_eq!(report.next_tick, Duration::from_millis(10));
    assert_eq!(root.sent(), vec![Frame::Addressing(AddressingKind::ColorDone)]);

    let mut leaf = harness(LEAF, false).at(NodeState::Addr);
    leaf.deliver(&Frame::Addressing(AddressingKind::ColorDone)).await;
    assert_eq!(leaf.engine.tick().await.unwrap().state, NodeState::Color);
    assert!(leaf.sent().is_empty());
}

#[tokio::test]
async fn server_sleep_is_relayed_and_members_fall_asleep() {
    let mut root = connected_root().at(NodeState::Color).with_members(&[ROOT, LEAF]);
    root.deliver(&Frame::Sleep(SleepKind::ServerSleep)).await;
    let report = root.engine.tick().await.unwrap();
    assert_eq!(root.sent(), vec![Frame::Sleep(SleepKind::MeshSleep)]);
    assert_eq!(report.state, NodeState::Sleep);

    let mut leaf = harness(LEAF, false).at(NodeState::Color);
    assert!(!leaf.engine.is_asleep());
    leaf.deliver(&Frame::Sleep(SleepKind::MeshSleep)).await;
    let report = leaf.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Sleep);
    assert_eq!(report.next_tick, Duration::from_secs(5));
    assert!(leaf.engine.is_asleep());
}

#[tokio::test]
async fn wake_up_restarts_discovery() {
    let mut root = connected_root().at(NodeState::Color).with_members(&[ROOT, LEAF]);
    root.deliver(&Frame::Sleep(SleepKind::ServerSleep)).await;
    root.engine.tick().await.unwrap();
    root.sent();

    root.deliver(&Frame::Color { sequence: 4, colors: vec![Rgb::default(); 2] }).await;
    root.engine.tick().await.unwrap();
    assert!(root.sent().is_empty(), "colors are ignored while asleep");

    root.deliver(&Frame::Sleep(SleepKind::WakeUp)).await;
    let report = root.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Init);
    assert!(!root.engine.is_asleep());
    assert_eq!(root.sent(), vec![Frame::Sleep(SleepKind::WakeUp)]);
}

#[tokio::test]
async fn mid_session_beacon_goes_through_error() {
    let mut h = connected_root().at(NodeState::Color).with_members(&[ROOT, LEAF]);
    h.deliver(&Frame::Beacon { sender: OTHER }).await;

    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Error);
    assert_eq!(report.next_tick, Duration::ZERO);

    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Color);
}

#[tokio::test]
async fn leaf_ignores_beacons_in_color() {
    let mut h = harness(LEAF, false).at(NodeState::Color);
    h.deliver(&Frame::Beacon { sender: OTHER }).await;
    assert_eq!(h.engine.tick().await.unwrap().state, NodeState::Color);
}

#[tokio::test]
async fn resume_returns_to_addressing() {
    let mut root = connected_root().at(NodeState::Color).with_members(&[ROOT, LEAF]);
    root.deliver(&Frame::Addressing(AddressingKind::Resume)).await;
    assert_eq!(root.engine.tick().await.unwrap().state, NodeState::Addr);
    assert_eq!(root.sent(), vec![Frame::Addressing(AddressingKind::Resume)]);

    let mut leaf = harness(LEAF, false).at(NodeState::Color);
    leaf.deliver(&Frame::Addressing(AddressingKind::Resume)).await;
    assert_eq!(leaf.engine.tick().await.unwrap().state, NodeState::Addr);
}

#[tokio::test]
async fn error_frames_carry_no_behaviour() {
    let mut h = connected_root().at(NodeState::Color).with_members(&[ROOT, LEAF]);
    h.deliver(&Frame::Error { sender: LEAF }).await;
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.state, NodeState::Color);
    assert_eq!(report.enqueued, 0);
}

#[tokio::test]
async fn status_reflects_engine() {
    let h = connected_root().at(NodeState::Color).with_members(&[ROOT, LEAF]);
    let status = h.engine.status();
    assert_eq!(status.state, NodeState::Color);
    assert!(status.is_root);
    assert!(status.link_connected);
    assert_eq!(status.members, 2);
    assert_eq!(FrameType::Color.to_string(), "COLOR");
}
