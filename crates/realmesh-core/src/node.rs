//! Node lifecycle
//!
//! A `Node` owns the radio, the routing engine, and the persistent store,
//! and wires them together: radio receptions drive the routing engine,
//! routing-engine output drives radio sends. The node itself runs the state
//! machine (INITIALIZING, DISCOVERING, OPERATIONAL, NAME_CONFLICT, ERROR),
//! keeps the identity durable, and surfaces the public operations.
//!
//! Everything happens inside the owner's poll loop: call [`Node::tick`]
//! frequently with the current milliseconds-since-boot.

use crate::error::{MeshError, MeshResult};
use crate::packet::MessagePacket;
use crate::radio::{Radio, RadioConfig, RadioStats, ReceivedFrame};
use crate::router::{NetworkStats, Router};
use crate::storage::Storage;
use crate::types::{is_valid_name, MessagePriority, MessageType, NodeAddress, NodeStatus, NodeUuid};
use rand::Rng;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Persistent storage namespace
const NAMESPACE: &str = "rm";
const KEY_NODE_ID: &str = "node_id";
const KEY_SUBDOMAIN: &str = "subdomain";
const KEY_UUID: &str = "uuid";
const KEY_FIRST_BOOT: &str = "first_boot";
const KEY_BOOT_COUNT: &str = "boot_count";
const KEY_TOTAL_UPTIME: &str = "total_uptime";

/// Discovery runs this long before the node goes operational
pub const NETWORK_JOIN_TIMEOUT_MS: u64 = 30_000;

/// Presence broadcast cadence during discovery
const DISCOVERY_BROADCAST_MS: u64 = 10_000;

/// Quiet period after which a conflict candidate name is accepted
pub const NAME_TIMEOUT_MS: u64 = 30_000;

/// Periodic maintenance cadence
const MAINTENANCE_INTERVAL_MS: u64 = 60_000;

// A conflict suffix is `_` plus three digits; the base is clipped so the
// candidate still passes name validation.
const CONFLICT_BASE_MAX: usize = 16;

/// Node lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Initializing,
    Discovering,
    Operational,
    NameConflict,
    Error,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Initializing => "INITIALIZING",
            NodeState::Discovering => "DISCOVERING",
            NodeState::Operational => "OPERATIONAL",
            NodeState::NameConflict => "NAME_CONFLICT",
            NodeState::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Fires per delivered DATA message: `(from, text, timestamp)`
pub type MessageReceivedFn = Box<dyn FnMut(&str, &str, u32)>;

/// Fires on routing and state changes: `(event, detail)`
pub type NetworkEventFn = Box<dyn FnMut(&str, &str)>;

/// Fires on every state transition: `(old, new)`
pub type StateChangedFn = Box<dyn FnMut(NodeState, NodeState)>;

/// Startup options
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Node id to adopt when no identity is stored yet
    pub desired_node_id: Option<String>,
    /// Subdomain to adopt when no identity is stored yet
    pub desired_subdomain: Option<String>,
    /// Emit heartbeats automatically from `tick`
    pub auto_heartbeat: bool,
}

impl NodeConfig {
    pub fn with_identity(node_id: &str, subdomain: &str) -> Self {
        Self {
            desired_node_id: Some(node_id.to_string()),
            desired_subdomain: Some(subdomain.to_string()),
            auto_heartbeat: true,
        }
    }
}

/// Read-only snapshot for status surfaces
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub address: String,
    pub internal_address: String,
    pub uuid: String,
    pub state: String,
    pub stationary: bool,
    pub uptime_seconds: u32,
    pub boot_count: u32,
    pub decode_errors: u32,
}

/// A RealMesh node: identity, state machine, and the component wiring
pub struct Node {
    config: NodeConfig,
    storage: Box<dyn Storage>,
    radio: Rc<RefCell<Box<dyn Radio>>>,
    router: Router,
    state: NodeState,

    own: NodeAddress,
    base_node_id: String,
    boot_count: u32,
    started_at: u64,

    discovery_start: u64,
    last_discovery_broadcast: u64,
    last_maintenance: u64,
    conflict_active: bool,
    conflict_start: u64,
    factory_reset_pending: bool,
    decode_errors: u32,

    deliveries: Rc<RefCell<VecDeque<MessagePacket>>>,
    route_events: Rc<RefCell<VecDeque<String>>>,

    on_message: Option<MessageReceivedFn>,
    on_event: Option<NetworkEventFn>,
    on_state: Option<StateChangedFn>,
}

impl Node {
    pub fn new(radio: Box<dyn Radio>, storage: Box<dyn Storage>, config: NodeConfig) -> Self {
        Self {
            config,
            storage,
            radio: Rc::new(RefCell::new(radio)),
            router: Router::new(NodeAddress::default()),
            state: NodeState::Initializing,
            own: NodeAddress::default(),
            base_node_id: String::new(),
            boot_count: 0,
            started_at: 0,
            discovery_start: 0,
            last_discovery_broadcast: 0,
            last_maintenance: 0,
            conflict_active: false,
            conflict_start: 0,
            factory_reset_pending: false,
            decode_errors: 0,
            deliveries: Rc::new(RefCell::new(VecDeque::new())),
            route_events: Rc::new(RefCell::new(VecDeque::new())),
            on_message: None,
            on_event: None,
            on_state: None,
        }
    }

    /// Bring the node up: load or create the identity, wire the routing
    /// engine to the radio, and enter discovery.
    pub fn begin(&mut self, now: u64) -> MeshResult<()> {
        self.started_at = now;

        self.boot_count = self.storage.get_u32(NAMESPACE, KEY_BOOT_COUNT).unwrap_or(0) + 1;
        if let Err(err) = self.storage.put_u32(NAMESPACE, KEY_BOOT_COUNT, self.boot_count) {
            self.change_state(NodeState::Error);
            return Err(err.into());
        }

        if !self.load_stored_identity() {
            info!("no stored identity, creating one");
            if let Err(err) = self.create_identity(now) {
                self.change_state(NodeState::Error);
                return Err(err);
            }
        } else if let Err(err) = self.storage.commit() {
            // Boot counter update must land even on the load path
            self.change_state(NodeState::Error);
            return Err(err.into());
        }
        self.base_node_id = self.own.node_id.clone();

        info!(address = %self.own, uuid = %self.own.uuid, boot = self.boot_count, "node identity ready");

        self.router = Router::new(self.own.clone());
        let radio = Rc::clone(&self.radio);
        let deliveries = Rc::clone(&self.deliveries);
        let route_events = Rc::clone(&self.route_events);
        self.router.set_callbacks(
            Box::new(move |packet| {
                let bytes = packet.serialize();
                radio.borrow_mut().send(&bytes).is_ok()
            }),
            Box::new(move |packet| {
                deliveries.borrow_mut().push_back(packet.clone());
            }),
            Box::new(move |update| {
                route_events.borrow_mut().push_back(update.to_string());
            }),
        );
        self.router.begin(now);

        self.change_state(NodeState::Discovering);
        self.discovery_start = now;
        self.router.emit_heartbeat(now);
        self.last_discovery_broadcast = now;
        Ok(())
    }

    /// One iteration of the cooperative loop: drain the radio, run
    /// state-dependent work, fire pending application callbacks.
    pub fn tick(&mut self, now: u64) {
        if self.state == NodeState::Error {
            return;
        }

        loop {
            let frame = self.radio.borrow_mut().poll();
            let Some(frame) = frame else { break };
            self.handle_frame(frame, now);
        }

        match self.state {
            NodeState::NameConflict => self.handle_conflict_timeout(now),
            NodeState::Discovering => {
                self.handle_discovery(now);
                if self.config.auto_heartbeat {
                    self.router.send_heartbeat(now);
                }
            }
            NodeState::Operational => {
                if self.config.auto_heartbeat {
                    self.router.send_heartbeat(now);
                }
            }
            _ => {}
        }

        if now.saturating_sub(self.last_maintenance) >= MAINTENANCE_INTERVAL_MS {
            self.router.maintenance(now);
            self.last_maintenance = now;
        }

        self.drain_callbacks();
    }

    /// Persist accumulated uptime; call before power-down
    pub fn shutdown(&mut self, now: u64) {
        let total = self
            .storage
            .get_u32(NAMESPACE, KEY_TOTAL_UPTIME)
            .unwrap_or(0)
            + ((now.saturating_sub(self.started_at)) / 1000) as u32;
        let _ = self.storage.put_u32(NAMESPACE, KEY_TOTAL_UPTIME, total);
        if self.storage.commit().is_err() {
            warn!("could not persist uptime on shutdown");
        }
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Send a direct message to `nodeId@subdomain`
    pub fn send_message(&mut self, target: &str, text: &str, now: u64) -> MeshResult<()> {
        if self.state != NodeState::Operational {
            return Err(MeshError::NotOperational(self.state.to_string()));
        }
        let address = NodeAddress::parse(target)
            .ok_or_else(|| MeshError::InvalidAddress(target.to_string()))?;
        self.router
            .route_message(&address, text, MessagePriority::Direct, now)
    }

    /// Broadcast to every reachable node
    pub fn send_public_message(&mut self, text: &str, now: u64) -> MeshResult<()> {
        if self.state != NodeState::Operational {
            return Err(MeshError::NotOperational(self.state.to_string()));
        }
        self.router
            .route_message(&NodeAddress::broadcast(), text, MessagePriority::Public, now)
    }

    /// Emergency broadcast; allowed in every state except ERROR
    pub fn send_emergency_message(&mut self, text: &str, now: u64) -> MeshResult<()> {
        if self.state == NodeState::Error {
            return Err(MeshError::NotOperational(self.state.to_string()));
        }
        self.router.route_message(
            &NodeAddress::broadcast(),
            text,
            MessagePriority::Emergency,
            now,
        )
    }

    /// Switch between stationary-hub and mobile operation
    pub fn set_stationary(&mut self, stationary: bool, now: u64) {
        let status = if stationary {
            NodeStatus::Stationary
        } else {
            NodeStatus::Mobile
        };
        self.router.set_status(status, now);
        self.emit_event(
            "STATUS_CHANGE",
            if stationary { "STATIONARY" } else { "MOBILE" },
        );
    }

    /// Wipe the persisted identity; takes effect on the next boot
    pub fn factory_reset(&mut self) -> MeshResult<()> {
        self.storage.clear(NAMESPACE)?;
        self.storage.commit()?;
        self.factory_reset_pending = true;
        self.emit_event("FACTORY_RESET", "identity cleared, restart required");
        info!("factory reset complete, device will restart");
        Ok(())
    }

    pub fn known_nodes(&self) -> Vec<String> {
        self.router.known_nodes()
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.router.stats()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn own_address(&self) -> &NodeAddress {
        &self.own
    }

    pub fn is_stationary(&self) -> bool {
        self.router.status() == NodeStatus::Stationary
    }

    pub fn factory_reset_pending(&self) -> bool {
        self.factory_reset_pending
    }

    /// Turn automatic heartbeat emission on or off
    pub fn set_auto_heartbeat(&mut self, enabled: bool) {
        self.config.auto_heartbeat = enabled;
    }

    pub fn radio_config(&self) -> RadioConfig {
        self.radio.borrow().config().clone()
    }

    pub fn radio_stats(&self) -> RadioStats {
        self.radio.borrow().stats()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn node_info(&self, now: u64) -> NodeInfo {
        NodeInfo {
            address: self.own.full_address(),
            internal_address: self.own.internal_address(),
            uuid: self.own.uuid.to_string(),
            state: self.state.to_string(),
            stationary: self.is_stationary(),
            uptime_seconds: ((now.saturating_sub(self.started_at)) / 1000) as u32,
            boot_count: self.boot_count,
            decode_errors: self.decode_errors,
        }
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    pub fn on_message_received(&mut self, callback: MessageReceivedFn) {
        self.on_message = Some(callback);
    }

    pub fn on_network_event(&mut self, callback: NetworkEventFn) {
        self.on_event = Some(callback);
    }

    pub fn on_state_changed(&mut self, callback: StateChangedFn) {
        self.on_state = Some(callback);
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    fn load_stored_identity(&mut self) -> bool {
        let Some(node_id) = self.storage.get_string(NAMESPACE, KEY_NODE_ID) else {
            return false;
        };
        let Some(subdomain) = self.storage.get_string(NAMESPACE, KEY_SUBDOMAIN) else {
            return false;
        };
        let Some(uuid_bytes) = self.storage.get(NAMESPACE, KEY_UUID) else {
            return false;
        };
        let Ok(uuid_array) = <[u8; 8]>::try_from(uuid_bytes.as_slice()) else {
            return false;
        };

        let uuid = NodeUuid::from_bytes(uuid_array);
        if !is_valid_name(&node_id) || !is_valid_name(&subdomain) || uuid.is_zero() {
            warn!("stored identity is malformed, regenerating");
            return false;
        }

        self.own = NodeAddress::new(node_id, subdomain, uuid);
        info!(address = %self.own, "loaded stored identity");
        true
    }

    fn create_identity(&mut self, now: u64) -> MeshResult<()> {
        let mut rng = rand::thread_rng();
        let node_id = self
            .config
            .desired_node_id
            .clone()
            .unwrap_or_else(|| format!("node{}", rng.gen_range(0..9999u32)));
        let subdomain = self
            .config
            .desired_subdomain
            .clone()
            .unwrap_or_else(|| format!("mesh{}", rng.gen_range(0..99u32)));

        if !is_valid_name(&node_id) || !is_valid_name(&subdomain) {
            return Err(MeshError::InvalidAddress(format!(
                "{}@{}",
                node_id, subdomain
            )));
        }

        self.own = NodeAddress::new(node_id, subdomain, NodeUuid::random());
        self.store_identity(now)?;
        info!(address = %self.own, "created new identity");
        Ok(())
    }

    fn store_identity(&mut self, now: u64) -> MeshResult<()> {
        self.storage
            .put_string(NAMESPACE, KEY_NODE_ID, &self.own.node_id)?;
        self.storage
            .put_string(NAMESPACE, KEY_SUBDOMAIN, &self.own.subdomain)?;
        self.storage
            .put(NAMESPACE, KEY_UUID, self.own.uuid.as_bytes())?;
        if self.storage.get_u32(NAMESPACE, KEY_FIRST_BOOT).is_none() {
            self.storage
                .put_u32(NAMESPACE, KEY_FIRST_BOOT, (now / 1000) as u32)?;
        }
        self.storage.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    fn handle_frame(&mut self, frame: ReceivedFrame, now: u64) {
        let packet = match MessagePacket::deserialize(&frame.bytes) {
            Ok(packet) => packet,
            Err(err) => {
                // Counted and dropped; never reaches application callbacks
                self.decode_errors += 1;
                debug!(error = %err, bytes = frame.bytes.len(), "undecodable frame");
                return;
            }
        };

        // A peer challenged us: start (or restart) resolution. This check
        // runs first because in a mutual collision the challenger's own
        // source address matches ours too, and answering a challenge with a
        // counter-challenge would loop forever.
        if packet.header.message_type == MessageType::NameConflict
            && packet.destination.full_address() == self.own.full_address()
        {
            warn!(from = %packet.source.internal_address(), "name conflict reported against us");
            self.start_name_conflict(now);
            return;
        }

        // Somebody else is transmitting under our name: challenge them
        // before the router pollutes its tables with the impostor.
        if packet.source.full_address() == self.own.full_address()
            && packet.source.uuid != self.own.uuid
        {
            warn!(from = %packet.source.internal_address(), "address collision detected");
            self.router
                .announce_conflict(&packet.source, "duplicate node name", now);
            self.emit_event("NAME_COLLISION", &packet.source.internal_address());
            return;
        }

        self.router
            .handle_packet(&packet, frame.rssi_dbm, frame.snr_db, now);
    }

    /// Decode failures observed so far (malformed frames are dropped silently)
    pub fn decode_errors(&self) -> u32 {
        self.decode_errors
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    fn handle_discovery(&mut self, now: u64) {
        if now.saturating_sub(self.last_discovery_broadcast) >= DISCOVERY_BROADCAST_MS {
            self.router.emit_heartbeat(now);
            self.last_discovery_broadcast = now;
            debug!("presence broadcast");
        }

        if now.saturating_sub(self.discovery_start) >= NETWORK_JOIN_TIMEOUT_MS {
            info!("network discovery completed");
            self.change_state(NodeState::Operational);
        }
    }

    // ------------------------------------------------------------------
    // Name-conflict resolution
    // ------------------------------------------------------------------

    fn start_name_conflict(&mut self, now: u64) {
        let mut base = self.base_node_id.clone();
        base.truncate(CONFLICT_BASE_MAX);
        let candidate = format!("{}_{}", base, rand::thread_rng().gen_range(100..1000u32));

        info!(candidate = %candidate, "proposing new name");
        let mut renamed = self.own.clone();
        renamed.node_id = candidate;
        self.own = renamed.clone();
        self.router.set_own_address(renamed, now);

        self.conflict_active = true;
        self.conflict_start = now;
        self.change_state(NodeState::NameConflict);
        self.emit_event("NAME_CONFLICT", &self.own.full_address());
    }

    fn handle_conflict_timeout(&mut self, now: u64) {
        if !self.conflict_active {
            return;
        }
        if now.saturating_sub(self.conflict_start) < NAME_TIMEOUT_MS {
            return;
        }

        // Quiet window elapsed: the candidate sticks
        self.base_node_id = self.own.node_id.clone();
        self.conflict_active = false;
        if let Err(err) = self.store_identity(now) {
            warn!(error = %err, "could not persist renamed identity");
        }
        info!(address = %self.own, "new identity established");
        self.change_state(NodeState::Operational);
        self.emit_event("NAME_ACCEPTED", &self.own.full_address());
        self.router.emit_heartbeat(now);
    }

    // ------------------------------------------------------------------
    // State machine plumbing
    // ------------------------------------------------------------------

    fn change_state(&mut self, new_state: NodeState) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;
        info!(from = %old_state, to = %new_state, "state changed");

        if let Some(cb) = &mut self.on_state {
            cb(old_state, new_state);
        }
        match new_state {
            NodeState::Operational => self.emit_event("NODE_READY", "node is now operational"),
            NodeState::Error => self.emit_event("NODE_ERROR", "node entered error state"),
            _ => {}
        }
    }

    fn emit_event(&mut self, event: &str, detail: &str) {
        if let Some(cb) = &mut self.on_event {
            cb(event, detail);
        }
    }

    fn drain_callbacks(&mut self) {
        loop {
            let packet = self.deliveries.borrow_mut().pop_front();
            let Some(packet) = packet else { break };
            if let Some(cb) = &mut self.on_message {
                cb(
                    &packet.source.full_address(),
                    &packet.payload_text(),
                    packet.header.timestamp,
                );
            }
        }
        loop {
            let update = self.route_events.borrow_mut().pop_front();
            let Some(update) = update else { break };
            self.emit_event("ROUTE_UPDATE", &update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MessagePacket;
    use crate::radio::{RadioError, RadioStats};
    use crate::storage::MemoryStore;
    use crate::types::NodeUuid;

    /// Loopback-style radio for unit tests: captures sends, feeds a queue
    struct TestRadio {
        config: RadioConfig,
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
        inbox: Rc<RefCell<VecDeque<ReceivedFrame>>>,
        stats: RadioStats,
    }

    impl TestRadio {
        fn new() -> (Self, Rc<RefCell<Vec<Vec<u8>>>>, Rc<RefCell<VecDeque<ReceivedFrame>>>) {
            let sent = Rc::new(RefCell::new(Vec::new()));
            let inbox = Rc::new(RefCell::new(VecDeque::new()));
            (
                Self {
                    config: RadioConfig::default(),
                    sent: Rc::clone(&sent),
                    inbox: Rc::clone(&inbox),
                    stats: RadioStats::default(),
                },
                sent,
                inbox,
            )
        }
    }

    impl Radio for TestRadio {
        fn send(&mut self, bytes: &[u8]) -> Result<(), RadioError> {
            self.stats.messages_sent += 1;
            self.sent.borrow_mut().push(bytes.to_vec());
            Ok(())
        }

        fn poll(&mut self) -> Option<ReceivedFrame> {
            self.inbox.borrow_mut().pop_front()
        }

        fn config(&self) -> &RadioConfig {
            &self.config
        }

        fn set_config(&mut self, config: RadioConfig) -> Result<(), RadioError> {
            config.validate()?;
            self.config = config;
            Ok(())
        }

        fn stats(&self) -> RadioStats {
            self.stats
        }

        fn last_rssi(&self) -> f32 {
            -100.0
        }
    }

    fn started_node(node_id: &str, subdomain: &str) -> (Node, Rc<RefCell<Vec<Vec<u8>>>>, Rc<RefCell<VecDeque<ReceivedFrame>>>) {
        let (radio, sent, inbox) = TestRadio::new();
        let mut node = Node::new(
            Box::new(radio),
            Box::new(MemoryStore::new()),
            NodeConfig::with_identity(node_id, subdomain),
        );
        node.begin(0).unwrap();
        (node, sent, inbox)
    }

    fn inject(inbox: &Rc<RefCell<VecDeque<ReceivedFrame>>>, packet: &MessagePacket) {
        inbox.borrow_mut().push_back(ReceivedFrame {
            bytes: packet.serialize(),
            rssi_dbm: -70.0,
            snr_db: 8.0,
        });
    }

    #[test]
    fn test_begin_creates_identity() {
        let (node, sent, _) = started_node("alpha", "home");
        assert_eq!(node.own_address().full_address(), "alpha@home");
        assert!(!node.own_address().uuid.is_zero());
        assert_eq!(node.state(), NodeState::Discovering);
        // Initial presence heartbeat went out
        assert_eq!(sent.borrow().len(), 1);
    }

    use crate::storage::SharedStore;

    #[test]
    fn test_identity_survives_reboot() {
        let store = SharedStore::new();

        // First boot with desired names
        let uuid;
        {
            let (radio, _, _) = TestRadio::new();
            let mut node = Node::new(
                Box::new(radio),
                Box::new(store.clone()),
                NodeConfig::with_identity("alpha", "home"),
            );
            node.begin(0).unwrap();
            uuid = node.own_address().uuid;
            node.shutdown(5_000);
        }

        // Reboot with no desired names at all
        let (radio, _, _) = TestRadio::new();
        let mut node = Node::new(Box::new(radio), Box::new(store), NodeConfig::default());
        node.begin(0).unwrap();
        assert_eq!(node.own_address().full_address(), "alpha@home");
        assert_eq!(node.own_address().uuid, uuid);
        assert_eq!(node.boot_count, 2);
    }

    #[test]
    fn test_invalid_desired_identity_is_fatal() {
        let (radio, _, _) = TestRadio::new();
        let mut node = Node::new(
            Box::new(radio),
            Box::new(MemoryStore::new()),
            NodeConfig::with_identity("a", "home"), // too short
        );
        assert!(matches!(
            node.begin(0),
            Err(MeshError::InvalidAddress(_))
        ));
        assert_eq!(node.state(), NodeState::Error);
    }

    #[test]
    fn test_storage_failure_is_fatal() {
        let (radio, _, _) = TestRadio::new();
        let mut store = MemoryStore::new();
        store.fail_commits = true;
        let mut node = Node::new(
            Box::new(radio),
            Box::new(store),
            NodeConfig::with_identity("alpha", "home"),
        );
        assert!(matches!(node.begin(0), Err(MeshError::StorageFailed(_))));
        assert_eq!(node.state(), NodeState::Error);
    }

    #[test]
    fn test_discovery_completes_after_timeout() {
        let (mut node, _, _) = started_node("alpha", "home");
        node.tick(1_000);
        assert_eq!(node.state(), NodeState::Discovering);
        node.tick(NETWORK_JOIN_TIMEOUT_MS - 1);
        assert_eq!(node.state(), NodeState::Discovering);
        node.tick(NETWORK_JOIN_TIMEOUT_MS);
        assert_eq!(node.state(), NodeState::Operational);
    }

    #[test]
    fn test_send_gates_on_state() {
        let (mut node, _, _) = started_node("alpha", "home");

        // Still discovering
        assert!(matches!(
            node.send_message("beta@home", "hi", 1_000),
            Err(MeshError::NotOperational(_))
        ));
        assert!(matches!(
            node.send_public_message("hi", 1_000),
            Err(MeshError::NotOperational(_))
        ));
        // Emergency goes through anyway
        assert!(node.send_emergency_message("mayday", 1_000).is_ok());

        node.tick(NETWORK_JOIN_TIMEOUT_MS);
        assert!(node.send_public_message("hi", 31_000).is_ok());
    }

    #[test]
    fn test_send_rejects_bad_address() {
        let (mut node, _, _) = started_node("alpha", "home");
        node.tick(NETWORK_JOIN_TIMEOUT_MS);
        assert!(matches!(
            node.send_message("not-an-address", "hi", 31_000),
            Err(MeshError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_message_delivery_callback() {
        let (mut node, _, inbox) = started_node("alpha", "home");
        node.tick(NETWORK_JOIN_TIMEOUT_MS);

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_cb = Rc::clone(&received);
        node.on_message_received(Box::new(move |from, text, _ts| {
            received_cb.borrow_mut().push((from.to_string(), text.to_string()));
        }));

        let beta = NodeAddress::new("beta", "home", NodeUuid::from_bytes([0xB2; 8]));
        let packet = MessagePacket::data(
            &beta,
            node.own_address(),
            "hello alpha",
            MessagePriority::Direct,
            false,
            1,
            1,
        );
        inject(&inbox, &packet);
        node.tick(31_000);

        let received = received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], ("beta@home".to_string(), "hello alpha".to_string()));
    }

    #[test]
    fn test_undecodable_frame_counted_not_delivered() {
        let (mut node, _, inbox) = started_node("alpha", "home");
        node.tick(NETWORK_JOIN_TIMEOUT_MS);

        let fired = Rc::new(RefCell::new(0u32));
        let fired_cb = Rc::clone(&fired);
        node.on_message_received(Box::new(move |_, _, _| {
            *fired_cb.borrow_mut() += 1;
        }));

        inbox.borrow_mut().push_back(ReceivedFrame {
            bytes: vec![0xFF; 40],
            rssi_dbm: -70.0,
            snr_db: 8.0,
        });
        node.tick(31_000);

        assert_eq!(*fired.borrow(), 0);
        assert_eq!(node.decode_errors(), 1);
    }

    #[test]
    fn test_name_conflict_round_trip() {
        let (mut node, _, inbox) = started_node("node1", "mesh1");
        node.tick(NETWORK_JOIN_TIMEOUT_MS);

        let other = NodeAddress::new("node1", "mesh1", NodeUuid::from_bytes([0x99; 8]));
        let conflict = MessagePacket::name_conflict(
            &other,
            node.own_address(),
            "duplicate node name",
            1,
            1,
        );
        inject(&inbox, &conflict);
        node.tick(40_000);

        assert_eq!(node.state(), NodeState::NameConflict);
        let renamed = node.own_address().node_id.clone();
        assert_ne!(renamed, "node1");
        assert!(renamed.starts_with("node1_"));
        assert!(is_valid_name(&renamed));

        // Quiet window passes: candidate accepted and persisted
        node.tick(40_000 + NAME_TIMEOUT_MS);
        assert_eq!(node.state(), NodeState::Operational);
        assert_eq!(node.own_address().node_id, renamed);
        assert_eq!(
            node.storage.get_string(NAMESPACE, KEY_NODE_ID).as_deref(),
            Some(renamed.as_str())
        );
    }

    #[test]
    fn test_fresh_conflict_restarts_window() {
        let (mut node, _, inbox) = started_node("node1", "mesh1");
        node.tick(NETWORK_JOIN_TIMEOUT_MS);

        let other = NodeAddress::new("node1", "mesh1", NodeUuid::from_bytes([0x99; 8]));
        let conflict =
            MessagePacket::name_conflict(&other, node.own_address(), "duplicate", 1, 1);
        inject(&inbox, &conflict);
        node.tick(40_000);
        let first_candidate = node.own_address().node_id.clone();

        // A second challenge against the *candidate* name inside the window
        let conflict2 =
            MessagePacket::name_conflict(&other, node.own_address(), "duplicate", 2, 2);
        inject(&inbox, &conflict2);
        node.tick(50_000);
        assert_eq!(node.state(), NodeState::NameConflict);

        // The first window's deadline passes without acceptance
        node.tick(40_000 + NAME_TIMEOUT_MS);
        assert_eq!(node.state(), NodeState::NameConflict);

        // The restarted window expires later
        node.tick(50_000 + NAME_TIMEOUT_MS);
        assert_eq!(node.state(), NodeState::Operational);
        let _ = first_candidate;
    }

    #[test]
    fn test_collision_detection_challenges_impostor() {
        let (mut node, sent, inbox) = started_node("alpha", "home");
        node.tick(NETWORK_JOIN_TIMEOUT_MS);
        sent.borrow_mut().clear();

        // A heartbeat wearing our name with a different uuid
        let impostor = NodeAddress::new("alpha", "home", NodeUuid::from_bytes([0x99; 8]));
        let info = crate::packet::HeartbeatInfo {
            status: NodeStatus::Mobile,
            uptime: 1,
            contacts: 0,
            bridges: 0,
            sent: 0,
            recv: 0,
            avg_rssi: 0.0,
            load: 0,
        };
        let hb = MessagePacket::heartbeat(&impostor, &info, 1, 1);
        inject(&inbox, &hb);
        node.tick(31_000);

        let sent = sent.borrow();
        let challenge = sent
            .iter()
            .map(|bytes| MessagePacket::deserialize(bytes).unwrap())
            .find(|p| p.header.message_type == MessageType::NameConflict)
            .expect("conflict notice sent");
        assert_eq!(challenge.destination.full_address(), "alpha@home");
        assert_eq!(challenge.header.max_hops, 1);
        // Our own state is untouched; the impostor resolves
        assert_eq!(node.state(), NodeState::Operational);
    }

    #[test]
    fn test_factory_reset_clears_identity() {
        let (mut node, _, _) = started_node("alpha", "home");
        node.factory_reset().unwrap();
        assert!(node.factory_reset_pending());
        assert!(node.storage.get_string(NAMESPACE, KEY_NODE_ID).is_none());
    }

    #[test]
    fn test_stationary_toggle() {
        let (mut node, _, _) = started_node("alpha", "home");
        assert!(!node.is_stationary());
        node.set_stationary(true, 1_000);
        assert!(node.is_stationary());
        node.set_stationary(false, 2_000);
        assert!(!node.is_stationary());
    }
}
