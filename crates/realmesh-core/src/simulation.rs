//! Multi-node mesh simulation
//!
//! Runs whole `Node` instances against an in-memory airwave instead of
//! hardware, with an explicit link topology and per-link signal quality.
//! Time is a virtual millisecond clock stepped by the caller, so discovery
//! windows and conflict timeouts elapse instantly in tests.
//!
//! Frames transmitted during one step reach every linked peer's receive
//! queue at the end of that step and are processed on the next, which
//! approximates one frame of airtime per hop.
//!
//! ## Example
//!
//! ```ignore
//! let mut sim = MeshSimulator::new(SimConfig::default());
//! let a = sim.add_node("alpha", "home")?;
//! let b = sim.add_node("beta", "home")?;
//! sim.link(a, b);
//! sim.run_ms(31_000); // discovery completes
//! sim.send_message(a, "beta@home", "hi").unwrap();
//! sim.run_ms(1_000);
//! assert_eq!(sim.received(b)[0].1, "hi");
//! ```

use crate::error::MeshResult;
use crate::node::{Node, NodeConfig};
use crate::radio::{Radio, RadioConfig, RadioError, RadioStats, ReceivedFrame};
use crate::storage::SharedStore;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Virtual time per step
    pub step_ms: u64,
    /// Signal quality applied to links created with [`MeshSimulator::link`]
    pub default_rssi_dbm: f32,
    pub default_snr_db: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            step_ms: 100,
            default_rssi_dbm: -75.0,
            default_snr_db: 9.0,
        }
    }
}

/// Aggregate simulation counters
#[derive(Debug, Clone, Copy, Default)]
pub struct SimStats {
    /// Frames put on the air
    pub frames_transmitted: u64,
    /// Frame copies that reached a linked receiver
    pub frames_delivered: u64,
    /// Frames transmitted with no linked receiver in range
    pub frames_lost: u64,
}

type Outbox = Rc<RefCell<Vec<(usize, Vec<u8>)>>>;
type Inbox = Rc<RefCell<VecDeque<ReceivedFrame>>>;

/// Simulated transceiver: sends land in the shared airwave, receptions are
/// queued by the simulator
pub struct SimRadio {
    id: usize,
    config: RadioConfig,
    outbox: Outbox,
    inbox: Inbox,
    stats: RadioStats,
    last_rssi: f32,
}

impl SimRadio {
    fn new(id: usize, outbox: Outbox, inbox: Inbox) -> Self {
        Self {
            id,
            config: RadioConfig::default(),
            outbox,
            inbox,
            stats: RadioStats::default(),
            last_rssi: -120.0,
        }
    }

    /// A radio wired to nothing; sends vanish, nothing is received.
    /// Handy for single-node tests.
    pub fn standalone() -> Self {
        Self::new(
            0,
            Rc::new(RefCell::new(Vec::new())),
            Rc::new(RefCell::new(VecDeque::new())),
        )
    }
}

impl Radio for SimRadio {
    fn send(&mut self, bytes: &[u8]) -> Result<(), RadioError> {
        if bytes.len() > crate::packet::MAX_PACKET_SIZE {
            self.stats.transmit_errors += 1;
            return Err(RadioError::PacketTooLarge);
        }
        self.stats.messages_sent += 1;
        self.stats.bytes_transmitted += bytes.len() as u64;
        self.outbox.borrow_mut().push((self.id, bytes.to_vec()));
        Ok(())
    }

    fn poll(&mut self) -> Option<ReceivedFrame> {
        let frame = self.inbox.borrow_mut().pop_front()?;
        self.stats.messages_received += 1;
        self.stats.bytes_received += frame.bytes.len() as u64;
        self.last_rssi = frame.rssi_dbm;
        Some(frame)
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
        self.last_rssi
    }
}

struct SimNode {
    node: Node,
    inbox: Inbox,
    received: Rc<RefCell<Vec<(String, String, u32)>>>,
    store: SharedStore,
}

/// Multi-node mesh network simulator
pub struct MeshSimulator {
    config: SimConfig,
    nodes: Vec<SimNode>,
    outbox: Outbox,
    /// Link quality keyed by normalized node-index pair
    links: HashMap<(usize, usize), (f32, f32)>,
    clock: u64,
    stats: SimStats,
}

impl MeshSimulator {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            outbox: Rc::new(RefCell::new(Vec::new())),
            links: HashMap::new(),
            clock: 0,
            stats: SimStats::default(),
        }
    }

    /// Add a node with the given identity; it boots immediately at the
    /// current virtual time. Returns the node's index, or the boot error
    /// (an invalid identity, for instance).
    pub fn add_node(&mut self, node_id: &str, subdomain: &str) -> MeshResult<usize> {
        let id = self.nodes.len();
        let inbox: Inbox = Rc::new(RefCell::new(VecDeque::new()));
        let radio = SimRadio::new(id, Rc::clone(&self.outbox), Rc::clone(&inbox));
        let store = SharedStore::new();

        let mut node = Node::new(
            Box::new(radio),
            Box::new(store.clone()),
            NodeConfig::with_identity(node_id, subdomain),
        );

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_cb = Rc::clone(&received);
        node.on_message_received(Box::new(move |from, text, timestamp| {
            received_cb
                .borrow_mut()
                .push((from.to_string(), text.to_string(), timestamp));
        }));

        node.begin(self.clock)?;
        self.nodes.push(SimNode {
            node,
            inbox,
            received,
            store,
        });
        Ok(id)
    }

    /// Connect two nodes with the default signal quality
    pub fn link(&mut self, a: usize, b: usize) {
        self.link_with_quality(a, b, self.config.default_rssi_dbm, self.config.default_snr_db);
    }

    /// Connect two nodes with explicit RSSI/SNR
    pub fn link_with_quality(&mut self, a: usize, b: usize, rssi_dbm: f32, snr_db: f32) {
        self.links.insert(Self::link_key(a, b), (rssi_dbm, snr_db));
    }

    /// Cut the link between two nodes (node moved out of range)
    pub fn unlink(&mut self, a: usize, b: usize) {
        self.links.remove(&Self::link_key(a, b));
    }

    fn link_key(a: usize, b: usize) -> (usize, usize) {
        (a.min(b), a.max(b))
    }

    /// Advance one step: tick every node, then propagate the airwave
    pub fn step(&mut self) {
        self.clock += self.config.step_ms;
        let now = self.clock;

        for entry in &mut self.nodes {
            entry.node.tick(now);
        }

        let transmissions: Vec<(usize, Vec<u8>)> = self.outbox.borrow_mut().drain(..).collect();
        for (from, bytes) in transmissions {
            self.stats.frames_transmitted += 1;
            let mut heard = false;
            for to in 0..self.nodes.len() {
                if to == from {
                    continue;
                }
                if let Some(&(rssi_dbm, snr_db)) = self.links.get(&Self::link_key(from, to)) {
                    heard = true;
                    self.stats.frames_delivered += 1;
                    self.nodes[to].inbox.borrow_mut().push_back(ReceivedFrame {
                        bytes: bytes.clone(),
                        rssi_dbm,
                        snr_db,
                    });
                }
            }
            if !heard {
                self.stats.frames_lost += 1;
            }
        }
    }

    /// Run whole steps until at least `ms` of virtual time has passed
    pub fn run_ms(&mut self, ms: u64) {
        let steps = ms.div_ceil(self.config.step_ms);
        for _ in 0..steps {
            self.step();
        }
    }

    /// Send a direct message from one node at the current virtual time
    pub fn send_message(&mut self, from: usize, target: &str, text: &str) -> MeshResult<()> {
        let now = self.clock;
        self.nodes[from].node.send_message(target, text, now)
    }

    /// Broadcast a public message from one node
    pub fn send_public(&mut self, from: usize, text: &str) -> MeshResult<()> {
        let now = self.clock;
        self.nodes[from].node.send_public_message(text, now)
    }

    /// Messages delivered to one node's application layer
    pub fn received(&self, idx: usize) -> Vec<(String, String, u32)> {
        self.nodes[idx].received.borrow().clone()
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx].node
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.nodes[idx].node
    }

    /// The node's persistent store, for reboot scenarios
    pub fn store(&self, idx: usize) -> SharedStore {
        self.nodes[idx].store.clone()
    }

    pub fn now(&self) -> u64 {
        self.clock
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }
}
