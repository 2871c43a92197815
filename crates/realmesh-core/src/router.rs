//! Routing engine
//!
//! Owns all routing state and decides, for every packet, whether to deliver,
//! forward, or drop. Outbound messages go through a tiered strategy: a known
//! direct route first, then a stationary hub of the destination's subdomain,
//! then bounded flood. The engine holds no reference to its owner; it talks
//! upward through three supplied callbacks (send, deliver, route-changed)
//! and receives time as an explicit `now_ms` argument.

use crate::error::{MeshError, MeshResult};
use crate::packet::{HeartbeatInfo, MessagePacket, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use crate::radio::RadioError;
use crate::routing::{route_expiry_ms, BridgeMemory, RoutingTable, SubdomainMap};
use crate::types::{MessagePriority, MessageType, NodeAddress, NodeStatus, RoutingFlags};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Heartbeat interval while stationary
pub const HEARTBEAT_STATIONARY_MS: u64 = 15_000;

/// Heartbeat interval while mobile
pub const HEARTBEAT_MOBILE_MS: u64 = 30_000;

/// Accelerated heartbeat interval during the first minute after boot
pub const HEARTBEAT_ACCELERATED_MS: u64 = 3_000;

/// How long the accelerated discovery cadence lasts
const ACCELERATED_WINDOW_MS: u64 = 60_000;

/// How long a message id stays in the duplicate cache
const MESSAGE_MAX_AGE_MS: u64 = 600_000;

/// Duplicate cache size bound
const DEDUP_CACHE_SIZE: usize = 512;

/// Hands a packet to the radio; returns whether the radio accepted it
pub type SendPacketFn = Box<dyn FnMut(&MessagePacket) -> bool>;

/// Delivers a packet addressed to this node to the application layer
pub type DeliverFn = Box<dyn FnMut(&MessagePacket)>;

/// Notifies the owner of route and bridge changes
pub type RouteChangedFn = Box<dyn FnMut(&str)>;

/// Rolling network counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkStats {
    pub messages_sent: u32,
    pub messages_received: u32,
    pub messages_forwarded: u32,
    pub messages_dropped: u32,
    pub routing_table_size: u32,
    pub last_heartbeat: u64,
    /// Exponentially weighted average RSSI over received packets (dBm)
    pub avg_rssi: f32,
    /// Rough load estimate, 0-100
    pub network_load: u8,
}

/// Duplicate suppression keyed by `(source, message id)`
struct DedupCache {
    seen: HashMap<(String, u32), u64>,
}

impl DedupCache {
    fn new() -> Self {
        Self {
            seen: HashMap::new(),
        }
    }

    /// Returns `true` for a packet not seen before, recording it
    fn check_and_insert(&mut self, source: &str, message_id: u32, now: u64) -> bool {
        if self.seen.len() >= DEDUP_CACHE_SIZE {
            self.seen
                .retain(|_, &mut stamp| now.saturating_sub(stamp) < MESSAGE_MAX_AGE_MS);
        }
        let key = (source.to_string(), message_id);
        match self.seen.get(&key) {
            Some(&stamp) if now.saturating_sub(stamp) < MESSAGE_MAX_AGE_MS => false,
            _ => {
                self.seen.insert(key, now);
                true
            }
        }
    }
}

/// The routing engine
pub struct Router {
    own: NodeAddress,
    status: NodeStatus,
    table: RoutingTable,
    subdomains: SubdomainMap,
    bridges: BridgeMemory,
    dedup: DedupCache,
    stats: NetworkStats,
    last_heartbeat: u64,
    sequence: u16,
    window_messages: u32,
    send_cb: Option<SendPacketFn>,
    deliver_cb: Option<DeliverFn>,
    route_cb: Option<RouteChangedFn>,
}

impl Router {
    pub fn new(own: NodeAddress) -> Self {
        let table = RoutingTable::new(&own);
        Self {
            own,
            status: NodeStatus::Mobile,
            table,
            subdomains: SubdomainMap::new(),
            bridges: BridgeMemory::new(),
            dedup: DedupCache::new(),
            stats: NetworkStats::default(),
            last_heartbeat: 0,
            sequence: 0,
            window_messages: 0,
            send_cb: None,
            deliver_cb: None,
            route_cb: None,
        }
    }

    /// Initialize the local subdomain entry. Must run before packets flow.
    pub fn begin(&mut self, now: u64) {
        self.subdomains.ensure_local(&self.own, now);
        if self.status == NodeStatus::Stationary {
            self.subdomains.record_hub(&self.own, now);
        }
        debug!(node = %self.own, "routing engine started");
    }

    pub fn set_callbacks(
        &mut self,
        send: SendPacketFn,
        deliver: DeliverFn,
        route_changed: RouteChangedFn,
    ) {
        self.send_cb = Some(send);
        self.deliver_cb = Some(deliver);
        self.route_cb = Some(route_changed);
    }

    pub fn own_address(&self) -> &NodeAddress {
        &self.own
    }

    /// Adopt a new identity after a rename; routing state follows along
    pub fn set_own_address(&mut self, address: NodeAddress, now: u64) {
        let old = std::mem::replace(&mut self.own, address);
        self.table.set_own_key(&self.own);
        self.subdomains.replace_local(&old, &self.own, now);
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Change own status. Stationary nodes join their subdomain's hub list,
    /// everything else leaves it. Announces the change right away.
    pub fn set_status(&mut self, status: NodeStatus, now: u64) {
        if self.status == status {
            return;
        }
        debug!(old = ?self.status, new = ?status, "node status changed");
        self.status = status;
        if status == NodeStatus::Stationary {
            self.subdomains.record_hub(&self.own, now);
        } else {
            self.subdomains.remove_hub(&self.own);
        }
        self.emit_heartbeat(now);
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = self.stats.clone();
        stats.routing_table_size = self.table.len() as u32;
        stats
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn subdomains(&self) -> &SubdomainMap {
        &self.subdomains
    }

    pub fn bridges(&self) -> &BridgeMemory {
        &self.bridges
    }

    /// Display addresses of all destinations the table knows
    pub fn known_nodes(&self) -> Vec<String> {
        self.table.known_destinations()
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Process one inbound packet with its reception quality
    pub fn handle_packet(&mut self, packet: &MessagePacket, rssi: f32, _snr: f32, now: u64) {
        if !Self::is_valid_packet(packet) {
            warn!("dropping invalid packet");
            self.stats.messages_dropped += 1;
            return;
        }

        self.stats.messages_received += 1;
        self.window_messages += 1;
        self.stats.avg_rssi = self.stats.avg_rssi * 0.9 + rssi * 0.1;

        let own_key = self.own.full_address();
        let source_key = packet.source.full_address();

        // Our own transmission echoed back by a forwarder
        if source_key == own_key && packet.source.uuid == self.own.uuid {
            self.stats.messages_dropped += 1;
            return;
        }

        if !self
            .dedup
            .check_and_insert(&source_key, packet.header.message_id, now)
        {
            self.stats.messages_dropped += 1;
            return;
        }

        self.update_path_from_packet(packet, rssi, now);

        let unicast_for_us =
            !packet.destination.node_id.is_empty() && packet.destination.full_address() == own_key;
        let broadcast_for_us = packet.destination.is_broadcast()
            || (packet.destination.is_subdomain_broadcast()
                && packet.destination.subdomain == self.own.subdomain);

        if unicast_for_us || broadcast_for_us {
            self.dispatch_local(packet, rssi, unicast_for_us, now);
        }

        // Broadcasts still propagate after local delivery; unicast to us
        // terminates here.
        if !unicast_for_us {
            self.maybe_forward(packet, now);
        }
    }

    fn is_valid_packet(packet: &MessagePacket) -> bool {
        packet.source.is_valid()
            && packet.header.protocol_version == PROTOCOL_VERSION
            && (packet.header.payload_length as usize) <= MAX_PAYLOAD_SIZE
    }

    /// Learn what the packet's journey tells us about the topology
    fn update_path_from_packet(&mut self, packet: &MessagePacket, rssi: f32, now: u64) {
        if packet.header.hop_count == 0 {
            // Zero hops: the sender is in direct range
            let is_new = self.table.upsert(&packet.source, &packet.source, 1, now);
            self.table.update_quality(&packet.source, rssi, true, now);
            if is_new {
                self.notify_route(&format!("route added: {}", packet.source));
            }
        }
        // Transited packets carry only truncated tokens in their path
        // history; not enough to name the previous hop, so nothing is
        // learned from them yet.
    }

    fn dispatch_local(&mut self, packet: &MessagePacket, rssi: f32, unicast: bool, now: u64) {
        match packet.header.message_type {
            MessageType::Data => {
                // Single-hop acknowledgment, only for traffic aimed at us
                // alone; acking broadcasts would stampede the channel.
                if unicast {
                    let sequence = self.next_sequence();
                    let ack = MessagePacket::ack(
                        &self.own,
                        &packet.source,
                        packet.header.message_id,
                        Self::timestamp(now),
                        sequence,
                    );
                    self.transmit(&ack);
                }
                if let Some(deliver) = &mut self.deliver_cb {
                    deliver(packet);
                }
            }
            MessageType::Heartbeat => self.handle_heartbeat(packet, rssi, now),
            MessageType::Ack | MessageType::Nack => {
                // Confirms the path back to the source works
                self.table.update_quality(&packet.source, rssi, true, now);
            }
            MessageType::Control | MessageType::RouteRequest | MessageType::RouteReply => {
                // Table updates already happened on the way in; the
                // discovery round-trip for these types is not wired up.
                debug!(from = %packet.source, kind = ?packet.header.message_type, "control message");
            }
            MessageType::NameConflict => {
                // Resolution is the node layer's job; it inspects packets
                // before they reach the router.
                debug!(from = %packet.source, "name conflict notice");
            }
        }
    }

    fn handle_heartbeat(&mut self, packet: &MessagePacket, _rssi: f32, now: u64) {
        // A zero-hop heartbeat already installed the direct-neighbor route
        // on the way in. Relayed heartbeats teach us who exists and who the
        // hubs are, but not that the sender is reachable in one hop.
        self.subdomains.record_node(&packet.source, now);
        if let Some(info) = HeartbeatInfo::decode(&packet.payload) {
            if info.status == NodeStatus::Stationary {
                self.subdomains.record_hub(&packet.source, now);
            } else {
                self.subdomains.remove_hub(&packet.source);
            }
        }
    }

    // ------------------------------------------------------------------
    // Forwarding
    // ------------------------------------------------------------------

    fn maybe_forward(&mut self, packet: &MessagePacket, now: u64) {
        let own_token = self.own.uuid.token();
        if packet.header.path_history.contains(&own_token) {
            // We already carried this packet
            return;
        }
        if packet.header.hop_count >= packet.header.max_hops {
            return;
        }

        let flags = packet.header.routing_flags;

        // Stationary hubs complete subdomain-assisted delivery for their own
        // subdomain when they hold a route to the final destination.
        if flags.subdomain_retry()
            && self.status == NodeStatus::Stationary
            && packet.destination.subdomain == self.own.subdomain
            && self
                .table
                .lookup(&packet.destination, now, self.route_expiry())
                .is_some()
        {
            debug!(destination = %packet.destination, "acting as subdomain hub");
            if self.forward_copy(packet, now) {
                self.bridges
                    .record(&packet.source, &packet.destination, now);
                self.notify_route(&format!(
                    "bridge recorded: {} <-> {}",
                    packet.source, packet.destination
                ));
            }
            return;
        }

        if flags.flood() {
            self.forward_copy(packet, now);
        }
    }

    fn forward_copy(&mut self, packet: &MessagePacket, now: u64) -> bool {
        let mut copy = packet.clone();
        copy.header.hop_count += 1;
        Self::push_path_token(&mut copy, self.own.uuid.token());
        copy.header.seal();

        if self.transmit(&copy) {
            self.stats.messages_forwarded += 1;
            self.table.touch(&copy.destination, now);
            true
        } else {
            false
        }
    }

    fn push_path_token(packet: &mut MessagePacket, token: u8) {
        let history = &mut packet.header.path_history;
        for i in (1..history.len()).rev() {
            history[i] = history[i - 1];
        }
        history[0] = token;
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Route an outbound text message using the tiered strategy
    pub fn route_message(
        &mut self,
        destination: &NodeAddress,
        text: &str,
        priority: MessagePriority,
        now: u64,
    ) -> MeshResult<()> {
        let sequence = self.next_sequence();
        let base = MessagePacket::data(
            &self.own,
            destination,
            text,
            priority,
            false,
            Self::timestamp(now),
            sequence,
        );

        let always_flood = destination.is_broadcast()
            || destination.is_subdomain_broadcast()
            || matches!(
                priority,
                MessagePriority::Public | MessagePriority::Emergency
            );

        if !always_flood {
            // Tier 1: known direct route
            if self
                .table
                .lookup(destination, now, self.route_expiry())
                .is_some()
            {
                debug!(destination = %destination, "routing direct");
                if self.try_send(&base, RoutingFlags::DIRECT, false) {
                    self.table.touch(destination, now);
                    return Ok(());
                }
                let rssi = self.stats.avg_rssi;
                self.table.update_quality(destination, rssi, false, now);
            }

            // Tier 2: a stationary hub of the destination's subdomain
            if destination.subdomain != self.own.subdomain {
                for hub in self.subdomains.hubs(&destination.subdomain) {
                    if self.table.lookup(&hub, now, self.route_expiry()).is_some() {
                        debug!(destination = %destination, hub = %hub, "routing via subdomain hub");
                        if self.try_send(&base, RoutingFlags::SUBDOMAIN_RETRY, false) {
                            self.table.touch(&hub, now);
                            return Ok(());
                        }
                    }
                }
            }
        }

        // Tier 3: bounded flood
        debug!(destination = %destination, "routing by flood");
        if self.try_send(&base, RoutingFlags::FLOOD, true) {
            return Ok(());
        }
        Err(MeshError::RadioFailed(RadioError::TransmissionFailed))
    }

    /// Stamp a fresh copy with the given mode, record ourselves in the path
    /// history, and hand it to the radio.
    fn try_send(&mut self, base: &MessagePacket, mode: u8, reset_hops: bool) -> bool {
        let mut packet = base.clone();
        packet.header.routing_flags.set_mode(mode);
        if reset_hops {
            packet.header.hop_count = 0;
        }
        Self::push_path_token(&mut packet, self.own.uuid.token());
        packet.header.seal();

        if self.transmit(&packet) {
            self.stats.messages_sent += 1;
            self.window_messages += 1;
            true
        } else {
            false
        }
    }

    fn transmit(&mut self, packet: &MessagePacket) -> bool {
        match &mut self.send_cb {
            Some(send) => send(packet),
            None => false,
        }
    }

    /// Challenge a node transmitting under our name. Single hop; the
    /// offender was heard directly.
    pub fn announce_conflict(&mut self, conflicting: &NodeAddress, reason: &str, now: u64) -> bool {
        let sequence = self.next_sequence();
        let packet = MessagePacket::name_conflict(
            &self.own,
            conflicting,
            reason,
            Self::timestamp(now),
            sequence,
        );
        self.transmit(&packet)
    }

    // ------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------

    /// Emit a heartbeat if the cadence allows one. Every 3 s during the
    /// first minute after boot to speed discovery, then 15 s stationary /
    /// 30 s mobile.
    pub fn send_heartbeat(&mut self, now: u64) -> bool {
        let min_interval = if now < ACCELERATED_WINDOW_MS {
            HEARTBEAT_ACCELERATED_MS
        } else if self.status == NodeStatus::Stationary {
            HEARTBEAT_STATIONARY_MS
        } else {
            HEARTBEAT_MOBILE_MS
        };

        if self.last_heartbeat != 0 && now.saturating_sub(self.last_heartbeat) < min_interval {
            return false;
        }
        self.emit_heartbeat(now)
    }

    /// Emit a heartbeat immediately, ignoring the cadence
    pub fn emit_heartbeat(&mut self, now: u64) -> bool {
        let info = HeartbeatInfo {
            status: self.status,
            uptime: Self::timestamp(now),
            contacts: self.subdomains.node_count(&self.own.subdomain) as u32,
            bridges: self.bridges.bridged_subdomains(&self.own.subdomain).len() as u32,
            sent: self.stats.messages_sent,
            recv: self.stats.messages_received,
            avg_rssi: self.stats.avg_rssi,
            load: self.stats.network_load,
        };
        let sequence = self.next_sequence();
        let mut packet =
            MessagePacket::heartbeat(&self.own, &info, Self::timestamp(now), sequence);
        Self::push_path_token(&mut packet, self.own.uuid.token());
        packet.header.seal();

        if self.transmit(&packet) {
            // Clamp away from zero, which means "never sent". Heartbeats are
            // chatter, not traffic; they stay out of messages_sent.
            self.last_heartbeat = now.max(1);
            self.stats.last_heartbeat = now;
            debug!(status = ?self.status, contacts = info.contacts, bridges = info.bridges, "heartbeat sent");
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Periodic cleanup: expired routes out, stats refreshed
    pub fn maintenance(&mut self, now: u64) -> usize {
        let pruned = self.table.prune(now, self.route_expiry());
        if pruned > 0 {
            debug!(pruned, "expired routes removed");
        }
        self.stats.routing_table_size = self.table.len() as u32;
        self.stats.network_load = self.window_messages.min(100) as u8;
        self.window_messages = 0;
        pruned
    }

    fn route_expiry(&self) -> u64 {
        route_expiry_ms(self.status)
    }

    fn next_sequence(&mut self) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn timestamp(now: u64) -> u32 {
        (now / 1000) as u32
    }

    fn notify_route(&mut self, message: &str) {
        if let Some(cb) = &mut self.route_cb {
            cb(message);
        }
    }
}
