//! Routing state: route table, subdomain map, bridge memory
//!
//! Three bounded containers back the routing engine. The route table maps
//! display addresses to next hops with a reliability score; the subdomain map
//! tracks which nodes and stationary hubs belong to each named subdomain; the
//! bridge memory remembers node pairs this node has bridged across
//! subdomains.

use crate::types::{NodeAddress, NodeStatus};
use std::collections::HashMap;
use tracing::debug;

/// Route table capacity
pub const MAX_ROUTING_ENTRIES: usize = 1000;

/// Known-node cap per subdomain
pub const MAX_SUBDOMAIN_NODES: usize = 200;

/// Bridge memory capacity
pub const MAX_INTERMEDIARY_MEMORY: usize = 500;

/// Routes below this reliability are removed
pub const MIN_RELIABILITY: u8 = 20;

/// Idle expiry for routes owned by a mobile node (1 hour)
pub const ROUTE_EXPIRE_MOBILE_MS: u64 = 3_600_000;

/// Idle expiry for routes owned by a stationary node (24 hours)
pub const ROUTE_EXPIRE_STATIONARY_MS: u64 = 86_400_000;

/// Idle expiry for the given owner status
pub fn route_expiry_ms(status: NodeStatus) -> u64 {
    match status {
        NodeStatus::Stationary => ROUTE_EXPIRE_STATIONARY_MS,
        _ => ROUTE_EXPIRE_MOBILE_MS,
    }
}

/// A route to a destination node
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub destination: NodeAddress,
    pub next_hop: NodeAddress,
    /// Defined in the data model; no failover policy selects one yet
    pub backup_hop: Option<NodeAddress>,
    /// Last successful use (ms since boot)
    pub last_used: u64,
    pub hop_count: u8,
    /// RSSI of the last reception over this route (dBm)
    pub signal_strength: f32,
    /// Success score, 0-100
    pub reliability: u8,
    pub valid: bool,
}

impl RoutingEntry {
    fn is_expired(&self, now: u64, expiry_ms: u64) -> bool {
        now.saturating_sub(self.last_used) > expiry_ms
    }

    fn is_usable(&self, now: u64, expiry_ms: u64) -> bool {
        self.valid && self.reliability >= MIN_RELIABILITY && !self.is_expired(now, expiry_ms)
    }
}

/// Route table keyed by destination display address
///
/// Never holds an entry for the owning node itself. Eviction is LRU by
/// `last_used` once the table is full.
#[derive(Debug)]
pub struct RoutingTable {
    own_key: String,
    entries: HashMap<String, RoutingEntry>,
    max_entries: usize,
}

impl RoutingTable {
    pub fn new(own_address: &NodeAddress) -> Self {
        Self {
            own_key: own_address.full_address(),
            entries: HashMap::new(),
            max_entries: MAX_ROUTING_ENTRIES,
        }
    }

    /// The owning node was renamed; drop any entry that now points at it
    pub fn set_own_key(&mut self, own_address: &NodeAddress) {
        self.own_key = own_address.full_address();
        self.entries.remove(&self.own_key);
    }

    /// Install or refresh a route. Returns `true` when the destination was
    /// not known before. Routes to the owning node are ignored.
    pub fn upsert(
        &mut self,
        destination: &NodeAddress,
        next_hop: &NodeAddress,
        hop_count: u8,
        now: u64,
    ) -> bool {
        let key = destination.full_address();
        if key == self.own_key {
            return false;
        }

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.destination = destination.clone();
            entry.next_hop = next_hop.clone();
            entry.hop_count = hop_count;
            entry.last_used = now;
            entry.valid = true;
            return false;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            RoutingEntry {
                destination: destination.clone(),
                next_hop: next_hop.clone(),
                backup_hop: None,
                last_used: now,
                hop_count,
                signal_strength: 0.0,
                reliability: 100,
                valid: true,
            },
        );
        true
    }

    /// Usable route to a destination, if any
    pub fn lookup(&self, destination: &NodeAddress, now: u64, expiry_ms: u64) -> Option<&RoutingEntry> {
        self.entries
            .get(&destination.full_address())
            .filter(|e| e.is_usable(now, expiry_ms))
    }

    /// Same as [`lookup`](Self::lookup) but by display-address key
    pub fn lookup_key(&self, key: &str, now: u64, expiry_ms: u64) -> Option<&RoutingEntry> {
        self.entries.get(key).filter(|e| e.is_usable(now, expiry_ms))
    }

    /// Mark a route as just used
    pub fn touch(&mut self, destination: &NodeAddress, now: u64) {
        if let Some(entry) = self.entries.get_mut(&destination.full_address()) {
            entry.last_used = now;
        }
    }

    /// Apply a delivery outcome to a route's reliability score.
    /// Returns `true` when the route dropped below the floor and was removed.
    pub fn update_quality(
        &mut self,
        destination: &NodeAddress,
        rssi: f32,
        success: bool,
        now: u64,
    ) -> bool {
        let key = destination.full_address();
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        entry.last_used = now;
        entry.signal_strength = rssi;
        if success {
            entry.reliability = entry.reliability.saturating_add(5).min(100);
        } else {
            entry.reliability = entry.reliability.saturating_sub(20);
        }
        if entry.reliability < MIN_RELIABILITY {
            debug!(destination = %key, "route reliability too low, removing");
            self.entries.remove(&key);
            return true;
        }
        false
    }

    pub fn remove(&mut self, destination: &NodeAddress) -> bool {
        self.entries.remove(&destination.full_address()).is_some()
    }

    /// Drop expired and unreliable entries, returning how many went away
    pub fn prune(&mut self, now: u64, expiry_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.valid && e.reliability >= MIN_RELIABILITY && !e.is_expired(now, expiry_ms));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, destination: &NodeAddress) -> bool {
        self.entries.contains_key(&destination.full_address())
    }

    /// Display addresses of all known destinations
    pub fn known_destinations(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn entries(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.values()
    }

    fn evict_lru(&mut self) {
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest);
        }
    }
}

/// Everything known about one subdomain
#[derive(Debug, Clone)]
pub struct SubdomainInfo {
    pub name: String,
    pub nodes: Vec<NodeAddress>,
    pub stationary_hubs: Vec<NodeAddress>,
    pub last_updated: u64,
    pub is_local: bool,
}

impl SubdomainInfo {
    fn new(name: &str, now: u64) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            stationary_hubs: Vec::new(),
            last_updated: now,
            is_local: false,
        }
    }

    fn add_node(&mut self, address: &NodeAddress, now: u64) -> bool {
        self.last_updated = now;
        if self
            .nodes
            .iter()
            .any(|n| n.full_address() == address.full_address())
        {
            return true;
        }
        if self.nodes.len() >= MAX_SUBDOMAIN_NODES {
            return false;
        }
        self.nodes.push(address.clone());
        true
    }

    fn remove_node(&mut self, address: &NodeAddress) {
        self.nodes
            .retain(|n| n.full_address() != address.full_address());
    }

    fn add_hub(&mut self, address: &NodeAddress, now: u64) {
        self.last_updated = now;
        if !self
            .stationary_hubs
            .iter()
            .any(|h| h.full_address() == address.full_address())
        {
            self.stationary_hubs.push(address.clone());
        }
    }

    fn remove_hub(&mut self, address: &NodeAddress) {
        self.stationary_hubs
            .retain(|h| h.full_address() != address.full_address());
    }
}

/// Per-subdomain knowledge, keyed by subdomain name
#[derive(Debug, Default)]
pub struct SubdomainMap {
    map: HashMap<String, SubdomainInfo>,
}

impl SubdomainMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh the local subdomain entry; it always contains the
    /// owning node.
    pub fn ensure_local(&mut self, own: &NodeAddress, now: u64) {
        let info = self
            .map
            .entry(own.subdomain.clone())
            .or_insert_with(|| SubdomainInfo::new(&own.subdomain, now));
        info.is_local = true;
        info.add_node(own, now);
    }

    /// The owning node changed identity: move it between entries
    pub fn replace_local(&mut self, old: &NodeAddress, new: &NodeAddress, now: u64) {
        let was_hub = if let Some(info) = self.map.get_mut(&old.subdomain) {
            let was_hub = info
                .stationary_hubs
                .iter()
                .any(|h| h.full_address() == old.full_address());
            info.remove_node(old);
            info.remove_hub(old);
            if old.subdomain != new.subdomain {
                info.is_local = false;
            }
            was_hub
        } else {
            false
        };
        self.ensure_local(new, now);
        if was_hub {
            self.record_hub(new, now);
        }
    }

    /// Record that a node exists in its subdomain. Returns `false` when the
    /// subdomain is at capacity and the node was not retained.
    pub fn record_node(&mut self, address: &NodeAddress, now: u64) -> bool {
        let info = self
            .map
            .entry(address.subdomain.clone())
            .or_insert_with(|| SubdomainInfo::new(&address.subdomain, now));
        info.add_node(address, now)
    }

    /// Record a stationary hub for its subdomain
    pub fn record_hub(&mut self, address: &NodeAddress, now: u64) {
        let info = self
            .map
            .entry(address.subdomain.clone())
            .or_insert_with(|| SubdomainInfo::new(&address.subdomain, now));
        info.add_hub(address, now);
        info.add_node(address, now);
    }

    /// Drop a node from its subdomain's hub list
    pub fn remove_hub(&mut self, address: &NodeAddress) {
        if let Some(info) = self.map.get_mut(&address.subdomain) {
            info.remove_hub(address);
        }
    }

    /// Stationary hubs known for a subdomain
    pub fn hubs(&self, subdomain: &str) -> Vec<NodeAddress> {
        self.map
            .get(subdomain)
            .map(|info| info.stationary_hubs.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, subdomain: &str) -> Option<&SubdomainInfo> {
        self.map.get(subdomain)
    }

    /// Number of nodes known in a subdomain
    pub fn node_count(&self, subdomain: &str) -> usize {
        self.map.get(subdomain).map(|i| i.nodes.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubdomainInfo> {
        self.map.values()
    }
}

/// An observed bridging between two nodes, order-independent
#[derive(Debug, Clone)]
pub struct BridgeEntry {
    pub node_a: NodeAddress,
    pub node_b: NodeAddress,
    pub last_bridged: u64,
    pub bridge_count: u16,
    pub active: bool,
}

impl BridgeEntry {
    fn matches(&self, a: &NodeAddress, b: &NodeAddress) -> bool {
        let (ka, kb) = (a.full_address(), b.full_address());
        let (ea, eb) = (self.node_a.full_address(), self.node_b.full_address());
        (ea == ka && eb == kb) || (ea == kb && eb == ka)
    }
}

/// Bridging events this node has observed or provided
///
/// Entries never expire while active but are capped; on overflow the
/// oldest active entry is evicted.
#[derive(Debug, Default)]
pub struct BridgeMemory {
    entries: Vec<BridgeEntry>,
}

impl BridgeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bridging between two nodes
    pub fn record(&mut self, a: &NodeAddress, b: &NodeAddress, now: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.matches(a, b)) {
            entry.last_bridged = now;
            entry.bridge_count = entry.bridge_count.saturating_add(1);
            entry.active = true;
            return;
        }

        if self.entries.len() >= MAX_INTERMEDIARY_MEMORY {
            self.evict_oldest_active();
        }
        self.entries.push(BridgeEntry {
            node_a: a.clone(),
            node_b: b.clone(),
            last_bridged: now,
            bridge_count: 1,
            active: true,
        });
    }

    /// Remote subdomains this node has bridged toward, from the perspective
    /// of `own_subdomain`
    pub fn bridged_subdomains(&self, own_subdomain: &str) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.active) {
            if entry.node_a.subdomain == entry.node_b.subdomain {
                continue;
            }
            let remote = if entry.node_a.subdomain == own_subdomain {
                &entry.node_b.subdomain
            } else {
                &entry.node_a.subdomain
            };
            if !result.contains(remote) {
                result.push(remote.clone());
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BridgeEntry] {
        &self.entries
    }

    fn evict_oldest_active(&mut self) {
        if let Some(idx) = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.active)
            .min_by_key(|(_, e)| e.last_bridged)
            .map(|(i, _)| i)
        {
            self.entries.remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeUuid;

    fn addr(name: &str, subdomain: &str) -> NodeAddress {
        NodeAddress::new(name, subdomain, NodeUuid::from_bytes([1; 8]))
    }

    #[test]
    fn test_upsert_and_lookup() {
        let own = addr("self", "home");
        let mut table = RoutingTable::new(&own);
        let dest = addr("peer", "home");

        assert!(table.upsert(&dest, &dest, 1, 100));
        assert!(!table.upsert(&dest, &dest, 1, 200)); // refresh, not new
        assert_eq!(table.len(), 1);

        let entry = table.lookup(&dest, 200, ROUTE_EXPIRE_MOBILE_MS).unwrap();
        assert_eq!(entry.hop_count, 1);
        assert_eq!(entry.reliability, 100);
    }

    #[test]
    fn test_never_routes_to_self() {
        let own = addr("self", "home");
        let mut table = RoutingTable::new(&own);
        assert!(!table.upsert(&own, &own, 1, 100));
        assert!(table.is_empty());
    }

    #[test]
    fn test_reliability_bounds_and_removal() {
        let own = addr("self", "home");
        let mut table = RoutingTable::new(&own);
        let dest = addr("peer", "home");
        table.upsert(&dest, &dest, 1, 0);

        // Saturates at 100
        for _ in 0..10 {
            table.update_quality(&dest, -70.0, true, 0);
        }
        assert_eq!(table.lookup(&dest, 0, ROUTE_EXPIRE_MOBILE_MS).unwrap().reliability, 100);

        // 100 -> 80 -> 60 -> 40 -> 20 stays, next drops below floor
        for _ in 0..4 {
            assert!(!table.update_quality(&dest, -70.0, false, 0));
        }
        assert_eq!(table.lookup(&dest, 0, ROUTE_EXPIRE_MOBILE_MS).unwrap().reliability, 20);
        assert!(table.update_quality(&dest, -70.0, false, 0));
        assert!(table.lookup(&dest, 0, ROUTE_EXPIRE_MOBILE_MS).is_none());
        assert!(!table.contains(&dest));
    }

    #[test]
    fn test_route_expiry() {
        let own = addr("self", "home");
        let mut table = RoutingTable::new(&own);
        let dest = addr("peer", "home");
        table.upsert(&dest, &dest, 1, 0);

        let just_before = ROUTE_EXPIRE_MOBILE_MS;
        let just_after = ROUTE_EXPIRE_MOBILE_MS + 1;
        assert!(table.lookup(&dest, just_before, ROUTE_EXPIRE_MOBILE_MS).is_some());
        assert!(table.lookup(&dest, just_after, ROUTE_EXPIRE_MOBILE_MS).is_none());

        assert_eq!(table.prune(just_after, ROUTE_EXPIRE_MOBILE_MS), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let own = addr("self", "home");
        let mut table = RoutingTable::new(&own);
        table.max_entries = 2;

        let a = addr("aaa", "home");
        let b = addr("bbb", "home");
        let c = addr("ccc", "home");
        table.upsert(&a, &a, 1, 10);
        table.upsert(&b, &b, 1, 20);
        table.upsert(&c, &c, 1, 30);

        assert_eq!(table.len(), 2);
        assert!(!table.contains(&a)); // least recently used went first
        assert!(table.contains(&b));
        assert!(table.contains(&c));
    }

    #[test]
    fn test_subdomain_local_invariant() {
        let own = addr("self", "home");
        let mut map = SubdomainMap::new();
        map.ensure_local(&own, 0);

        let info = map.get("home").unwrap();
        assert!(info.is_local);
        assert_eq!(info.nodes.len(), 1);
        assert_eq!(info.nodes[0].full_address(), "self@home");
    }

    #[test]
    fn test_subdomain_hub_membership() {
        let hub = addr("hub", "yard");
        let mut map = SubdomainMap::new();

        map.record_hub(&hub, 5);
        assert_eq!(map.hubs("yard").len(), 1);
        // Recording twice does not duplicate
        map.record_hub(&hub, 6);
        assert_eq!(map.hubs("yard").len(), 1);

        map.remove_hub(&hub);
        assert!(map.hubs("yard").is_empty());
        // Still known as a node
        assert_eq!(map.node_count("yard"), 1);
    }

    #[test]
    fn test_subdomain_node_cap() {
        let mut map = SubdomainMap::new();
        for i in 0..MAX_SUBDOMAIN_NODES {
            let a = addr(&format!("node{:03}", i), "busy");
            assert!(map.record_node(&a, 0));
        }
        let overflow = addr("overflow", "busy");
        assert!(!map.record_node(&overflow, 0));
        assert_eq!(map.node_count("busy"), MAX_SUBDOMAIN_NODES);
    }

    #[test]
    fn test_replace_local_moves_hub_status() {
        let old = addr("node1", "mesh1");
        let new = addr("node1_427", "mesh1");
        let mut map = SubdomainMap::new();
        map.ensure_local(&old, 0);
        map.record_hub(&old, 0);

        map.replace_local(&old, &new, 10);
        let info = map.get("mesh1").unwrap();
        assert!(info.is_local);
        assert!(info.nodes.iter().all(|n| n.full_address() != "node1@mesh1"));
        assert!(info.nodes.iter().any(|n| n.full_address() == "node1_427@mesh1"));
        assert_eq!(map.hubs("mesh1").len(), 1);
        assert_eq!(map.hubs("mesh1")[0].full_address(), "node1_427@mesh1");
    }

    #[test]
    fn test_bridge_unordered_pair() {
        let a = addr("aaa", "x");
        let b = addr("bbb", "y");
        let mut bridges = BridgeMemory::new();

        bridges.record(&a, &b, 100);
        bridges.record(&b, &a, 200); // same pair, either order
        assert_eq!(bridges.len(), 1);
        assert_eq!(bridges.entries()[0].bridge_count, 2);
        assert_eq!(bridges.entries()[0].last_bridged, 200);
    }

    #[test]
    fn test_bridged_subdomains() {
        let a = addr("aaa", "x");
        let b = addr("bbb", "y");
        let c = addr("ccc", "z");
        let d = addr("ddd", "x");
        let mut bridges = BridgeMemory::new();

        bridges.record(&a, &b, 1); // x <-> y
        bridges.record(&a, &c, 2); // x <-> z
        bridges.record(&a, &d, 3); // same subdomain, not a bridge

        let mut remote = bridges.bridged_subdomains("x");
        remote.sort();
        assert_eq!(remote, vec!["y".to_string(), "z".to_string()]);
    }

    #[test]
    fn test_bridge_eviction() {
        let mut bridges = BridgeMemory::new();
        for i in 0..MAX_INTERMEDIARY_MEMORY {
            let a = addr(&format!("src{:03}", i), "x");
            let b = addr(&format!("dst{:03}", i), "y");
            bridges.record(&a, &b, i as u64);
        }
        assert_eq!(bridges.len(), MAX_INTERMEDIARY_MEMORY);

        let a = addr("fresh-a", "x");
        let b = addr("fresh-b", "y");
        bridges.record(&a, &b, 10_000);
        assert_eq!(bridges.len(), MAX_INTERMEDIARY_MEMORY);
        // The oldest pair (src000) is gone
        assert!(!bridges
            .entries()
            .iter()
            .any(|e| e.node_a.node_id == "src000"));
    }
}
