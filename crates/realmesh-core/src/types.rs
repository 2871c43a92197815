//! Core address types and protocol enumerations
//!
//! Nodes are addressed by a human-readable `nodeId@subdomain` pair. Both
//! parts are 3-20 characters of `[A-Za-z0-9_-]`. Behind the readable pair
//! sits an 8-byte UUID generated once per device from OS entropy and
//! persisted across reboots; it is never used as a primary key on air but is
//! carried in every address so that name collisions stay detectable.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// UUID length in bytes
pub const UUID_LENGTH: usize = 8;

/// Minimum length of a node id or subdomain name
pub const NAME_MIN_LEN: usize = 3;

/// Maximum length of a node id or subdomain name
pub const NAME_MAX_LEN: usize = 20;

/// Persistent opaque node identifier (8 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeUuid([u8; UUID_LENGTH]);

impl NodeUuid {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; UUID_LENGTH]) -> Self {
        NodeUuid(bytes)
    }

    /// Generate a fresh UUID from OS entropy
    pub fn random() -> Self {
        let mut bytes = [0u8; UUID_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        NodeUuid(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; UUID_LENGTH] {
        &self.0
    }

    /// Loop-suppression token: the first byte of the UUID.
    ///
    /// Collision probability is ~1/256 per path-history ancestor, which is
    /// acceptable for small neighborhoods and hop budgets up to 10.
    pub fn token(&self) -> u8 {
        self.0[0]
    }

    /// True for the all-zero UUID (unset / broadcast addresses)
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; UUID_LENGTH]
    }
}

impl fmt::Display for NodeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeUuid({})", self)
    }
}

/// Check a node id or subdomain name: 3-20 chars of `[A-Za-z0-9_-]`
pub fn is_valid_name(name: &str) -> bool {
    if name.len() < NAME_MIN_LEN || name.len() > NAME_MAX_LEN {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A mesh node address: readable pair plus hidden persistent UUID
///
/// An empty destination address means broadcast; an empty `node_id` with a
/// set `subdomain` means "all nodes in that subdomain".
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeAddress {
    pub node_id: String,
    pub subdomain: String,
    pub uuid: NodeUuid,
}

impl NodeAddress {
    /// Build an address from its parts
    pub fn new(node_id: impl Into<String>, subdomain: impl Into<String>, uuid: NodeUuid) -> Self {
        Self {
            node_id: node_id.into(),
            subdomain: subdomain.into(),
            uuid,
        }
    }

    /// The broadcast address (everything empty)
    pub fn broadcast() -> Self {
        Self::default()
    }

    /// Address targeting every node in one subdomain
    pub fn subdomain_broadcast(subdomain: impl Into<String>) -> Self {
        Self {
            node_id: String::new(),
            subdomain: subdomain.into(),
            uuid: NodeUuid::default(),
        }
    }

    /// Parse the textual `nodeId@subdomain` form, splitting on the first `@`.
    ///
    /// Returns `None` when the format or either name is invalid. The UUID is
    /// not part of the textual form and comes back zeroed.
    pub fn parse(text: &str) -> Option<Self> {
        let (node_id, subdomain) = text.split_once('@')?;
        if !is_valid_name(node_id) || !is_valid_name(subdomain) {
            return None;
        }
        Some(Self::new(node_id, subdomain, NodeUuid::default()))
    }

    /// Display form: `nodeId@subdomain`
    pub fn full_address(&self) -> String {
        format!("{}@{}", self.node_id, self.subdomain)
    }

    /// Internal disambiguated form: `nodeId@subdomain_xxxx` with the first
    /// four hex chars of the UUID appended
    pub fn internal_address(&self) -> String {
        let hex = self.uuid.to_string();
        format!("{}@{}_{}", self.node_id, self.subdomain, &hex[..4])
    }

    /// Both names present and well-formed
    pub fn is_valid(&self) -> bool {
        is_valid_name(&self.node_id) && is_valid_name(&self.subdomain)
    }

    /// Fully empty destination: flood broadcast
    pub fn is_broadcast(&self) -> bool {
        self.node_id.is_empty() && self.subdomain.is_empty()
    }

    /// Empty node id with a set subdomain: subdomain-wide broadcast
    pub fn is_subdomain_broadcast(&self) -> bool {
        self.node_id.is_empty() && !self.subdomain.is_empty()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_address())
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress({})", self.internal_address())
    }
}

/// On-air message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Data = 0x01,
    Control = 0x02,
    Heartbeat = 0x03,
    Ack = 0x04,
    Nack = 0x05,
    RouteRequest = 0x06,
    RouteReply = 0x07,
    NameConflict = 0x08,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageType::Data),
            0x02 => Some(MessageType::Control),
            0x03 => Some(MessageType::Heartbeat),
            0x04 => Some(MessageType::Ack),
            0x05 => Some(MessageType::Nack),
            0x06 => Some(MessageType::RouteRequest),
            0x07 => Some(MessageType::RouteReply),
            0x08 => Some(MessageType::NameConflict),
            _ => None,
        }
    }
}

/// Message priority classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessagePriority {
    Emergency = 0x00,
    Direct = 0x01,
    Public = 0x02,
    Control = 0x03,
}

impl MessagePriority {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(MessagePriority::Emergency),
            0x01 => Some(MessagePriority::Direct),
            0x02 => Some(MessagePriority::Public),
            0x03 => Some(MessagePriority::Control),
            _ => None,
        }
    }
}

/// Node operating status as advertised in heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeStatus {
    Offline = 0x00,
    Mobile = 0x01,
    Stationary = 0x02,
    Conflict = 0x03,
}

impl NodeStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(NodeStatus::Offline),
            0x01 => Some(NodeStatus::Mobile),
            0x02 => Some(NodeStatus::Stationary),
            0x03 => Some(NodeStatus::Conflict),
            _ => None,
        }
    }
}

/// Routing flag bitset carried in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingFlags(u8);

impl RoutingFlags {
    pub const DIRECT: u8 = 0x01;
    pub const SUBDOMAIN_RETRY: u8 = 0x02;
    pub const FLOOD: u8 = 0x04;
    pub const INTERMEDIARY_ASSIST: u8 = 0x08;
    pub const ENCRYPTED: u8 = 0x10;

    pub fn new() -> Self {
        RoutingFlags(0)
    }

    pub fn from_byte(byte: u8) -> Self {
        RoutingFlags(byte)
    }

    pub fn as_byte(&self) -> u8 {
        self.0
    }

    pub fn direct(&self) -> bool {
        self.0 & Self::DIRECT != 0
    }

    pub fn subdomain_retry(&self) -> bool {
        self.0 & Self::SUBDOMAIN_RETRY != 0
    }

    pub fn flood(&self) -> bool {
        self.0 & Self::FLOOD != 0
    }

    pub fn intermediary_assist(&self) -> bool {
        self.0 & Self::INTERMEDIARY_ASSIST != 0
    }

    pub fn encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    /// Replace the whole bitset, keeping only the encrypted marker.
    ///
    /// The send tiers rewrite the routing mode but payload opacity must
    /// survive the rewrite.
    pub fn set_mode(&mut self, flag: u8) {
        let encrypted = self.0 & Self::ENCRYPTED;
        self.0 = flag | encrypted;
    }
}
