//! Packet format and codec
//!
//! On-air frame: a fixed 32-byte header, two length-prefixed addresses
//! (source then destination), then `payload_length` payload bytes. The whole
//! frame must fit in 255 bytes. Header multibyte fields are little-endian,
//! packed at fixed offsets with no alignment padding; every field is encoded
//! and decoded explicitly so the layout holds on any host.
//!
//! ```text
//! ┌──────────────┬──────────────────┬──────────────────┬─────────────┐
//! │ Header (32B) │ Source address   │ Dest address     │ Payload     │
//! │              │ len+id len+sd    │ len+id len+sd    │ (0-223B)    │
//! │              │ uuid (8B)        │ uuid (8B)        │             │
//! └──────────────┴──────────────────┴──────────────────┴─────────────┘
//! ```

use crate::types::{
    MessagePriority, MessageType, NodeAddress, NodeStatus, NodeUuid, RoutingFlags, UUID_LENGTH,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum on-air frame size in bytes
pub const MAX_PACKET_SIZE: usize = 255;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Default forwarding budget
pub const MAX_HOP_COUNT: u8 = 10;

/// Heartbeats are bounded-flood with a short budget
pub const HEARTBEAT_MAX_HOPS: u8 = 3;

/// Loop-suppression tokens carried per packet
pub const PATH_HISTORY_SIZE: usize = 3;

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 1;

// Header field offsets. Bytes 21..30 are reserved padding; the checksum sits
// last and covers everything before it.
const OFF_MESSAGE_ID: usize = 0;
const OFF_TIMESTAMP: usize = 4;
const OFF_SEQUENCE: usize = 8;
const OFF_VERSION: usize = 10;
const OFF_TYPE: usize = 11;
const OFF_PRIORITY: usize = 12;
const OFF_FLAGS: usize = 13;
const OFF_HOP_COUNT: usize = 14;
const OFF_MAX_HOPS: usize = 15;
const OFF_PAYLOAD_LEN: usize = 16;
const OFF_RESERVED: usize = 17;
const OFF_PATH_HISTORY: usize = 18;
const OFF_CHECKSUM: usize = HEADER_SIZE - 2;

/// Decode failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("frame truncated")]
    Truncated,
    #[error("header checksum mismatch")]
    BadChecksum,
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("payload length exceeds maximum")]
    PayloadTooLong,
}

/// Fixed 32-byte message header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub message_id: u32,
    /// Seconds since the originator booted (not wall clock)
    pub timestamp: u32,
    /// Per-originator monotonic counter
    pub sequence_number: u16,
    pub protocol_version: u8,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub routing_flags: RoutingFlags,
    pub hop_count: u8,
    pub max_hops: u8,
    pub payload_length: u8,
    pub reserved: u8,
    /// Last three forwarders' loop-suppression tokens, newest first
    pub path_history: [u8; PATH_HISTORY_SIZE],
    pub checksum: u16,
}

impl MessageHeader {
    /// Encode to the fixed 32-byte wire layout
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[OFF_MESSAGE_ID..OFF_MESSAGE_ID + 4].copy_from_slice(&self.message_id.to_le_bytes());
        bytes[OFF_TIMESTAMP..OFF_TIMESTAMP + 4].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[OFF_SEQUENCE..OFF_SEQUENCE + 2].copy_from_slice(&self.sequence_number.to_le_bytes());
        bytes[OFF_VERSION] = self.protocol_version;
        bytes[OFF_TYPE] = self.message_type as u8;
        bytes[OFF_PRIORITY] = self.priority as u8;
        bytes[OFF_FLAGS] = self.routing_flags.as_byte();
        bytes[OFF_HOP_COUNT] = self.hop_count;
        bytes[OFF_MAX_HOPS] = self.max_hops;
        bytes[OFF_PAYLOAD_LEN] = self.payload_length;
        bytes[OFF_RESERVED] = self.reserved;
        bytes[OFF_PATH_HISTORY..OFF_PATH_HISTORY + PATH_HISTORY_SIZE]
            .copy_from_slice(&self.path_history);
        bytes[OFF_CHECKSUM..].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Decode from the wire layout. Checksum is validated first, then the
    /// protocol version, then the message type byte.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::Truncated);
        }

        let stored = u16::from_le_bytes([bytes[OFF_CHECKSUM], bytes[OFF_CHECKSUM + 1]]);
        if checksum_of(&bytes[..OFF_CHECKSUM]) != stored {
            return Err(PacketError::BadChecksum);
        }
        if bytes[OFF_VERSION] != PROTOCOL_VERSION {
            return Err(PacketError::UnsupportedVersion);
        }
        if bytes[OFF_PAYLOAD_LEN] as usize > MAX_PAYLOAD_SIZE {
            return Err(PacketError::PayloadTooLong);
        }

        // Unknown type/priority bytes would have failed the checksum if
        // corrupted in flight; a well-formed but unknown value means a peer
        // speaking a newer dialect, which we cannot parse.
        let message_type =
            MessageType::from_u8(bytes[OFF_TYPE]).ok_or(PacketError::UnsupportedVersion)?;
        let priority =
            MessagePriority::from_u8(bytes[OFF_PRIORITY]).ok_or(PacketError::UnsupportedVersion)?;

        let mut path_history = [0u8; PATH_HISTORY_SIZE];
        path_history.copy_from_slice(&bytes[OFF_PATH_HISTORY..OFF_PATH_HISTORY + PATH_HISTORY_SIZE]);

        Ok(Self {
            message_id: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            timestamp: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            sequence_number: u16::from_le_bytes([bytes[8], bytes[9]]),
            protocol_version: bytes[OFF_VERSION],
            message_type,
            priority,
            routing_flags: RoutingFlags::from_byte(bytes[OFF_FLAGS]),
            hop_count: bytes[OFF_HOP_COUNT],
            max_hops: bytes[OFF_MAX_HOPS],
            payload_length: bytes[OFF_PAYLOAD_LEN],
            reserved: bytes[OFF_RESERVED],
            path_history,
            checksum: stored,
        })
    }

    /// Recompute and store the header checksum
    pub fn seal(&mut self) {
        let bytes = self.to_bytes();
        self.checksum = checksum_of(&bytes[..OFF_CHECKSUM]);
    }
}

/// 16-bit truncated byte sum
fn checksum_of(bytes: &[u8]) -> u16 {
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    (sum & 0xFFFF) as u16
}

/// Deterministic message id: fold-XOR of the first four UUID bytes shifted
/// into place, mixed with the boot-relative timestamp and the shifted
/// sequence number.
pub fn message_id(source: &NodeAddress, timestamp: u32, sequence: u16) -> u32 {
    let mut id: u32 = 0;
    for (i, &b) in source.uuid.as_bytes().iter().take(4).enumerate() {
        id ^= (b as u32) << (i * 8);
    }
    id ^ timestamp ^ ((sequence as u32) << 16)
}

/// A complete mesh packet: header, both addresses, payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePacket {
    pub header: MessageHeader,
    pub source: NodeAddress,
    pub destination: NodeAddress,
    pub payload: Vec<u8>,
}

impl MessagePacket {
    /// Serialize to the on-air frame
    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(MAX_PACKET_SIZE);
        buffer.extend_from_slice(&self.header.to_bytes());
        serialize_address(&mut buffer, &self.source);
        serialize_address(&mut buffer, &self.destination);
        buffer.extend_from_slice(&self.payload);
        buffer
    }

    /// Deserialize from received bytes
    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let header = MessageHeader::from_bytes(data)?;
        let mut cursor = &data[HEADER_SIZE..];

        let source = deserialize_address(&mut cursor)?;
        let destination = deserialize_address(&mut cursor)?;

        let payload_len = header.payload_length as usize;
        if cursor.len() < payload_len {
            return Err(PacketError::Truncated);
        }
        let payload = cursor[..payload_len].to_vec();

        Ok(Self {
            header,
            source,
            destination,
            payload,
        })
    }

    /// Payload interpreted as text
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// The acknowledged message id carried by an ACK payload
    pub fn acked_message_id(&self) -> Option<u32> {
        if self.payload.len() < 4 {
            return None;
        }
        Some(u32::from_le_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]))
    }

    /// Create a DATA packet. The payload is truncated so the serialized
    /// frame never exceeds [`MAX_PACKET_SIZE`] for these addresses.
    pub fn data(
        source: &NodeAddress,
        destination: &NodeAddress,
        text: &str,
        priority: MessagePriority,
        encrypted: bool,
        timestamp: u32,
        sequence: u16,
    ) -> Self {
        let mut flags = RoutingFlags::new();
        flags.set(RoutingFlags::DIRECT);
        if encrypted {
            flags.set(RoutingFlags::ENCRYPTED);
        }
        Self::build(
            source,
            destination,
            MessageType::Data,
            priority,
            flags,
            MAX_HOP_COUNT,
            text.as_bytes(),
            timestamp,
            sequence,
        )
    }

    /// Create a HEARTBEAT packet: bounded flood to the broadcast address
    pub fn heartbeat(
        source: &NodeAddress,
        info: &HeartbeatInfo,
        timestamp: u32,
        sequence: u16,
    ) -> Self {
        let mut flags = RoutingFlags::new();
        flags.set(RoutingFlags::FLOOD);
        Self::build(
            source,
            &NodeAddress::broadcast(),
            MessageType::Heartbeat,
            MessagePriority::Control,
            flags,
            HEARTBEAT_MAX_HOPS,
            &info.encode(),
            timestamp,
            sequence,
        )
    }

    /// Create an ACK for a previously received message
    pub fn ack(
        source: &NodeAddress,
        destination: &NodeAddress,
        original_message_id: u32,
        timestamp: u32,
        sequence: u16,
    ) -> Self {
        let mut flags = RoutingFlags::new();
        flags.set(RoutingFlags::DIRECT);
        Self::build(
            source,
            destination,
            MessageType::Ack,
            MessagePriority::Control,
            flags,
            MAX_HOP_COUNT,
            &original_message_id.to_le_bytes(),
            timestamp,
            sequence,
        )
    }

    /// Create a NAME_CONFLICT notice aimed at the conflicting node.
    /// Single hop: the conflicting node is by definition in direct range,
    /// since the collision was observed on its own transmission.
    pub fn name_conflict(
        source: &NodeAddress,
        conflicting: &NodeAddress,
        reason: &str,
        timestamp: u32,
        sequence: u16,
    ) -> Self {
        let mut flags = RoutingFlags::new();
        flags.set(RoutingFlags::DIRECT);
        Self::build(
            source,
            conflicting,
            MessageType::NameConflict,
            MessagePriority::Control,
            flags,
            1,
            reason.as_bytes(),
            timestamp,
            sequence,
        )
    }

    /// Create a ROUTE_REQUEST probe. The message type is reserved; no
    /// discovery round-trip is wired up yet.
    pub fn route_request(
        source: &NodeAddress,
        destination: &NodeAddress,
        max_hops: u8,
        timestamp: u32,
        sequence: u16,
    ) -> Self {
        let mut flags = RoutingFlags::new();
        flags.set(RoutingFlags::FLOOD);
        Self::build(
            source,
            destination,
            MessageType::RouteRequest,
            MessagePriority::Control,
            flags,
            max_hops,
            &[],
            timestamp,
            sequence,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        source: &NodeAddress,
        destination: &NodeAddress,
        message_type: MessageType,
        priority: MessagePriority,
        routing_flags: RoutingFlags,
        max_hops: u8,
        payload: &[u8],
        timestamp: u32,
        sequence: u16,
    ) -> Self {
        let budget = MAX_PACKET_SIZE
            .saturating_sub(HEADER_SIZE)
            .saturating_sub(address_wire_len(source))
            .saturating_sub(address_wire_len(destination))
            .min(MAX_PAYLOAD_SIZE);
        let payload = &payload[..payload.len().min(budget)];

        let mut header = MessageHeader {
            message_id: message_id(source, timestamp, sequence),
            timestamp,
            sequence_number: sequence,
            protocol_version: PROTOCOL_VERSION,
            message_type,
            priority,
            routing_flags,
            hop_count: 0,
            max_hops,
            payload_length: payload.len() as u8,
            reserved: 0,
            path_history: [0u8; PATH_HISTORY_SIZE],
            checksum: 0,
        };
        header.seal();

        Self {
            header,
            source: source.clone(),
            destination: destination.clone(),
            payload: payload.to_vec(),
        }
    }
}

fn address_wire_len(address: &NodeAddress) -> usize {
    2 + address.node_id.len().min(255) + address.subdomain.len().min(255) + UUID_LENGTH
}

fn serialize_address(buffer: &mut Vec<u8>, address: &NodeAddress) {
    serialize_string(buffer, &address.node_id);
    serialize_string(buffer, &address.subdomain);
    buffer.extend_from_slice(address.uuid.as_bytes());
}

fn serialize_string(buffer: &mut Vec<u8>, text: &str) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(255);
    buffer.push(len as u8);
    buffer.extend_from_slice(&bytes[..len]);
}

fn deserialize_address(cursor: &mut &[u8]) -> Result<NodeAddress, PacketError> {
    let node_id = deserialize_string(cursor)?;
    let subdomain = deserialize_string(cursor)?;
    if cursor.len() < UUID_LENGTH {
        return Err(PacketError::Truncated);
    }
    let mut uuid = [0u8; UUID_LENGTH];
    uuid.copy_from_slice(&cursor[..UUID_LENGTH]);
    *cursor = &cursor[UUID_LENGTH..];
    Ok(NodeAddress::new(node_id, subdomain, NodeUuid::from_bytes(uuid)))
}

fn deserialize_string(cursor: &mut &[u8]) -> Result<String, PacketError> {
    let (&len, rest) = cursor.split_first().ok_or(PacketError::Truncated)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(PacketError::Truncated);
    }
    let text = String::from_utf8_lossy(&rest[..len]).into_owned();
    *cursor = &rest[len..];
    Ok(text)
}

/// Heartbeat payload: compact JSON advertisement of presence and health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatInfo {
    pub status: NodeStatus,
    /// Seconds since the sender booted
    pub uptime: u32,
    /// Direct contacts the sender knows in its subdomain
    pub contacts: u32,
    /// Subdomain pairs the sender has bridged
    pub bridges: u32,
    pub sent: u32,
    pub recv: u32,
    #[serde(rename = "rssi")]
    pub avg_rssi: f32,
    /// Network load estimate, 0-100
    pub load: u8,
}

impl HeartbeatInfo {
    pub fn encode(&self) -> Vec<u8> {
        // Infallible for this struct shape
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address(name: &str, subdomain: &str, first_byte: u8) -> NodeAddress {
        let mut bytes = [7u8; UUID_LENGTH];
        bytes[0] = first_byte;
        NodeAddress::new(name, subdomain, NodeUuid::from_bytes(bytes))
    }

    #[test]
    fn test_header_round_trip() {
        let mut header = MessageHeader {
            message_id: 0xDEADBEEF,
            timestamp: 12345,
            sequence_number: 42,
            protocol_version: PROTOCOL_VERSION,
            message_type: MessageType::Data,
            priority: MessagePriority::Direct,
            routing_flags: RoutingFlags::from_byte(RoutingFlags::DIRECT),
            hop_count: 2,
            max_hops: 10,
            payload_length: 5,
            reserved: 0,
            path_history: [1, 2, 3],
            checksum: 0,
        };
        header.seal();

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let recovered = MessageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(recovered, header);
    }

    #[test]
    fn test_packet_round_trip() {
        let src = test_address("alpha", "home", 0x11);
        let dst = test_address("beta", "home", 0x22);
        let packet = MessagePacket::data(&src, &dst, "hi", MessagePriority::Direct, false, 100, 1);

        let bytes = packet.serialize();
        let recovered = MessagePacket::deserialize(&bytes).unwrap();
        assert_eq!(recovered, packet);
        assert_eq!(recovered.payload_text(), "hi");
    }

    #[test]
    fn test_checksum_detects_any_bit_flip() {
        let src = test_address("alpha", "home", 0x11);
        let dst = test_address("beta", "home", 0x22);
        let packet = MessagePacket::data(&src, &dst, "payload", MessagePriority::Direct, false, 7, 3);
        let bytes = packet.serialize();

        for byte_idx in 0..OFF_CHECKSUM {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[byte_idx] ^= 1 << bit;
                assert_eq!(
                    MessagePacket::deserialize(&corrupted),
                    Err(PacketError::BadChecksum),
                    "flip at byte {} bit {} went undetected",
                    byte_idx,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_size_bound_with_maximum_names() {
        let long = "x".repeat(20);
        let src = test_address(&long, &long, 0x11);
        let dst = test_address(&long, &long, 0x22);
        let huge = "y".repeat(400);
        let packet =
            MessagePacket::data(&src, &dst, &huge, MessagePriority::Direct, false, 0, 0);

        let bytes = packet.serialize();
        assert!(bytes.len() <= MAX_PACKET_SIZE, "frame is {} bytes", bytes.len());
        assert_eq!(packet.payload.len(), packet.header.payload_length as usize);
        assert!(MessagePacket::deserialize(&bytes).is_ok());
    }

    #[test]
    fn test_message_id_deterministic() {
        let src = test_address("alpha", "home", 0x11);
        let a = message_id(&src, 1000, 5);
        let b = message_id(&src, 1000, 5);
        assert_eq!(a, b);
        assert_ne!(a, message_id(&src, 1001, 5));
        assert_ne!(a, message_id(&src, 1000, 6));

        let other = test_address("alpha", "home", 0x99);
        assert_ne!(a, message_id(&other, 1000, 5));
    }

    #[test]
    fn test_truncated_frames() {
        let src = test_address("alpha", "home", 0x11);
        let dst = test_address("beta", "home", 0x22);
        let bytes =
            MessagePacket::data(&src, &dst, "hello", MessagePriority::Direct, false, 0, 0)
                .serialize();

        assert_eq!(
            MessagePacket::deserialize(&bytes[..10]),
            Err(PacketError::Truncated)
        );
        // Header intact but addresses cut short
        assert_eq!(
            MessagePacket::deserialize(&bytes[..HEADER_SIZE + 3]),
            Err(PacketError::Truncated)
        );
        // Payload cut short
        assert_eq!(
            MessagePacket::deserialize(&bytes[..bytes.len() - 1]),
            Err(PacketError::Truncated)
        );
    }

    #[test]
    fn test_unsupported_version() {
        let src = test_address("alpha", "home", 0x11);
        let dst = test_address("beta", "home", 0x22);
        let mut packet = MessagePacket::data(&src, &dst, "v", MessagePriority::Direct, false, 0, 0);
        packet.header.protocol_version = 2;
        packet.header.seal();

        assert_eq!(
            MessagePacket::deserialize(&packet.serialize()),
            Err(PacketError::UnsupportedVersion)
        );
    }

    #[test]
    fn test_payload_too_long_rejected() {
        let src = test_address("alpha", "home", 0x11);
        let dst = test_address("beta", "home", 0x22);
        let mut packet = MessagePacket::data(&src, &dst, "v", MessagePriority::Direct, false, 0, 0);
        packet.header.payload_length = (MAX_PAYLOAD_SIZE + 1) as u8;
        packet.header.seal();

        assert_eq!(
            MessagePacket::deserialize(&packet.serialize()),
            Err(PacketError::PayloadTooLong)
        );
    }

    #[test]
    fn test_data_factory_defaults() {
        let src = test_address("alpha", "home", 0x11);
        let dst = test_address("beta", "home", 0x22);
        let packet = MessagePacket::data(&src, &dst, "hi", MessagePriority::Direct, true, 55, 9);

        assert_eq!(packet.header.message_type, MessageType::Data);
        assert_eq!(packet.header.max_hops, MAX_HOP_COUNT);
        assert_eq!(packet.header.hop_count, 0);
        assert!(packet.header.routing_flags.direct());
        assert!(packet.header.routing_flags.encrypted());
        assert_eq!(packet.header.timestamp, 55);
        assert_eq!(packet.header.sequence_number, 9);
        assert_eq!(packet.header.message_id, message_id(&src, 55, 9));
    }

    #[test]
    fn test_heartbeat_factory() {
        let src = test_address("alpha", "home", 0x11);
        let info = HeartbeatInfo {
            status: NodeStatus::Stationary,
            uptime: 120,
            contacts: 3,
            bridges: 1,
            sent: 10,
            recv: 20,
            avg_rssi: -82.5,
            load: 12,
        };
        let packet = MessagePacket::heartbeat(&src, &info, 120, 2);

        assert_eq!(packet.header.message_type, MessageType::Heartbeat);
        assert_eq!(packet.header.priority, MessagePriority::Control);
        assert_eq!(packet.header.max_hops, HEARTBEAT_MAX_HOPS);
        assert!(packet.header.routing_flags.flood());
        assert!(packet.destination.is_broadcast());

        let decoded = HeartbeatInfo::decode(&packet.payload).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_ack_factory() {
        let src = test_address("alpha", "home", 0x11);
        let dst = test_address("beta", "home", 0x22);
        let packet = MessagePacket::ack(&src, &dst, 0xCAFE_F00D, 5, 1);

        assert_eq!(packet.header.message_type, MessageType::Ack);
        assert_eq!(packet.header.priority, MessagePriority::Control);
        assert!(packet.header.routing_flags.direct());
        assert_eq!(packet.acked_message_id(), Some(0xCAFE_F00D));
    }

    #[test]
    fn test_name_conflict_factory() {
        let src = test_address("alpha", "home", 0x11);
        let conflicting = test_address("alpha", "home", 0x99);
        let packet = MessagePacket::name_conflict(&src, &conflicting, "duplicate name", 5, 1);

        assert_eq!(packet.header.message_type, MessageType::NameConflict);
        assert_eq!(packet.header.max_hops, 1);
        assert_eq!(packet.payload_text(), "duplicate name");
    }

    #[test]
    fn test_route_request_round_trip() {
        let src = test_address("alpha", "home", 0x11);
        let dst = test_address("beta", "yard", 0x22);
        let packet = MessagePacket::route_request(&src, &dst, 5, 42, 7);

        assert_eq!(packet.header.message_type, MessageType::RouteRequest);
        assert_eq!(packet.header.priority, MessagePriority::Control);
        assert_eq!(packet.header.max_hops, 5);
        assert!(packet.header.routing_flags.flood());
        assert!(packet.payload.is_empty());

        let recovered = MessagePacket::deserialize(&packet.serialize()).unwrap();
        assert_eq!(recovered, packet);
        assert_eq!(recovered.destination.full_address(), "beta@yard");
    }
}
