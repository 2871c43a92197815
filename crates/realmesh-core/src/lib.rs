//! RealMesh networking core
//!
//! RealMesh is a LoRa-based mesh stack that carries short user messages
//! between named nodes across a multi-hop ad-hoc network. Nodes are addressed
//! by a human-readable `nodeId@subdomain` pair backed by a persistent opaque
//! UUID, and the stack transports direct unicast, subdomain-scoped delivery,
//! and bounded flood broadcasts while tolerating duplicates, loops, node
//! mobility, and name collisions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Application                          │
//! │        (on_message_received / on_network_event hooks)        │
//! └──────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Node                              │
//! │   identity persistence · state machine · name conflicts      │
//! │   discovery · periodic maintenance · public operations       │
//! └──────────────────────────────────────────────────────────────┘
//!                  │                              │
//!                  ▼                              ▼
//! ┌───────────────────────────────┐  ┌─────────────────────────┐
//! │            Router             │  │       Radio trait       │
//! │  routing table · subdomains   │  │  send / poll / PHY cfg  │
//! │  bridge memory · heartbeats   │  │  RSSI / SNR reporting   │
//! │  tiered send · forwarding     │  └─────────────────────────┘
//! └───────────────────────────────┘
//!                  │
//!                  ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Packet codec                           │
//! │    32-byte header · checksum · path history · factories      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The whole stack is a cooperative state machine driven from a single poll
//! loop: the owner repeatedly polls the radio, ticks the node, and services
//! its own surfaces. Nothing in the core spawns threads or reads a wall
//! clock; time enters as an explicit `now_ms` (milliseconds since boot).

pub mod api;
pub mod error;
pub mod node;
pub mod packet;
pub mod radio;
pub mod router;
pub mod routing;
pub mod simulation;
pub mod storage;
pub mod types;

pub use api::{Api, ApiRequest, ApiResponse};
pub use error::{MeshError, MeshResult};
pub use node::{Node, NodeConfig, NodeInfo, NodeState};
pub use packet::{
    HeartbeatInfo, MessageHeader, MessagePacket, PacketError, HEADER_SIZE, MAX_HOP_COUNT,
    MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, PATH_HISTORY_SIZE, PROTOCOL_VERSION,
};
pub use radio::{Radio, RadioConfig, RadioError, RadioStats, ReceivedFrame};
pub use router::{NetworkStats, Router};
pub use routing::{BridgeEntry, RoutingEntry, SubdomainInfo};
pub use simulation::{MeshSimulator, SimConfig, SimRadio, SimStats};
pub use storage::{MemoryStore, SharedStore, Storage, StorageError};
pub use types::{MessagePriority, MessageType, NodeAddress, NodeStatus, NodeUuid, RoutingFlags};
