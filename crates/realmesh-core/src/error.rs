//! Operation-boundary error taxonomy

use crate::packet::PacketError;
use crate::radio::RadioError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors surfaced by public node and router operations
#[derive(Debug, Error)]
pub enum MeshError {
    /// Address string fails parsing or validation
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Operation requires a state the node is not in
    #[error("node not operational (state: {0})")]
    NotOperational(String),

    /// The transceiver refused or errored; payload remains undelivered
    #[error("radio failed: {0}")]
    RadioFailed(#[from] RadioError),

    /// Decode failure (truncation, checksum, version, size)
    #[error("bad packet: {0}")]
    BadPacket(#[from] PacketError),

    /// Routing table, subdomain list, or bridge memory full
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Persistent store could not commit
    #[error("storage failed: {0}")]
    StorageFailed(#[from] StorageError),

    /// Name conflict signaled by a peer
    #[error("name conflict: {0}")]
    Conflict(String),

    /// No route and every send tier failed
    #[error("no deliverable route to {0}")]
    NoRoute(String),
}

impl MeshError {
    /// Stable machine-readable code for the API surface
    pub fn code(&self) -> &'static str {
        match self {
            MeshError::InvalidAddress(_) => "INVALID_ADDRESS",
            MeshError::NotOperational(_) => "NOT_OPERATIONAL",
            MeshError::RadioFailed(_) => "RADIO_FAILED",
            MeshError::BadPacket(_) => "BAD_PACKET",
            MeshError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            MeshError::StorageFailed(_) => "STORAGE_FAILED",
            MeshError::Conflict(_) => "CONFLICT",
            MeshError::NoRoute(_) => "NO_ROUTE",
        }
    }
}

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshError::InvalidAddress("nope".into());
        assert!(err.to_string().contains("invalid address"));
        assert_eq!(err.code(), "INVALID_ADDRESS");
    }

    #[test]
    fn test_error_conversion() {
        let err: MeshError = PacketError::BadChecksum.into();
        assert_eq!(err.code(), "BAD_PACKET");
    }
}
