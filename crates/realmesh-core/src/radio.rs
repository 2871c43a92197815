//! Radio transceiver contract
//!
//! The routing core treats the radio as a packet-granular transceiver: one
//! `send` at a time with automatic return to receive mode, a `poll` called
//! from the main loop, and a set of tunable PHY parameters. The hardware
//! driver itself lives outside this crate; the simulator provides the
//! in-memory implementation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RSSI above this means somebody is talking (dBm)
pub const CHANNEL_BUSY_RSSI_DBM: f32 = -90.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio not ready")]
    NotReady,
    #[error("packet exceeds radio MTU")]
    PacketTooLarge,
    #[error("transmission failed")]
    TransmissionFailed,
    #[error("invalid PHY parameter: {0}")]
    InvalidParameter(String),
}

/// Tunable PHY parameters with long-range defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    pub frequency_mhz: f64,
    pub bandwidth_khz: f64,
    pub spreading_factor: u8,
    /// Denominator of the 4/x coding rate
    pub coding_rate: u8,
    pub tx_power_dbm: i8,
    pub sync_word: u8,
    pub preamble_symbols: u16,
    pub crc_enabled: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 868.0,
            bandwidth_khz: 125.0,
            spreading_factor: 12,
            coding_rate: 5,
            tx_power_dbm: 20,
            sync_word: 0x12,
            preamble_symbols: 8,
            crc_enabled: true,
        }
    }
}

impl RadioConfig {
    /// Reject parameter combinations no LoRa chip accepts
    pub fn validate(&self) -> Result<(), RadioError> {
        if !(137.0..=1020.0).contains(&self.frequency_mhz) {
            return Err(RadioError::InvalidParameter(format!(
                "frequency {} MHz out of range",
                self.frequency_mhz
            )));
        }
        if !(5..=12).contains(&self.spreading_factor) {
            return Err(RadioError::InvalidParameter(format!(
                "spreading factor SF{}",
                self.spreading_factor
            )));
        }
        if !(5..=8).contains(&self.coding_rate) {
            return Err(RadioError::InvalidParameter(format!(
                "coding rate 4/{}",
                self.coding_rate
            )));
        }
        if !(-9..=22).contains(&self.tx_power_dbm) {
            return Err(RadioError::InvalidParameter(format!(
                "tx power {} dBm",
                self.tx_power_dbm
            )));
        }
        Ok(())
    }
}

/// Rolling transceiver counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RadioStats {
    pub messages_sent: u32,
    pub messages_received: u32,
    pub transmit_errors: u32,
    pub receive_errors: u32,
    pub bytes_transmitted: u64,
    pub bytes_received: u64,
}

/// One received frame with its signal quality
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub bytes: Vec<u8>,
    pub rssi_dbm: f32,
    pub snr_db: f32,
}

/// Packet-granular transceiver abstraction
///
/// `send` transmits one frame and must leave the radio back in receive
/// mode; receive and transmit are mutually exclusive. `poll` is called from
/// the main loop and hands out at most one frame per call.
pub trait Radio {
    fn send(&mut self, bytes: &[u8]) -> Result<(), RadioError>;

    fn poll(&mut self) -> Option<ReceivedFrame>;

    fn config(&self) -> &RadioConfig;

    fn set_config(&mut self, config: RadioConfig) -> Result<(), RadioError>;

    fn stats(&self) -> RadioStats;

    /// RSSI of the most recent reception (dBm)
    fn last_rssi(&self) -> f32;

    /// Carrier sense against [`CHANNEL_BUSY_RSSI_DBM`]
    fn is_channel_busy(&self) -> bool {
        self.last_rssi() > CHANNEL_BUSY_RSSI_DBM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RadioConfig::default();
        assert_eq!(config.frequency_mhz, 868.0);
        assert_eq!(config.spreading_factor, 12);
        assert_eq!(config.sync_word, 0x12);
        assert!(config.crc_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RadioConfig::default();
        config.frequency_mhz = 42.0;
        assert!(config.validate().is_err());

        let mut config = RadioConfig::default();
        config.spreading_factor = 13;
        assert!(config.validate().is_err());

        let mut config = RadioConfig::default();
        config.coding_rate = 9;
        assert!(config.validate().is_err());

        let mut config = RadioConfig::default();
        config.tx_power_dbm = 30;
        assert!(config.validate().is_err());
    }
}
