//! Handshake and channel configuration
//!
//! These types are deserialized from the `[handshake]` and `[channel]`
//! tables of the agent's TOML file and passed down explicitly; nothing here
//! is read from process-wide state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::frame::AckPolicy;

/// Longest handshake timeout accepted
pub const MAX_HANDSHAKE_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// Handshake Configuration
// =============================================================================

/// Handshake timing and acknowledgement recognition
///
/// ```toml
/// [handshake]
/// timeout_secs = 120
/// poll_interval_ms = 1000
///
/// [handshake.ack]
/// policy = "pgn_group"
/// group = 0x18FF14FB
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeSettings {
    /// Total time to wait for an acknowledgement
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound of a single receive call
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How acknowledgement frames are recognised
    #[serde(default)]
    pub ack: AckPolicy,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            ack: AckPolicy::default(),
        }
    }
}

impl HandshakeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 || self.timeout_secs > MAX_HANDSHAKE_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "handshake.timeout_secs must be within 1..={}, got {}",
                MAX_HANDSHAKE_TIMEOUT_SECS, self.timeout_secs
            )));
        }
        if self.poll_interval_ms == 0 || self.poll_interval() > self.timeout() {
            return Err(ConfigError::Invalid(format!(
                "handshake.poll_interval_ms must be positive and not exceed the timeout, got {}",
                self.poll_interval_ms
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Channel Configuration
// =============================================================================

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// Raw SocketCAN socket (Linux only)
    SocketCan(SocketCanConfig),
    /// Simulated bus
    Mock(MockConfig),
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::SocketCan(SocketCanConfig::default())
    }
}

/// SocketCAN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// CAN interface name (e.g., "can0")
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Deliver frames this socket sent back to itself
    #[serde(default)]
    pub receive_own: bool,
}

fn default_interface() -> String {
    "can0".to_string()
}

impl Default for SocketCanConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            receive_own: false,
        }
    }
}

/// Mock channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated send latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Answer every trigger with `ack_id`
    #[serde(default = "default_respond")]
    pub respond_to_trigger: bool,
    /// Identifier of the simulated acknowledgement
    #[serde(default = "default_mock_ack_id")]
    pub ack_id: u32,
}

fn default_respond() -> bool {
    true
}

/// In the acknowledgement PGN group and sent from source address 3, so it
/// satisfies either recognition policy.
fn default_mock_ack_id() -> u32 {
    0x18FF_1403
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            respond_to_trigger: default_respond(),
            ack_id: default_mock_ack_id(),
        }
    }
}
