//! CAN frame codec
//!
//! Builds and inspects the 29-bit extended frames used by the update
//! handshake. Identifiers follow SAE J1939 layout: the low byte is the
//! sender's source address, the bits above it carry priority and PGN.
//!
//! No I/O happens here; see [`crate::channel`] for transports.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest identifier representable in an extended (29-bit) frame
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// Largest identifier representable in a standard (11-bit) frame
pub const STANDARD_ID_MAX: u32 = 0x7FF;

/// Classic CAN payload limit
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Masks out the source address, leaving priority + PGN
pub const PGN_GROUP_MASK: u32 = 0x1FFF_FF00;

/// Source address field (low byte)
pub const SOURCE_ADDRESS_MASK: u32 = 0xFF;

/// Trigger frame identifier (PGN 0xFF14, source 0xFA)
pub const TRIGGER_ID: u32 = 0x18FF_14FA;

/// Source address the agent transmits from (low byte of [`TRIGGER_ID`])
pub const TRIGGER_SOURCE_ADDRESS: u8 = (TRIGGER_ID & SOURCE_ADDRESS_MASK) as u8;

/// Trigger frame payload: byte 0 requests the update
pub const TRIGGER_PAYLOAD: [u8; 8] = [0x01, 0, 0, 0, 0, 0, 0, 0];

/// Acknowledgement identifier recognised by the PGN-group policy
pub const ACK_GROUP: u32 = 0x18FF_14FB;

/// Acknowledgement source address recognised by the source-address policy
pub const ACK_SOURCE_ADDRESS: u8 = 3;

/// Value payload byte 0 must carry for a frame to count as an acknowledgement
pub const ACK_MARKER: u8 = 0x01;

/// Frame construction errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("CAN ID 0x{id:X} exceeds {max:#X}")]
    IdOutOfRange { id: u32, max: u32 },

    #[error("Payload of {0} bytes exceeds the 8 byte CAN limit")]
    PayloadTooLong(usize),
}

/// A single classic CAN frame
#[derive(Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    data: Vec<u8>,
}

impl CanFrame {
    /// Create an extended (29-bit) frame
    pub fn new(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::with_format(id, true, data)
    }

    /// Create a standard (11-bit) frame
    pub fn standard(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::with_format(id, false, data)
    }

    fn with_format(id: u32, extended: bool, data: &[u8]) -> Result<Self, FrameError> {
        let max = if extended {
            EXTENDED_ID_MAX
        } else {
            STANDARD_ID_MAX
        };
        if id > max {
            return Err(FrameError::IdOutOfRange { id, max });
        }
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong(data.len()));
        }
        Ok(Self {
            id,
            extended,
            data: data.to_vec(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Sender's source address (low byte of the identifier)
    pub fn source_address(&self) -> u8 {
        (self.id & SOURCE_ADDRESS_MASK) as u8
    }

    /// Identifier with the source address masked out
    pub fn pgn_group(&self) -> u32 {
        self.id & PGN_GROUP_MASK
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "CanFrame(0x{:08X} {:02X?})", self.id, self.data)
        } else {
            write!(f, "CanFrame(0x{:03X} {:02X?})", self.id, self.data)
        }
    }
}

/// Build the fixed update trigger frame
pub fn build_trigger() -> CanFrame {
    CanFrame {
        id: TRIGGER_ID,
        extended: true,
        data: TRIGGER_PAYLOAD.to_vec(),
    }
}

/// Build an arbitrary extended frame
pub fn build_frame(id: u32, payload: &[u8]) -> Result<CanFrame, FrameError> {
    CanFrame::new(id, payload)
}

pub fn extract_source_address(frame: &CanFrame) -> u8 {
    frame.source_address()
}

/// True when `frame` belongs to the same PGN group as `expected`.
///
/// The source address byte of both sides is ignored, so any node answering
/// on the group matches.
pub fn matches_group(frame: &CanFrame, expected: u32) -> bool {
    frame.pgn_group() == expected & PGN_GROUP_MASK
}

/// Predicate deciding whether a received frame acknowledges the trigger
pub type AckPredicate = Arc<dyn Fn(&CanFrame) -> bool + Send + Sync>;

/// Acknowledgement recognition policy
///
/// Deployed controllers disagree on how they answer the trigger, so the
/// policy is configuration rather than code.
///
/// ```toml
/// [handshake.ack]
/// policy = "source_address"
/// address = 3
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AckPolicy {
    /// Any extended frame in the PGN group of `group`, from any source
    PgnGroup {
        #[serde(default = "default_ack_group")]
        group: u32,
    },
    /// Any extended frame sent by `address`, whatever its PGN
    SourceAddress {
        #[serde(default = "default_ack_source")]
        address: u8,
    },
}

fn default_ack_group() -> u32 {
    ACK_GROUP
}

fn default_ack_source() -> u8 {
    ACK_SOURCE_ADDRESS
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self::PgnGroup { group: ACK_GROUP }
    }
}

impl AckPolicy {
    /// Check a single frame against this policy
    ///
    /// Frames from the agent's own source address never match, so an echo
    /// of the trigger (which sits in the acknowledgement group and carries
    /// the marker) cannot stand in for the device's answer.
    pub fn matches(&self, frame: &CanFrame) -> bool {
        if !frame.is_extended() || frame.data().first() != Some(&ACK_MARKER) {
            return false;
        }
        if frame.source_address() == TRIGGER_SOURCE_ADDRESS {
            return false;
        }
        match *self {
            AckPolicy::PgnGroup { group } => matches_group(frame, group),
            AckPolicy::SourceAddress { address } => frame.source_address() == address,
        }
    }

    pub fn predicate(self) -> AckPredicate {
        Arc::new(move |frame: &CanFrame| self.matches(frame))
    }
}
