//! canup-core - CAN handshake and update gating for OTA firmware delivery
//!
//! This crate holds the protocol side of the update agent: the frames the
//! target controller understands, the channels they travel on, the
//! trigger/acknowledge handshake, and the gate that only lets the updater
//! run once the controller has answered.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      UpdateGate                             │
//! │  run_cycle(staged artifact)                                 │
//! │                                                             │
//! │  ┌──────────────────┐  ┌──────────────┐  ┌──────────────┐  │
//! │  │ InterfaceControl │  │  Handshake   │  │   Updater    │  │
//! │  │ (ip link)        │  │  Controller  │  │ (external)   │  │
//! │  └──────────────────┘  └──────┬───────┘  └──────────────┘  │
//! │                               │                             │
//! │                        ┌──────┴──────┐                      │
//! │                        │ BusChannel  │                      │
//! │                        │(SocketCAN/  │                      │
//! │                        │ mock)       │                      │
//! │                        └──────┬──────┘                      │
//! │                        ┌──────┴──────┐                      │
//! │                        │ frame codec │                      │
//! │                        └─────────────┘                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod gate;
pub mod handshake;

pub use channel::{create_opener, BusChannel, ChannelError, ChannelOpener};
pub use config::{ChannelConfig, HandshakeSettings, MockConfig, SocketCanConfig};
pub use error::{ConfigError, InterfaceError, UpdateError};
pub use frame::{
    build_frame, build_trigger, extract_source_address, matches_group, AckPolicy, AckPredicate,
    CanFrame, FrameError,
};
pub use gate::{CycleOutcome, InterfaceControl, StagedArtifact, UpdateGate, Updater};
pub use handshake::{HandshakeConfig, HandshakeController, HandshakeOutcome, HandshakeState};
