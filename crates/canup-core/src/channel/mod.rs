//! Channel layer for CAN frame I/O
//!
//! This module provides bus channels the handshake runs on:
//! - SocketCAN raw socket (Linux only)
//! - Mock channel for testing and dry runs
//!
//! # Example
//!
//! ```ignore
//! use canup_core::channel::{create_opener, ChannelOpener};
//! use canup_core::config::ChannelConfig;
//!
//! let opener = create_opener(&ChannelConfig::Mock(Default::default()))?;
//! let mut channel = opener.open().await?;
//! channel.send(&canup_core::frame::build_trigger()).await?;
//! let reply = channel.receive(Duration::from_secs(1)).await?;
//! ```

mod bus;
pub mod error;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use bus::{BusChannel, ChannelOpener};
pub use error::ChannelError;

use std::sync::Arc;

use crate::config::ChannelConfig;

/// Create a channel opener based on configuration
pub fn create_opener(config: &ChannelConfig) -> Result<Arc<dyn ChannelOpener>, ChannelError> {
    match config {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        ChannelConfig::SocketCan(cfg) => {
            let opener = socketcan::SocketCanOpener::new(cfg)?;
            Ok(Arc::new(opener))
        }
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        ChannelConfig::SocketCan(_) => Err(ChannelError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        ChannelConfig::Mock(cfg) => Ok(Arc::new(mock::MockBus::new(cfg))),
    }
}
