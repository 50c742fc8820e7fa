//! Bus channel traits

use std::time::Duration;

use async_trait::async_trait;

use super::ChannelError;
use crate::frame::CanFrame;

/// Transport-agnostic access to a CAN bus
///
/// A channel is owned by exactly one handshake attempt. The underlying
/// transport handle is released when the channel is dropped, whichever way
/// the attempt ended.
#[async_trait]
pub trait BusChannel: Send {
    /// Transmit a single frame
    async fn send(&mut self, frame: &CanFrame) -> Result<(), ChannelError>;

    /// Wait up to `timeout` for the next frame
    ///
    /// # Returns
    /// `Ok(None)` when the timeout elapsed with nothing on the bus.
    /// A returned frame is always complete.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<CanFrame>, ChannelError>;

    /// Short human-readable name used in log lines (e.g. "socketcan:can0")
    fn describe(&self) -> String;
}

/// Acquires a fresh [`BusChannel`] for each handshake attempt
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BusChannel>, ChannelError>;
}
