//! Raw SocketCAN channel for J1939-style extended frames

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{
    CanFrame as RawFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, SocketOptions,
    StandardId,
};
use tracing::debug;

use crate::channel::{BusChannel, ChannelError, ChannelOpener};
use crate::config::SocketCanConfig;
use crate::frame::{CanFrame, FrameError, EXTENDED_ID_MAX, STANDARD_ID_MAX};

/// Linux IFNAMSIZ minus the trailing NUL
const MAX_INTERFACE_NAME: usize = 15;

/// Smallest read timeout handed to the socket; a zero SO_RCVTIMEO blocks forever
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Opens a raw CAN socket on the configured interface for each attempt
pub struct SocketCanOpener {
    config: SocketCanConfig,
}

impl SocketCanOpener {
    pub fn new(config: &SocketCanConfig) -> Result<Self, ChannelError> {
        let name = config.interface.trim();
        if name.is_empty() || name.len() > MAX_INTERFACE_NAME {
            return Err(ChannelError::InvalidConfig(format!(
                "Invalid CAN interface name '{}'",
                config.interface
            )));
        }
        Ok(Self {
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ChannelOpener for SocketCanOpener {
    async fn open(&self) -> Result<Box<dyn BusChannel>, ChannelError> {
        let config = self.config.clone();
        let channel = tokio::task::spawn_blocking(move || SocketCanChannel::open(&config))
            .await
            .map_err(|e| ChannelError::Io(format!("Open task join error: {}", e)))??;
        Ok(Box::new(channel))
    }
}

/// One open raw CAN socket; closed when dropped
pub struct SocketCanChannel {
    interface: String,
    socket: Arc<Mutex<CanSocket>>,
}

impl SocketCanChannel {
    pub fn open(config: &SocketCanConfig) -> Result<Self, ChannelError> {
        let socket = CanSocket::open(&config.interface).map_err(|e| {
            ChannelError::from_io(
                &format!("Failed to open raw CAN socket on {}", config.interface),
                &e,
            )
        })?;

        socket
            .set_recv_own_msgs(config.receive_own)
            .map_err(|e| ChannelError::from_io("Failed to set CAN_RAW_RECV_OWN_MSGS", &e))?;

        debug!(interface = %config.interface, "Opened raw CAN socket");

        Ok(Self {
            interface: config.interface.clone(),
            socket: Arc::new(Mutex::new(socket)),
        })
    }
}

#[async_trait]
impl BusChannel for SocketCanChannel {
    async fn send(&mut self, frame: &CanFrame) -> Result<(), ChannelError> {
        let raw = to_raw_frame(frame)?;
        let socket = self.socket.clone();

        tokio::task::spawn_blocking(move || {
            let socket_guard = socket.lock();
            socket_guard
                .write_frame(&raw)
                .map_err(|e| ChannelError::from_io("Failed to write CAN frame", &e))
        })
        .await
        .map_err(|e| ChannelError::Io(format!("Send task join error: {}", e)))??;

        debug!(
            interface = %self.interface,
            can_id = format!("0x{:08X}", frame.id()),
            data = ?frame.data(),
            "Sent CAN frame"
        );
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<CanFrame>, ChannelError> {
        let socket = self.socket.clone();

        tokio::task::spawn_blocking(move || read_data_frame(&socket.lock(), timeout))
            .await
            .map_err(|e| ChannelError::Io(format!("Receive task join error: {}", e)))?
    }

    fn describe(&self) -> String {
        format!("socketcan:{}", self.interface)
    }
}

/// Block until a data frame arrives or `timeout` elapses.
///
/// Remote and error frames are skipped without ending the wait.
fn read_data_frame(socket: &CanSocket, timeout: Duration) -> Result<Option<CanFrame>, ChannelError> {
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        socket
            .set_read_timeout(Some(remaining.max(MIN_READ_TIMEOUT)))
            .map_err(|e| ChannelError::from_io("Failed to set read timeout", &e))?;

        match socket.read_frame() {
            Ok(RawFrame::Data(data_frame)) => {
                let frame = if data_frame.is_extended() {
                    CanFrame::new(data_frame.raw_id(), data_frame.data())?
                } else {
                    CanFrame::standard(data_frame.raw_id(), data_frame.data())?
                };
                return Ok(Some(frame));
            }
            Ok(other) => {
                debug!(can_id = format!("0x{:08X}", other.raw_id()), "Skipping non-data frame");
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(None);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(ChannelError::from_io("Failed to read CAN frame", &e)),
        }
    }
}

fn to_raw_frame(frame: &CanFrame) -> Result<RawFrame, ChannelError> {
    encode(frame.id(), frame.is_extended(), frame.data())
}

fn encode(id: u32, extended: bool, data: &[u8]) -> Result<RawFrame, ChannelError> {
    let raw = if extended {
        let can_id = ExtendedId::new(id).ok_or(FrameError::IdOutOfRange {
            id,
            max: EXTENDED_ID_MAX,
        })?;
        RawFrame::new(can_id, data)
    } else {
        let can_id = u16::try_from(id)
            .ok()
            .and_then(StandardId::new)
            .ok_or(FrameError::IdOutOfRange {
                id,
                max: STANDARD_ID_MAX,
            })?;
        RawFrame::new(can_id, data)
    };

    raw.ok_or_else(|| FrameError::PayloadTooLong(data.len()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::build_trigger;

    #[test]
    fn test_trigger_converts_to_extended_raw_frame() {
        let raw = to_raw_frame(&build_trigger()).unwrap();
        assert!(raw.is_extended());
        assert_eq!(raw.raw_id(), 0x18FF14FA);
        assert_eq!(raw.data(), &[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_unencodable_frames_are_frame_errors() {
        assert_eq!(
            encode(0x2000_0000, true, &[]).unwrap_err(),
            ChannelError::InvalidFrame(FrameError::IdOutOfRange {
                id: 0x2000_0000,
                max: EXTENDED_ID_MAX
            })
        );
        assert_eq!(
            encode(0x800, false, &[]).unwrap_err(),
            ChannelError::InvalidFrame(FrameError::IdOutOfRange {
                id: 0x800,
                max: STANDARD_ID_MAX
            })
        );
        assert_eq!(
            encode(0x18FF14FA, true, &[0; 9]).unwrap_err(),
            ChannelError::InvalidFrame(FrameError::PayloadTooLong(9))
        );
    }

    #[test]
    fn test_standard_frame_conversion() {
        let frame = CanFrame::standard(0x7DF, &[0x02, 0x3E]).unwrap();
        let raw = to_raw_frame(&frame).unwrap();
        assert!(!raw.is_extended());
        assert_eq!(raw.raw_id(), 0x7DF);
    }

    #[test]
    fn test_rejects_bad_interface_names() {
        let mut config = SocketCanConfig::default();
        config.interface = String::new();
        assert!(SocketCanOpener::new(&config).is_err());

        config.interface = "a-very-long-interface-name".to_string();
        assert!(SocketCanOpener::new(&config).is_err());

        config.interface = "vcan0".to_string();
        assert!(SocketCanOpener::new(&config).is_ok());
    }
}
