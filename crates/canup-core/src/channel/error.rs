//! Channel layer errors

use thiserror::Error;

use crate::frame::FrameError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Interface down, missing, or the channel was never opened
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Malformed frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),
}

impl ChannelError {
    /// Map an OS error from socket setup or transfer.
    ///
    /// `ENODEV`/`ENETDOWN`/`ENXIO` mean the interface itself is gone or down
    /// rather than a transient transfer failure.
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        const ENXIO: i32 = 6;
        const ENODEV: i32 = 19;
        const ENETDOWN: i32 = 100;

        match err.raw_os_error() {
            Some(ENXIO) | Some(ENODEV) | Some(ENETDOWN) => {
                ChannelError::Unavailable(format!("{}: {}", context, err))
            }
            _ => ChannelError::Io(format!("{}: {}", context, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_down_is_unavailable() {
        let err = std::io::Error::from_raw_os_error(100);
        assert!(matches!(
            ChannelError::from_io("write", &err),
            ChannelError::Unavailable(_)
        ));

        let err = std::io::Error::from_raw_os_error(19);
        assert!(matches!(
            ChannelError::from_io("open", &err),
            ChannelError::Unavailable(_)
        ));
    }

    #[test]
    fn test_other_errors_are_io() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "buffer full");
        match ChannelError::from_io("write", &err) {
            ChannelError::Io(msg) => assert_eq!(msg, "write: buffer full"),
            other => panic!("Expected Io, got {:?}", other),
        }
    }
}
