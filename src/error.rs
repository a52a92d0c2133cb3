//! Error types for the IEC 60870-5-101/104 stack.

use thiserror::Error;

use crate::file::FileErrorCode;

/// Result type alias for IEC 60870 operations.
pub type Result<T> = std::result::Result<T, Iec60870Error>;

/// IEC 60870-5-101/104 error types.
#[derive(Debug, Error)]
pub enum Iec60870Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected to remote
    #[error("Not connected")]
    NotConnected,

    /// Data transfer not started (STARTDT not confirmed/received)
    #[error("Data transfer not active")]
    NotActive,

    /// Connection timeout (T0)
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Malformed or truncated ASDU / information object
    #[error("Invalid ASDU: {0}")]
    InvalidAsdu(String),

    /// Unknown type identifier
    #[error("Unknown type ID: {0}")]
    UnknownTypeId(u8),

    /// Received N(S) does not match the expected receive sequence number
    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// Received N(R) does not acknowledge anything inside the send window
    #[error("Sequence number {recv_seq} outside of send window (oldest {oldest}, next {next})")]
    SequenceOutOfWindow { recv_seq: u16, oldest: u16, next: u16 },

    /// T1 timeout (send or test confirmation)
    #[error("T1 timeout: no confirmation received")]
    T1Timeout,

    /// T3 keep-alive failed
    #[error("T3 timeout: connection test failed")]
    T3Timeout,

    /// Too many unconfirmed frames
    #[error("Too many unconfirmed frames (K={0})")]
    TooManyUnconfirmed(u16),

    /// Event queue full and the overflow policy rejects new entries
    #[error("ASDU queue full (capacity {0})")]
    QueueOverflow(usize),

    /// CS101 link layer is busy with another request
    #[error("Link layer busy")]
    LinkLayerBusy,

    /// File transfer failed
    #[error("File transfer failed: {0}")]
    FileTransfer(FileErrorCode),

    /// A file transfer is already in progress
    #[error("File transfer already in progress")]
    FileTransferBusy,

    /// Invalid configuration or call parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(String),
}

impl Iec60870Error {
    /// Create a protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create an invalid ASDU error.
    pub fn invalid_asdu(msg: impl Into<String>) -> Self {
        Self::InvalidAsdu(msg.into())
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NotConnected
                | Self::ConnectionTimeout
                | Self::Io(_)
                | Self::ChannelClosed
                | Self::T3Timeout
        )
    }

    /// Check if this error is fatal for a CS104 connection.
    ///
    /// Sequence and timer violations leave the byte stream in an unknown
    /// state, so the connection has to be closed and re-established.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SequenceMismatch { .. }
                | Self::SequenceOutOfWindow { .. }
                | Self::T1Timeout
                | Self::T3Timeout
                | Self::InvalidFrame(_)
                | Self::Io(_)
        )
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout
                | Self::T1Timeout
                | Self::T3Timeout
                | Self::TooManyUnconfirmed(_)
                | Self::LinkLayerBusy
                | Self::FileTransferBusy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Iec60870Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected");

        let err = Iec60870Error::UnknownTypeId(255);
        assert_eq!(err.to_string(), "Unknown type ID: 255");

        let err = Iec60870Error::SequenceMismatch {
            expected: 10,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "Sequence number mismatch: expected 10, got 5"
        );

        let err = Iec60870Error::QueueOverflow(3);
        assert_eq!(err.to_string(), "ASDU queue full (capacity 3)");
    }

    #[test]
    fn test_file_transfer_display() {
        let err = Iec60870Error::FileTransfer(FileErrorCode::Timeout);
        assert_eq!(err.to_string(), "File transfer failed: timeout");
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Iec60870Error::NotConnected.is_connection_error());
        assert!(Iec60870Error::ConnectionTimeout.is_connection_error());
        assert!(Iec60870Error::T3Timeout.is_connection_error());
        assert!(!Iec60870Error::T1Timeout.is_connection_error());
        assert!(!Iec60870Error::QueueOverflow(1).is_connection_error());
    }

    #[test]
    fn test_is_fatal() {
        assert!(Iec60870Error::SequenceMismatch {
            expected: 1,
            actual: 2
        }
        .is_fatal());
        assert!(Iec60870Error::SequenceOutOfWindow {
            recv_seq: 4,
            oldest: 5,
            next: 17
        }
        .is_fatal());
        assert!(Iec60870Error::T1Timeout.is_fatal());
        assert!(!Iec60870Error::QueueOverflow(3).is_fatal());
        assert!(!Iec60870Error::FileTransfer(FileErrorCode::Timeout).is_fatal());
    }

    #[test]
    fn test_is_retryable() {
        assert!(Iec60870Error::ConnectionTimeout.is_retryable());
        assert!(Iec60870Error::T1Timeout.is_retryable());
        assert!(Iec60870Error::LinkLayerBusy.is_retryable());
        assert!(!Iec60870Error::NotConnected.is_retryable());
    }
}
