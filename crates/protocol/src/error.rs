//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering transport-level message failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A received message could not be interpreted at all.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Wraps any displayable transport error as a decode failure.
    pub fn decode(err: impl std::fmt::Display) -> Self {
        ProtocolError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::Decode("bad utf-8".to_string());
        assert_eq!(err.to_string(), "decode failed: bad utf-8");

        let err = ProtocolError::ConnectionClosed("reset by peer".to_string());
        assert_eq!(err.to_string(), "connection closed: reset by peer");
    }

    #[test]
    fn test_decode_helper() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "garbage");
        let err = ProtocolError::decode(io);
        assert!(matches!(err, ProtocolError::Decode(ref msg) if msg == "garbage"));
    }
}
