//! Error types for the protocol crate.

use thiserror::Error;

use crate::handshake::RejectReason;

/// Protocol error type covering all possible failure modes.
///
/// Every variant is fatal to the session it occurs in. Nothing in this crate
/// retries; a caller that wants resilience builds a fresh session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Construction errors
    /// Malformed input to a constructor (device id, key, record identifier).
    #[error("validation failed: {0}")]
    Validation(String),

    // Codec errors
    /// Input ended before a complete value could be decoded.
    #[error("truncated input: need {needed} bytes, have {available}")]
    TruncatedInput {
        /// Bytes required to decode the value.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// Optional-record wrapper carried a discriminant other than 0 or 1.
    #[error("invalid option discriminant: {0:#04x}")]
    InvalidDiscriminant(u8),

    /// Bytes were left over after decoding a complete value.
    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),

    // Frame errors
    /// Frame length (type byte + payload) outside `1..=65536`.
    #[error("invalid frame length: {0} (allowed 1..=65536)")]
    InvalidFrameLength(usize),

    // Connection errors
    /// Connection was closed by the peer mid-operation.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// No data arrived within the configured bound.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    // Exchange errors
    /// Server refused the handshake.
    #[error("handshake rejected: {reason}")]
    HandshakeRejected {
        /// Reason decoded from the response byte.
        reason: RejectReason,
    },

    /// Server answered a frame with an error-class acknowledgement.
    #[error("server error code {code:#04x}")]
    ServerError {
        /// Error code carried in the acknowledgement.
        code: u8,
    },

    /// Received bytes match no defined shape.
    #[error("protocol violation: unexpected bytes [{}]", hex::encode(.bytes))]
    ProtocolViolation {
        /// The raw offending bytes.
        bytes: Vec<u8>,
    },

    /// Operation attempted from a session state that does not allow it.
    #[error("invalid session state: {0}")]
    InvalidState(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            // Read timeouts surface as WouldBlock on Unix and TimedOut on Windows
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ProtocolError::Timeout(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::Transport(err.to_string()),
        }
    }
}
