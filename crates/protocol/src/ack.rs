//! Acknowledgement vocabulary shared by ping and data exchanges.
//!
//! Every frame the client sends is answered by exactly two bytes:
//! `{MARKER, CODE}`. The marker separates success from server-reported
//! errors; the code is marker-specific.

use std::io::Read;

use crate::error::Result;
use crate::framing::read_exact;

/// Size of an acknowledgement body.
pub const ACK_SIZE: usize = 2;

/// Marker byte of a success acknowledgement.
pub const ACK_MARKER: u8 = 0x03;

/// Marker byte of a server-reported error.
pub const ERROR_MARKER: u8 = 0x10;

/// Exact bytes acknowledging a data frame.
pub const DATA_ACK: [u8; ACK_SIZE] = [ACK_MARKER, AckCode::DATA];

/// Exact bytes acknowledging a ping frame.
pub const PING_ACK: [u8; ACK_SIZE] = [ACK_MARKER, AckCode::PING];

/// Variant of a success acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    /// Data frame accepted.
    Data,
    /// Ping answered.
    Ping,
    /// Success variant this client does not know. Still a success.
    Other(u8),
}

impl AckCode {
    /// Code acknowledging a data frame.
    pub const DATA: u8 = 0x01;
    /// Code acknowledging a ping.
    pub const PING: u8 = 0x02;

    /// Maps the code byte of a success acknowledgement.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::DATA => Self::Data,
            Self::PING => Self::Ping,
            other => Self::Other(other),
        }
    }

    /// Returns the code byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Data => Self::DATA,
            Self::Ping => Self::PING,
            Self::Other(other) => other,
        }
    }
}

/// A decoded acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Success-class acknowledgement.
    Ack(AckCode),
    /// Error-class acknowledgement carrying the server's error code.
    ServerError(u8),
    /// Bytes matching neither marker.
    Malformed([u8; ACK_SIZE]),
}

impl Acknowledgement {
    /// Classifies two raw bytes.
    pub fn from_bytes(bytes: [u8; ACK_SIZE]) -> Self {
        match bytes {
            [ACK_MARKER, code] => Self::Ack(AckCode::from_byte(code)),
            [ERROR_MARKER, code] => Self::ServerError(code),
            _ => Self::Malformed(bytes),
        }
    }

    /// Returns the raw bytes this acknowledgement was decoded from.
    pub fn to_bytes(self) -> [u8; ACK_SIZE] {
        match self {
            Self::Ack(code) => [ACK_MARKER, code.as_byte()],
            Self::ServerError(code) => [ERROR_MARKER, code],
            Self::Malformed(bytes) => bytes,
        }
    }

    /// Blocks until exactly two bytes arrive and classifies them.
    ///
    /// A stream closing after one byte is `ConnectionClosed`, never a
    /// short acknowledgement.
    pub fn read_from<R: Read + ?Sized>(stream: &mut R) -> Result<Self> {
        let bytes = read_exact(stream, ACK_SIZE)?;
        Ok(Self::from_bytes([bytes[0], bytes[1]]))
    }
}
