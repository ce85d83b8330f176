//! Length-prefixed typed framing.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 4 bytes: length of (type + payload), big-endian
//! - 1 byte: frame type
//! - N bytes: payload
//!
//! The length prefix is the only big-endian integer in the protocol. It is
//! always at least 1 (the type byte) and at most 65536 (type byte plus 65535
//! bytes of payload).

use std::io::{ErrorKind, Read, Write};

use crate::error::{ProtocolError, Result};

/// Maximum value of the length prefix (type byte + payload).
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Maximum payload size of a single frame.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_LENGTH - 1;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Frame header size: 4 (length) + 1 (type) = 5 bytes.
pub const FRAME_HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + 1;

/// Type byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Telemetry data; payload is an optional-record wrapper.
    Data,
    /// Liveness probe; empty payload.
    Ping,
    /// Any type this client does not define.
    Unknown(u8),
}

impl FrameType {
    /// Type byte for data frames.
    pub const DATA: u8 = 0x01;
    /// Type byte for ping frames.
    pub const PING: u8 = 0x02;

    /// Maps a raw type byte.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::DATA => Self::Data,
            Self::PING => Self::Ping,
            other => Self::Unknown(other),
        }
    }

    /// Returns the raw type byte.
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Data => Self::DATA,
            Self::Ping => Self::PING,
            Self::Unknown(other) => other,
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Encode this frame into bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        build_frame(self.frame_type, &self.payload)
    }
}

/// Checks a length-prefix value against protocol bounds.
#[inline]
fn check_frame_length(total_len: usize) -> Result<()> {
    if total_len == 0 || total_len > MAX_FRAME_LENGTH {
        return Err(ProtocolError::InvalidFrameLength(total_len));
    }
    Ok(())
}

/// Build a frame: `[total_len BE u32][type][payload]` with no padding.
pub fn build_frame(frame_type: FrameType, payload: &[u8]) -> Result<Vec<u8>> {
    let total_len = 1 + payload.len();
    check_frame_length(total_len)?;

    let mut output = Vec::with_capacity(LENGTH_PREFIX_SIZE + total_len);
    output.extend_from_slice(&(total_len as u32).to_be_bytes());
    output.push(frame_type.as_byte());
    output.extend_from_slice(payload);

    Ok(output)
}

/// Parse one frame from the start of `data`.
///
/// Returns the decoded frame and the number of bytes consumed, so several
/// frames can be parsed back to back out of one buffer.
pub fn parse_frame(data: &[u8]) -> Result<(Frame, usize)> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::TruncatedInput {
            needed: LENGTH_PREFIX_SIZE,
            available: data.len(),
        });
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&data[..LENGTH_PREFIX_SIZE]);
    let total_len = u32::from_be_bytes(prefix) as usize;
    check_frame_length(total_len)?;

    let consumed = LENGTH_PREFIX_SIZE + total_len;
    if data.len() < consumed {
        return Err(ProtocolError::TruncatedInput {
            needed: consumed,
            available: data.len(),
        });
    }

    let frame = Frame {
        frame_type: FrameType::from_byte(data[LENGTH_PREFIX_SIZE]),
        payload: data[FRAME_HEADER_SIZE..consumed].to_vec(),
    };

    Ok((frame, consumed))
}

/// Read exactly `n` bytes, accumulating partial reads.
///
/// Fails with `ConnectionClosed` as soon as the stream yields zero bytes
/// before `n` is reached. Never pads or truncates. Read timeouts configured
/// on the stream surface as `Timeout`.
pub fn read_exact<R: Read + ?Sized>(stream: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut filled = 0;

    while filled < n {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(ProtocolError::ConnectionClosed(format!(
                    "peer closed after {} of {} bytes",
                    filled, n
                )));
            }
            Ok(read) => filled += read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(buf)
}

/// Read one frame: the 4-byte length, then exactly that many bytes.
pub fn read_frame<R: Read + ?Sized>(stream: &mut R) -> Result<Frame> {
    let prefix = read_exact(stream, LENGTH_PREFIX_SIZE)?;
    let total_len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    check_frame_length(total_len)?;

    let body = read_exact(stream, total_len)?;
    Ok(Frame {
        frame_type: FrameType::from_byte(body[0]),
        payload: body[1..].to_vec(),
    })
}

/// Build one frame and write it to `stream` in a single write, then flush.
pub fn write_frame<W: Write + ?Sized>(
    stream: &mut W,
    frame_type: FrameType,
    payload: &[u8],
) -> Result<()> {
    let bytes = build_frame(frame_type, payload)?;
    stream.write_all(&bytes)?;
    stream.flush()?;
    Ok(())
}
