//! # RGW Protocol Library
//!
//! Client side of the RGW1 gateway protocol: an authenticated,
//! length-prefixed binary protocol that carries fixed-width environmental
//! telemetry records from a device to a collector over one TCP connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Session state machine        │  handshake, ping, data
//! ├─────────────────────────────────────────┤
//! │   Handshake (HMAC-SHA-256)  │  Acks     │  one-shot / per frame
//! ├─────────────────────────────────────────┤
//! │   Framing: u32 BE length | type | body  │
//! ├─────────────────────────────────────────┤
//! │   Record codec: 24 bytes LE + option    │
//! ├─────────────────────────────────────────┤
//! │              Transport (TCP)            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! All I/O is blocking and bounded by the stream's read/write timeouts.
//!
//! ## Modules
//!
//! - [`record`]: Telemetry record and derived measurements
//! - [`codec`]: Record byte layout and optional wrapper
//! - [`framing`]: Length-prefixed frames over a byte stream
//! - [`handshake`]: Keyed handshake construction and response
//! - [`ack`]: Acknowledgement classification
//! - [`session`]: Connection lifecycle
//! - [`identity`]: Device identifier and pre-shared key
//! - [`error`]: Error types

pub mod ack;
pub mod codec;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod identity;
pub mod record;
pub mod session;

pub use ack::{AckCode, Acknowledgement, ACK_SIZE, DATA_ACK, PING_ACK};
pub use codec::{
    decode_optional_record, decode_record, encode_optional_record, encode_record,
    encode_record_as_some, OPTIONAL_RECORD_SIZE,
};
pub use error::{ProtocolError, Result};
pub use framing::{
    build_frame, parse_frame, read_frame, write_frame, Frame, FrameType, FRAME_HEADER_SIZE,
    MAX_FRAME_LENGTH, MAX_PAYLOAD_SIZE,
};
pub use handshake::{
    build_handshake, build_handshake_with_nonce, send_handshake, HandshakeFlags,
    HandshakeMessage, HandshakeResult, RejectReason, HANDSHAKE_SIZE, MAGIC, PROTOCOL_VERSION,
};
pub use identity::{AuthKey, DeviceId, DEVICE_ID_LENGTH};
pub use record::{Measurements, TelemetryRecord, RECORD_SIZE};
pub use session::{
    ConnectOptions, Credentials, ExchangePlan, PingOutcome, Session, SessionError, SessionReport,
    SessionState, Stage,
};
