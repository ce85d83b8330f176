//! Keyed-authentication handshake sent once per connection.
//!
//! ## Message Layout
//! ```text
//! MAGIC(4) | VERSION(1) | FLAGS(1) | DEVICE_ID(6) | NONCE(8) | TAG(32)
//! ```
//!
//! `TAG` is HMAC-SHA-256 keyed with the pre-shared key over bytes `[0, 20)`,
//! i.e. everything before the tag. The nonce sits inside the signed span, so
//! two handshakes with the same key and device carry different tags.
//!
//! The server answers with a single byte; see [`HandshakeResult`].

use std::fmt;
use std::io::{Read, Write};

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{ProtocolError, Result};
use crate::framing::read_exact;
use crate::identity::{AuthKey, DeviceId};

type HmacSha256 = Hmac<Sha256>;

/// Literal identifier opening every handshake.
pub const MAGIC: [u8; 4] = *b"RGW1";

/// The single protocol version this client speaks.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total handshake size in bytes.
pub const HANDSHAKE_SIZE: usize = 52;

/// Length of the span covered by the tag.
pub const SIGNED_LENGTH: usize = 20;

/// Length of the nonce.
pub const NONCE_LENGTH: usize = 8;

/// Length of the HMAC-SHA-256 tag.
pub const TAG_LENGTH: usize = 32;

/// Handshake flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandshakeFlags(u8);

impl HandshakeFlags {
    /// Create a new empty flags set.
    #[inline]
    pub fn new() -> Self {
        Self(0)
    }

    /// Create flags from a raw byte value.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value of the flags.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self.0
    }
}

impl From<u32> for HandshakeFlags {
    /// Keeps the low 8 bits only.
    fn from(value: u32) -> Self {
        Self((value & 0xFF) as u8)
    }
}

/// A fully built 52-byte handshake message.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeMessage([u8; HANDSHAKE_SIZE]);

impl HandshakeMessage {
    /// Returns the wire bytes.
    pub fn as_bytes(&self) -> &[u8; HANDSHAKE_SIZE] {
        &self.0
    }

    /// Protocol identifier, bytes `[0, 4)`.
    pub fn magic(&self) -> &[u8] {
        &self.0[0..4]
    }

    /// Protocol version byte.
    pub fn version(&self) -> u8 {
        self.0[4]
    }

    /// Capability flags byte.
    pub fn flags(&self) -> HandshakeFlags {
        HandshakeFlags::from_byte(self.0[5])
    }

    /// Device identifier, bytes `[6, 12)`.
    pub fn device_id(&self) -> &[u8] {
        &self.0[6..12]
    }

    /// Per-connection nonce, bytes `[12, 20)`.
    pub fn nonce(&self) -> &[u8] {
        &self.0[12..SIGNED_LENGTH]
    }

    /// HMAC-SHA-256 tag, bytes `[20, 52)`.
    pub fn tag(&self) -> &[u8] {
        &self.0[SIGNED_LENGTH..]
    }

    /// Recomputes the tag over bytes `[0, 20)` and compares it in constant time.
    pub fn verify(&self, key: &AuthKey) -> bool {
        match HmacSha256::new_from_slice(key.as_bytes()) {
            Ok(mut mac) => {
                mac.update(&self.0[..SIGNED_LENGTH]);
                mac.verify_slice(self.tag()).is_ok()
            }
            Err(_) => false,
        }
    }
}

impl TryFrom<&[u8]> for HandshakeMessage {
    type Error = ProtocolError;

    /// Parses received handshake bytes. Only the length is checked; use
    /// [`HandshakeMessage::verify`] and the accessors for the rest.
    fn try_from(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; HANDSHAKE_SIZE] = bytes.try_into().map_err(|_| {
            ProtocolError::Validation(format!(
                "handshake must be {} bytes, got {}",
                HANDSHAKE_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for HandshakeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeMessage")
            .field("version", &self.version())
            .field("flags", &self.flags())
            .field("device_id", &hex::encode(self.device_id()))
            .field("nonce", &hex::encode(self.nonce()))
            .finish()
    }
}

/// Computes HMAC-SHA-256 of `data` under `key`.
pub fn compute_tag(key: &AuthKey, data: &[u8]) -> Result<[u8; TAG_LENGTH]> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| ProtocolError::Validation(format!("unusable authentication key: {}", e)))?;
    mac.update(data);

    let mut tag = [0u8; TAG_LENGTH];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

/// Builds a handshake with a fresh nonce from the OS random source.
///
/// Fails with `Validation` if `device_id` is not exactly 6 bytes.
pub fn build_handshake(
    key: &AuthKey,
    device_id: &[u8],
    flags: impl Into<HandshakeFlags>,
) -> Result<HandshakeMessage> {
    let device_id = DeviceId::try_from(device_id)?;
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    build_handshake_with_nonce(key, &device_id, flags.into(), nonce)
}

/// Builds a handshake for a caller-chosen nonce.
pub fn build_handshake_with_nonce(
    key: &AuthKey,
    device_id: &DeviceId,
    flags: HandshakeFlags,
    nonce: [u8; NONCE_LENGTH],
) -> Result<HandshakeMessage> {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    buf[0..4].copy_from_slice(&MAGIC);
    buf[4] = PROTOCOL_VERSION;
    buf[5] = flags.as_byte();
    buf[6..12].copy_from_slice(device_id.as_bytes());
    buf[12..SIGNED_LENGTH].copy_from_slice(&nonce);

    let tag = compute_tag(key, &buf[..SIGNED_LENGTH])?;
    buf[SIGNED_LENGTH..].copy_from_slice(&tag);

    Ok(HandshakeMessage(buf))
}

/// Why the server refused a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Server did not recognise the magic.
    BadMagic,
    /// Server does not speak this protocol version.
    BadVersion,
    /// Tag did not verify under the server's key.
    BadAuthentication,
    /// Response byte outside the known set.
    Unknown(u8),
}

impl RejectReason {
    /// The response byte carrying this reason.
    pub fn code(self) -> u8 {
        match self {
            Self::BadMagic => HandshakeResult::BAD_MAGIC,
            Self::BadVersion => HandshakeResult::BAD_VERSION,
            Self::BadAuthentication => HandshakeResult::BAD_AUTHENTICATION,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BadMagic => "bad magic",
            Self::BadVersion => "bad version",
            Self::BadAuthentication => "bad authentication tag",
            Self::Unknown(_) => "unknown reason",
        };
        write!(f, "{} ({:#04x})", text, self.code())
    }
}

/// Outcome of a handshake, derived from the single response byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeResult {
    /// Session authenticated.
    Accepted,
    /// Rejected with `0xFF`.
    RejectedBadMagic,
    /// Rejected with `0xFE`.
    RejectedBadVersion,
    /// Rejected with `0xFD`.
    RejectedBadAuthentication,
    /// Any other response byte.
    RejectedUnknown(u8),
}

impl HandshakeResult {
    /// Response byte for acceptance.
    pub const ACCEPTED: u8 = 0x01;
    /// Response byte for an unrecognised magic.
    pub const BAD_MAGIC: u8 = 0xFF;
    /// Response byte for an unsupported version.
    pub const BAD_VERSION: u8 = 0xFE;
    /// Response byte for a tag that failed to verify.
    pub const BAD_AUTHENTICATION: u8 = 0xFD;

    /// Maps the response byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::ACCEPTED => Self::Accepted,
            Self::BAD_MAGIC => Self::RejectedBadMagic,
            Self::BAD_VERSION => Self::RejectedBadVersion,
            Self::BAD_AUTHENTICATION => Self::RejectedBadAuthentication,
            other => Self::RejectedUnknown(other),
        }
    }

    /// `Ok(())` when accepted, `HandshakeRejected` otherwise.
    pub fn into_result(self) -> Result<()> {
        let reason = match self {
            Self::Accepted => return Ok(()),
            Self::RejectedBadMagic => RejectReason::BadMagic,
            Self::RejectedBadVersion => RejectReason::BadVersion,
            Self::RejectedBadAuthentication => RejectReason::BadAuthentication,
            Self::RejectedUnknown(code) => RejectReason::Unknown(code),
        };
        Err(ProtocolError::HandshakeRejected { reason })
    }
}

/// Writes a freshly built handshake and blocks for the one-byte response.
///
/// Anything other than acceptance is returned as an error; this layer never
/// retries.
pub fn send_handshake<S: Read + Write + ?Sized>(
    stream: &mut S,
    key: &AuthKey,
    device_id: &[u8],
    flags: impl Into<HandshakeFlags>,
) -> Result<()> {
    let message = build_handshake(key, device_id, flags)?;
    exchange_handshake(stream, &message).and_then(HandshakeResult::into_result)
}

/// Writes a prepared handshake and reads the response byte.
pub fn exchange_handshake<S: Read + Write + ?Sized>(
    stream: &mut S,
    message: &HandshakeMessage,
) -> Result<HandshakeResult> {
    stream.write_all(message.as_bytes())?;
    stream.flush()?;

    let response = read_exact(stream, 1)?;
    let result = HandshakeResult::from_byte(response[0]);
    tracing::debug!(code = response[0], ?result, "handshake response");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DEVICE: [u8; 6] = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01];

    fn key() -> AuthKey {
        AuthKey::new(b"secret".to_vec()).unwrap()
    }

    /// In-memory duplex: reads from a script, records everything written.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Duplex {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                written: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_handshake_layout() {
        let message = build_handshake(&key(), &DEVICE, 0u32).unwrap();
        let bytes = message.as_bytes();

        assert_eq!(bytes.len(), HANDSHAKE_SIZE);
        assert_eq!(&bytes[0..4], b"RGW1");
        assert_eq!(bytes[4], 0x01);
        assert_eq!(bytes[5], 0x00);
        assert_eq!(&bytes[6..12], &DEVICE);
    }

    #[test]
    fn test_handshake_rejects_bad_device_id() {
        let result = build_handshake(&key(), &DEVICE[..5], 0u32);
        assert!(matches!(result, Err(ProtocolError::Validation(_))));
    }

    #[test]
    fn test_flags_keep_low_byte_only() {
        let message = build_handshake(&key(), &DEVICE, 0x1234u32).unwrap();
        assert_eq!(message.as_bytes()[5], 0x34);
        assert_eq!(message.flags(), HandshakeFlags::from_byte(0x34));
    }

    #[test]
    fn test_tag_is_hmac_over_first_20_bytes() {
        let message = build_handshake(&key(), &DEVICE, 0u32).unwrap();
        let expected = compute_tag(&key(), &message.as_bytes()[..SIGNED_LENGTH]).unwrap();
        assert_eq!(message.tag(), &expected[..]);
        assert!(message.verify(&key()));
    }

    #[test]
    fn test_verify_fails_with_other_key() {
        let message = build_handshake(&key(), &DEVICE, 0u32).unwrap();
        let other = AuthKey::new(b"not-the-secret".to_vec()).unwrap();
        assert!(!message.verify(&other));
    }

    #[test]
    fn test_tag_depends_on_nonce() {
        let device = DeviceId::from_bytes(DEVICE);
        let a = build_handshake_with_nonce(&key(), &device, HandshakeFlags::new(), [0; 8]).unwrap();
        let b = build_handshake_with_nonce(&key(), &device, HandshakeFlags::new(), [1; 8]).unwrap();
        assert_ne!(a.tag(), b.tag());
        assert_eq!(a.device_id(), b.device_id());
    }

    #[test]
    fn test_fixed_nonce_is_deterministic() {
        let device = DeviceId::from_bytes(DEVICE);
        let nonce = [0xA5, 0xA5, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01];
        let a = build_handshake_with_nonce(&key(), &device, HandshakeFlags::new(), nonce).unwrap();
        let b = build_handshake_with_nonce(&key(), &device, HandshakeFlags::new(), nonce).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.nonce(), &nonce[..]);
    }

    #[test]
    fn test_fresh_nonces_differ() {
        let a = build_handshake(&key(), &DEVICE, 0u32).unwrap();
        let b = build_handshake(&key(), &DEVICE, 0u32).unwrap();
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.tag(), b.tag());
    }

    #[test]
    fn test_tamper_breaks_verification() {
        let message = build_handshake(&key(), &DEVICE, 0u32).unwrap();
        let mut bytes = *message.as_bytes();
        bytes[7] ^= 0xFF;
        let tampered = HandshakeMessage(bytes);
        assert!(!tampered.verify(&key()));
    }

    #[test]
    fn test_parse_received_handshake() {
        let message = build_handshake(&key(), &DEVICE, 0x02u32).unwrap();
        let parsed = HandshakeMessage::try_from(&message.as_bytes()[..]).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.flags().as_byte(), 0x02);
        assert!(parsed.verify(&key()));

        assert!(matches!(
            HandshakeMessage::try_from(&message.as_bytes()[..51]),
            Err(ProtocolError::Validation(_))
        ));
    }

    #[test]
    fn test_result_from_byte() {
        assert_eq!(HandshakeResult::from_byte(0x01), HandshakeResult::Accepted);
        assert_eq!(HandshakeResult::from_byte(0xFF), HandshakeResult::RejectedBadMagic);
        assert_eq!(HandshakeResult::from_byte(0xFE), HandshakeResult::RejectedBadVersion);
        assert_eq!(
            HandshakeResult::from_byte(0xFD),
            HandshakeResult::RejectedBadAuthentication
        );
        assert_eq!(
            HandshakeResult::from_byte(0x00),
            HandshakeResult::RejectedUnknown(0x00)
        );
    }

    #[test]
    fn test_send_handshake_accepted() {
        let mut stream = Duplex::new(vec![0x01]);
        send_handshake(&mut stream, &key(), &DEVICE, 0u32).unwrap();
        assert_eq!(stream.written.len(), HANDSHAKE_SIZE);
        assert_eq!(&stream.written[0..4], b"RGW1");
    }

    #[test]
    fn test_send_handshake_rejected_bad_auth() {
        let mut stream = Duplex::new(vec![0xFD]);
        let result = send_handshake(&mut stream, &key(), &DEVICE, 0u32);
        assert!(matches!(
            result,
            Err(ProtocolError::HandshakeRejected {
                reason: RejectReason::BadAuthentication
            })
        ));
    }

    #[test]
    fn test_send_handshake_unknown_code() {
        let mut stream = Duplex::new(vec![0x42]);
        let result = send_handshake(&mut stream, &key(), &DEVICE, 0u32);
        assert!(matches!(
            result,
            Err(ProtocolError::HandshakeRejected {
                reason: RejectReason::Unknown(0x42)
            })
        ));
    }

    #[test]
    fn test_send_handshake_eof_is_connection_closed() {
        let mut stream = Duplex::new(vec![]);
        let result = send_handshake(&mut stream, &key(), &DEVICE, 0u32);
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed(_))));
    }
}
