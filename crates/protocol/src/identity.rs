//! Device identity and pre-shared key material.
//!
//! A gateway is identified by a 6-byte hardware identifier (normally the MAC
//! of the sensor or the gateway radio) and authenticates with a pre-shared key
//! known to the collector.

use std::fmt;
use std::str::FromStr;

use crate::error::{ProtocolError, Result};

/// Length of a device identifier in bytes.
pub const DEVICE_ID_LENGTH: usize = 6;

/// A 6-byte device hardware identifier.
///
/// The length is enforced by the type, so anything holding a `DeviceId`
/// (handshake messages, telemetry records) can never carry a short or long
/// identifier onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId([u8; DEVICE_ID_LENGTH]);

impl DeviceId {
    /// Creates a new DeviceId from raw bytes.
    pub const fn from_bytes(bytes: [u8; DEVICE_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of this device ID.
    pub fn as_bytes(&self) -> &[u8; DEVICE_ID_LENGTH] {
        &self.0
    }
}

impl TryFrom<&[u8]> for DeviceId {
    type Error = ProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let array: [u8; DEVICE_ID_LENGTH] = bytes.try_into().map_err(|_| {
            ProtocolError::Validation(format!(
                "device id must be {} bytes, got {}",
                DEVICE_ID_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl FromStr for DeviceId {
    type Err = ProtocolError;

    /// Parses `DE:AD:BE:EF:00:01`, `DE-AD-BE-EF-00-01` or `DEADBEEF0001`.
    fn from_str(s: &str) -> Result<Self> {
        let raw: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();

        if raw.len() != DEVICE_ID_LENGTH * 2 {
            return Err(ProtocolError::Validation(format!(
                "device id must be {} bytes ({} hex chars), got {:?}",
                DEVICE_ID_LENGTH,
                DEVICE_ID_LENGTH * 2,
                s
            )));
        }

        let bytes = hex::decode(&raw).map_err(|e| {
            ProtocolError::Validation(format!("device id {:?} is not valid hex: {}", s, e))
        })?;
        Self::try_from(bytes.as_slice())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{}", parts.join(":"))
    }
}

/// Pre-shared authentication key used to sign handshakes.
///
/// The key is never printed; `Debug` only reports its length.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey(Vec<u8>);

impl AuthKey {
    /// Creates a key from raw bytes. Empty keys are rejected.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ProtocolError::Validation(
                "authentication key must not be empty".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKey")
            .field("len", &self.0.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
