//! Fixed-width binary codec for telemetry records.
//!
//! # Record Layout
//!
//! ```text
//! offset  size  field
//!      0     1  format            u8
//!      1     2  temperature       i16 LE
//!      3     2  humidity          u16 LE
//!      5     2  pressure          u16 LE
//!      7     2  acc_x             i16 LE
//!      9     2  acc_y             i16 LE
//!     11     2  acc_z             i16 LE
//!     13     2  power_info        u16 LE
//!     15     1  movement_counter  u8
//!     16     2  measurement_seq   u16 LE
//!     18     6  mac               verbatim
//! ```
//!
//! The optional wrapper prepends one discriminant byte: `0x00` for an absent
//! record, `0x01` followed by the 24 record bytes for a present one. Every
//! multi-byte integer is little-endian regardless of host byte order.

use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, Result};
use crate::identity::{DeviceId, DEVICE_ID_LENGTH};
use crate::record::{TelemetryRecord, RECORD_SIZE};

/// Discriminant for an absent record.
pub const OPTION_NONE: u8 = 0x00;

/// Discriminant for a present record.
pub const OPTION_SOME: u8 = 0x01;

/// Size of a present record inside the optional wrapper.
pub const OPTIONAL_RECORD_SIZE: usize = 1 + RECORD_SIZE;

/// Writes the 24 record bytes into `buf`.
pub fn encode_record<B: BufMut>(record: &TelemetryRecord, buf: &mut B) {
    buf.put_u8(record.format);
    buf.put_i16_le(record.temperature);
    buf.put_u16_le(record.humidity);
    buf.put_u16_le(record.pressure);
    buf.put_i16_le(record.acc_x);
    buf.put_i16_le(record.acc_y);
    buf.put_i16_le(record.acc_z);
    buf.put_u16_le(record.power_info);
    buf.put_u8(record.movement_counter);
    buf.put_u16_le(record.measurement_seq);
    buf.put_slice(record.mac.as_bytes());
}

/// Encodes a record as a present optional value: always 25 bytes, first byte `0x01`.
///
/// Infallible: the identifier length is already enforced by [`DeviceId`].
pub fn encode_record_as_some(record: &TelemetryRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(OPTIONAL_RECORD_SIZE);
    out.put_u8(OPTION_SOME);
    encode_record(record, &mut out);
    out
}

/// Encodes either form of the optional wrapper.
pub fn encode_optional_record(record: Option<&TelemetryRecord>) -> Vec<u8> {
    match record {
        Some(record) => encode_record_as_some(record),
        None => vec![OPTION_NONE],
    }
}

/// Decodes exactly 24 record bytes.
pub fn decode_record(data: &[u8]) -> Result<TelemetryRecord> {
    if data.len() < RECORD_SIZE {
        return Err(ProtocolError::TruncatedInput {
            needed: RECORD_SIZE,
            available: data.len(),
        });
    }
    if data.len() > RECORD_SIZE {
        return Err(ProtocolError::TrailingBytes(data.len() - RECORD_SIZE));
    }

    let mut buf = data;
    let format = buf.get_u8();
    let temperature = buf.get_i16_le();
    let humidity = buf.get_u16_le();
    let pressure = buf.get_u16_le();
    let acc_x = buf.get_i16_le();
    let acc_y = buf.get_i16_le();
    let acc_z = buf.get_i16_le();
    let power_info = buf.get_u16_le();
    let movement_counter = buf.get_u8();
    let measurement_seq = buf.get_u16_le();
    let mac = DeviceId::try_from(&buf[..DEVICE_ID_LENGTH])?;

    Ok(TelemetryRecord {
        format,
        temperature,
        humidity,
        pressure,
        acc_x,
        acc_y,
        acc_z,
        power_info,
        movement_counter,
        measurement_seq,
        mac,
    })
}

/// Decodes the optional wrapper. Exact inverse of [`encode_optional_record`].
pub fn decode_optional_record(data: &[u8]) -> Result<Option<TelemetryRecord>> {
    let (&discriminant, rest) = data.split_first().ok_or(ProtocolError::TruncatedInput {
        needed: 1,
        available: 0,
    })?;

    match discriminant {
        OPTION_NONE if rest.is_empty() => Ok(None),
        OPTION_NONE => Err(ProtocolError::TrailingBytes(rest.len())),
        OPTION_SOME if rest.len() < RECORD_SIZE => Err(ProtocolError::TruncatedInput {
            needed: OPTIONAL_RECORD_SIZE,
            available: data.len(),
        }),
        OPTION_SOME => decode_record(rest).map(Some),
        other => Err(ProtocolError::InvalidDiscriminant(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_record() -> TelemetryRecord {
        TelemetryRecord {
            format: 0x05,
            temperature: 215,
            humidity: 4500,
            pressure: 10015,
            acc_x: 10,
            acc_y: -3,
            acc_z: 1024,
            power_info: 0xAA55,
            movement_counter: 7,
            measurement_seq: 1234,
            mac: DeviceId::from_bytes([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]),
        }
    }

    #[test]
    fn test_encode_known_layout() {
        let bytes = encode_record_as_some(&sample_record());
        let expected: [u8; 25] = [
            0x01, // Some
            0x05, // format
            0xD7, 0x00, // temperature 215
            0x94, 0x11, // humidity 4500
            0x1F, 0x27, // pressure 10015
            0x0A, 0x00, // acc_x 10
            0xFD, 0xFF, // acc_y -3
            0x00, 0x04, // acc_z 1024
            0x55, 0xAA, // power_info
            0x07, // movement_counter
            0xD2, 0x04, // measurement_seq 1234
            0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01, // mac
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_encode_none() {
        assert_eq!(encode_optional_record(None), vec![0x00]);
        assert_eq!(decode_optional_record(&[0x00]).unwrap(), None);
    }

    #[test]
    fn test_decode_roundtrip() {
        let record = sample_record();
        let bytes = encode_optional_record(Some(&record));
        assert_eq!(decode_optional_record(&bytes).unwrap(), Some(record));
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let bytes = encode_record_as_some(&sample_record());
        for len in 1..bytes.len() {
            let result = decode_optional_record(&bytes[..len]);
            assert!(
                matches!(result, Err(ProtocolError::TruncatedInput { needed: 25, .. })),
                "len={} gave {:?}",
                len,
                result
            );
        }
        assert!(matches!(
            decode_optional_record(&[]),
            Err(ProtocolError::TruncatedInput {
                needed: 1,
                available: 0
            })
        ));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode_record_as_some(&sample_record());
        bytes.push(0xFF);
        assert!(matches!(
            decode_optional_record(&bytes),
            Err(ProtocolError::TrailingBytes(1))
        ));
        assert!(matches!(
            decode_optional_record(&[0x00, 0x00]),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_discriminant() {
        assert!(matches!(
            decode_optional_record(&[0x02]),
            Err(ProtocolError::InvalidDiscriminant(0x02))
        ));
    }

    prop_compose! {
        fn arb_record()(
            format in any::<u8>(),
            temperature in any::<i16>(),
            humidity in any::<u16>(),
            pressure in any::<u16>(),
            acc_x in any::<i16>(),
            acc_y in any::<i16>(),
            acc_z in any::<i16>(),
            power_info in any::<u16>(),
            movement_counter in any::<u8>(),
            measurement_seq in any::<u16>(),
            mac in any::<[u8; 6]>()
        ) -> TelemetryRecord {
            TelemetryRecord {
                format,
                temperature,
                humidity,
                pressure,
                acc_x,
                acc_y,
                acc_z,
                power_info,
                movement_counter,
                measurement_seq,
                mac: DeviceId::from_bytes(mac),
            }
        }
    }

    proptest! {
        #[test]
        fn prop_some_is_always_25_bytes(record in arb_record()) {
            let bytes = encode_record_as_some(&record);
            prop_assert_eq!(bytes.len(), OPTIONAL_RECORD_SIZE);
            prop_assert_eq!(bytes[0], OPTION_SOME);
            prop_assert_eq!(&bytes[19..], &record.mac.as_bytes()[..]);
        }

        #[test]
        fn prop_decode_inverts_encode(record in arb_record()) {
            let bytes = encode_record_as_some(&record);
            prop_assert_eq!(decode_optional_record(&bytes).unwrap(), Some(record));
        }
    }
}
