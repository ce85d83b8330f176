//! Telemetry record carried by data frames.
//!
//! The record mirrors the RAWv2 sensor advertisement: raw integer readings
//! exactly as the sensor reports them, plus the sensor's hardware identifier.
//! There is no `Default`; every field must be supplied.

use crate::identity::DeviceId;

/// Encoded size of a record (without the optional wrapper).
pub const RECORD_SIZE: usize = 24;

/// One raw sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryRecord {
    /// Data format identifier reported by the sensor.
    pub format: u8,
    /// Temperature in 0.005 °C steps.
    pub temperature: i16,
    /// Relative humidity in 0.0025 % steps.
    pub humidity: u16,
    /// Pressure in Pa, offset by -50 000.
    pub pressure: u16,
    /// Acceleration on the X axis (mG).
    pub acc_x: i16,
    /// Acceleration on the Y axis (mG).
    pub acc_y: i16,
    /// Acceleration on the Z axis (mG).
    pub acc_z: i16,
    /// Battery voltage (upper 11 bits) and TX power (lower 5 bits).
    pub power_info: u16,
    /// Movement counter, incremented by motion interrupts.
    pub movement_counter: u8,
    /// Measurement sequence number.
    pub measurement_seq: u16,
    /// Hardware identifier of the sensor.
    pub mac: DeviceId,
}

/// A record converted to physical units, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurements {
    /// Temperature in °C.
    pub temperature_c: f32,
    /// Relative humidity in %, capped at 100.
    pub relative_humidity: f32,
    /// Absolute pressure in Pa.
    pub pressure_pa: u32,
    /// Battery voltage in V.
    pub battery_volts: f32,
    /// Transmit power in dBm.
    pub tx_power_dbm: i8,
}

impl TelemetryRecord {
    /// Converts the raw fields into physical units.
    pub fn measurements(&self) -> Measurements {
        Measurements {
            temperature_c: f32::from(self.temperature) * 0.005,
            relative_humidity: (f32::from(self.humidity) * 0.0025).min(100.0),
            pressure_pa: u32::from(self.pressure) + 50_000,
            battery_volts: f32::from(1600 + (self.power_info >> 5)) / 1000.0,
            // 5-bit field, so the product stays within i8
            tx_power_dbm: (self.power_info & 0b1_1111) as i8 * 2 - 40,
        }
    }

    /// Returns a copy with a different measurement sequence number.
    pub fn with_sequence(mut self, measurement_seq: u16) -> Self {
        self.measurement_seq = measurement_seq;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetryRecord {
        TelemetryRecord {
            format: 0x05,
            temperature: 4300,
            humidity: 20000,
            pressure: 50000,
            acc_x: 4,
            acc_y: -4,
            acc_z: 1036,
            power_info: 0xAC36,
            movement_counter: 66,
            measurement_seq: 205,
            mac: DeviceId::from_bytes([0xCB, 0xB8, 0x33, 0x4C, 0x88, 0x4F]),
        }
    }

    #[test]
    fn test_measurements_conversion() {
        let m = sample().measurements();
        assert!((m.temperature_c - 21.5).abs() < 1e-4);
        assert!((m.relative_humidity - 50.0).abs() < 1e-4);
        assert_eq!(m.pressure_pa, 100_000);
        // 0xAC36 >> 5 = 1377 -> 2.977 V, 0xAC36 & 0x1F = 22 -> +4 dBm
        assert!((m.battery_volts - 2.977).abs() < 1e-4);
        assert_eq!(m.tx_power_dbm, 4);
    }

    #[test]
    fn test_humidity_is_clamped() {
        let record = TelemetryRecord {
            humidity: u16::MAX,
            ..sample()
        };
        assert_eq!(record.measurements().relative_humidity, 100.0);
    }

    #[test]
    fn test_with_sequence_keeps_other_fields() {
        let record = sample().with_sequence(9);
        assert_eq!(record.measurement_seq, 9);
        assert_eq!(record.mac, sample().mac);
        assert_eq!(record.temperature, sample().temperature);
    }
}
