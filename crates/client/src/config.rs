//! Configuration management for the RGW client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/rgw/client.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rgw_protocol::{
    AuthKey, ConnectOptions, DeviceId, ExchangePlan, HandshakeFlags, TelemetryRecord,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default collector port.
pub const DEFAULT_PORT: u16 = 9090;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("device id must be 6 hex bytes such as DE:AD:BE:EF:00:01, got {0}")]
    InvalidDeviceId(String),

    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("frames must be at least 1, got {0}")]
    InvalidFrames(u32),

    #[error("{0} must be greater than 0 seconds")]
    InvalidTimeout(&'static str),

    #[error("reconnect max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),

    #[error("reconnect backoff needs 0 < base <= max, got base={base}ms max={max}ms")]
    InvalidBackoff { base: u64, max: u64 },

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the RGW client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Collector address and timeouts.
    pub server: ServerConfig,

    /// Identity presented in the handshake.
    pub device: DeviceConfig,

    /// Pre-shared key.
    pub auth: AuthConfig,

    /// What a session sends.
    pub session: SessionConfig,

    /// Caller-level reconnect policy.
    pub reconnect: ReconnectConfig,

    /// Raw reading carried by every data frame.
    pub record: RecordConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Collector host name or address.
    pub host: String,

    /// Collector TCP port.
    pub port: u16,

    /// Bound on establishing the TCP connection.
    pub connect_timeout_secs: u64,

    /// Bound on every blocking read and write.
    pub io_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hardware identifier, e.g. `DE:AD:BE:EF:00:01`.
    pub id: String,

    /// Handshake flags. Only the low 8 bits are sent.
    pub flags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Pre-shared authentication key. Usually supplied via `AUTH_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of data frames per run.
    pub frames: u32,

    /// Pause between data frames in milliseconds.
    pub interval_ms: u64,

    /// Send a ping before the first data frame.
    pub ping: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Retry failed sessions with a fresh connection.
    pub enabled: bool,

    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub base_backoff_ms: u64,

    /// Upper bound on the delay.
    pub max_backoff_ms: u64,
}

/// Raw sensor fields. The record's hardware identifier is taken from `[device]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordConfig {
    /// Data format identifier.
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
    /// Battery voltage and TX power, packed.
    pub power_info: u16,
    /// Movement counter.
    pub movement_counter: u8,
    /// Sequence of the first frame; later frames count up from here.
    pub measurement_seq: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: 5,
            io_timeout_secs: 5,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "DE:AD:BE:EF:00:01".to_string(),
            flags: 0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frames: 1,
            interval_ms: 2000,
            ping: false,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
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
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rgw")
        .join("client.toml")
}

impl RecordConfig {
    /// Builds the record sent on the wire, stamped with `mac`.
    pub fn to_record(&self, mac: DeviceId) -> TelemetryRecord {
        TelemetryRecord {
            format: self.format,
            temperature: self.temperature,
            humidity: self.humidity,
            pressure: self.pressure,
            acc_x: self.acc_x,
            acc_y: self.acc_y,
            acc_z: self.acc_z,
            power_info: self.power_info,
            movement_counter: self.movement_counter,
            measurement_seq: self.measurement_seq,
            mac,
        }
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - AUTH_KEY: Pre-shared key
    /// - RGW_AUTH_KEY: Pre-shared key, wins over AUTH_KEY
    /// - RGW_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        for var in ["AUTH_KEY", "RGW_AUTH_KEY"] {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    tracing::debug!("Using auth key from {}", var);
                    self.auth.key = Some(key);
                }
            }
        }

        if let Ok(level) = std::env::var("RGW_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// A missing or empty auth key is not a validation error; the caller
    /// decides how to report it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device_id()?;

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        if self.server.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("connect_timeout_secs"));
        }
        if self.server.io_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("io_timeout_secs"));
        }

        if self.session.frames == 0 {
            return Err(ConfigError::InvalidFrames(self.session.frames));
        }

        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(self.reconnect.max_attempts));
        }
        let (base, max) = (self.reconnect.base_backoff_ms, self.reconnect.max_backoff_ms);
        if base == 0 || base > max {
            return Err(ConfigError::InvalidBackoff { base, max });
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Parses `[device] id`.
    pub fn device_id(&self) -> Result<DeviceId, ConfigError> {
        self.device
            .id
            .parse()
            .map_err(|_| ConfigError::InvalidDeviceId(self.device.id.clone()))
    }

    /// Returns the auth key, or `None` when no source provided a non-empty one.
    pub fn auth_key(&self) -> Option<AuthKey> {
        self.auth
            .key
            .as_deref()
            .and_then(|key| AuthKey::new(key.as_bytes()).ok())
    }

    pub fn flags(&self) -> HandshakeFlags {
        HandshakeFlags::from(self.device.flags)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_secs(self.server.connect_timeout_secs),
            io_timeout: Duration::from_secs(self.server.io_timeout_secs),
        }
    }

    pub fn exchange_plan(&self) -> ExchangePlan {
        ExchangePlan::new(self.session.frames)
            .with_interval(Duration::from_millis(self.session.interval_ms))
            .with_ping(self.session.ping)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
