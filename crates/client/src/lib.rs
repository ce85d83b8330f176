//! RGW client library.
//!
//! Configuration and session driving for the `rgw-client` binary. The wire
//! protocol itself lives in `rgw-protocol`.

pub mod config;
pub mod runner;

pub use config::{Config, ConfigError};
pub use runner::{Client, ReconnectPolicy, RunError, RunSummary};
