//! Drives sessions against the collector.
//!
//! The protocol engine never retries. When reconnect is enabled, a failed
//! session is replaced by a brand-new one (new stream, new handshake, new
//! nonce) after an exponential backoff, and only the frames not yet
//! acknowledged are sent again.

use std::time::Duration;

use anyhow::{Context, Result};
use rgw_protocol::{
    ConnectOptions, Credentials, ExchangePlan, PingOutcome, ProtocolError, RejectReason, Session,
    SessionError, SessionReport, TelemetryRecord,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_backoff: Duration,
    /// Upper bound on any delay.
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Delay before the attempt following the `failures`-th failure.
    pub fn backoff(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff)
    }
}

/// Whether a fresh session could plausibly succeed where this one failed.
///
/// Rejections for magic, version or authentication are deterministic.
pub fn is_retryable(error: &SessionError) -> bool {
    match &error.error {
        ProtocolError::HandshakeRejected { reason } => matches!(reason, RejectReason::Unknown(_)),
        ProtocolError::Validation(_) | ProtocolError::InvalidState(_) => false,
        _ => true,
    }
}

/// Outcome of a successful run across all attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Sessions opened, including the successful one.
    pub attempts: u32,
    /// Data frames acknowledged across all sessions.
    pub frames_acknowledged: u32,
    /// Ping outcome of the last session, if a ping was requested.
    pub ping: Option<PingOutcome>,
    /// Non-standard success codes observed, in order.
    pub unexpected_ack_codes: Vec<u8>,
}

/// A run that gave up.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunError {
    /// Sessions opened before giving up.
    pub attempts: u32,
    /// Data frames acknowledged before giving up.
    pub frames_acknowledged: u32,
    /// Error of the last session.
    #[source]
    pub error: SessionError,
}

/// A configured client: where to connect, who to be, what to send.
#[derive(Debug, Clone)]
pub struct Client {
    /// Collector host name or address.
    pub host: String,
    /// Collector TCP port.
    pub port: u16,
    /// Connect and I/O timeouts.
    pub options: ConnectOptions,
    /// Key and identity presented in every handshake.
    pub credentials: Credentials,
    /// Frames, pacing and ping for the whole run.
    pub plan: ExchangePlan,
    /// Template record; its sequence number is advanced per frame.
    pub sample: TelemetryRecord,
    /// Reconnect policy, `None` when disabled.
    pub reconnect: Option<ReconnectPolicy>,
}

impl Client {
    /// Builds a client from validated configuration.
    ///
    /// Fails if no auth key is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let device_id = config.device_id()?;
        let key = config
            .auth_key()
            .context("No authentication key configured")?;

        let reconnect = config.reconnect.enabled.then(|| ReconnectPolicy {
            max_attempts: config.reconnect.max_attempts,
            base_backoff: Duration::from_millis(config.reconnect.base_backoff_ms),
            max_backoff: Duration::from_millis(config.reconnect.max_backoff_ms),
        });

        Ok(Self {
            host: config.server.host.clone(),
            port: config.server.port,
            options: config.connect_options(),
            credentials: Credentials::new(key, device_id).with_flags(config.flags()),
            plan: config.exchange_plan(),
            sample: config.record.to_record(device_id),
            reconnect,
        })
    }

    /// Sends `plan.frames` records, reconnecting per policy.
    pub fn run(&self) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();

        loop {
            summary.attempts += 1;
            let remaining = self.plan.frames - summary.frames_acknowledged;
            let plan = ExchangePlan {
                frames: remaining,
                ..self.plan
            };
            let first_seq = self
                .sample
                .measurement_seq
                .wrapping_add(summary.frames_acknowledged as u16);

            let (acknowledged, result) = self.attempt(&plan, first_seq);
            summary.frames_acknowledged += acknowledged;

            let error = match result {
                Ok(report) => {
                    summary.ping = report.ping;
                    summary.unexpected_ack_codes.extend(report.unexpected_ack_codes);
                    info!(
                        attempts = summary.attempts,
                        frames = summary.frames_acknowledged,
                        "all frames acknowledged"
                    );
                    return Ok(summary);
                }
                Err(error) => error,
            };

            let policy = match self.reconnect {
                Some(policy) if summary.attempts < policy.max_attempts && is_retryable(&error) => {
                    policy
                }
                _ => {
                    return Err(RunError {
                        attempts: summary.attempts,
                        frames_acknowledged: summary.frames_acknowledged,
                        error,
                    })
                }
            };

            let delay = policy.backoff(summary.attempts);
            warn!(
                attempt = summary.attempts,
                delay_ms = delay.as_millis() as u64,
                %error,
                "session failed, reconnecting"
            );
            std::thread::sleep(delay);
        }
    }

    /// One session; returns frames acknowledged even when it fails.
    fn attempt(
        &self,
        plan: &ExchangePlan,
        first_seq: u16,
    ) -> (u32, std::result::Result<SessionReport, SessionError>) {
        let mut session = match Session::connect(
            &self.host,
            self.port,
            self.credentials.clone(),
            &self.options,
        ) {
            Ok(session) => session,
            Err(error) => return (0, Err(error)),
        };

        let sample = self.sample;
        let result = session.run(plan, |index| {
            sample.with_sequence(first_seq.wrapping_add(index as u16))
        });
        (session.frames_sent(), result)
    }
}
