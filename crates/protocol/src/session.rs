//! One-connection session state machine.
//!
//! ```text
//! Connecting -> Handshaking -> Idle <-> Pinging
//!                               Idle <-> Sending
//! any state  -> Closed   (error or completion)
//! ```
//!
//! A session owns its stream for its whole lifetime and issues at most one
//! request at a time: every frame is followed by a blocking wait for its
//! acknowledgement. Every error is fatal; the stream is released exactly once,
//! on the first error, on [`Session::close`], or on drop.
//!
//! ## Usage
//!
//! ```ignore
//! let mut session = Session::connect("collector.local", 9090, credentials, &options)?;
//! let report = session.run(&ExchangePlan::new(3), |_| record)?;
//! ```

use std::fmt;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ack::{AckCode, Acknowledgement, ACK_SIZE, PING_ACK};
use crate::codec::encode_record_as_some;
use crate::error::ProtocolError;
use crate::framing::{write_frame, FrameType};
use crate::handshake::{build_handshake, exchange_handshake, HandshakeFlags};
use crate::identity::{AuthKey, DeviceId};
use crate::record::TelemetryRecord;

/// Default bound for connecting and for every read or write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// State of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream established, handshake not yet sent.
    Connecting,
    /// Handshake written, waiting for the response byte.
    Handshaking,
    /// Authenticated and ready for the next exchange.
    Idle,
    /// Ping frame written, waiting for its acknowledgement.
    Pinging,
    /// Data frame written, waiting for its acknowledgement.
    Sending,
    /// Stream released. Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Idle => "idle",
            Self::Pinging => "pinging",
            Self::Sending => "sending",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which exchange an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Opening the TCP stream.
    Connect,
    /// Handshake exchange.
    Handshake,
    /// Ping exchange.
    Ping,
    /// Data exchange, numbered from 1.
    Data(u32),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Handshake => f.write_str("handshake"),
            Self::Ping => f.write_str("ping"),
            Self::Data(index) => write!(f, "data frame {}", index),
        }
    }
}

/// A fatal session error tagged with the stage it occurred in.
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct SessionError {
    /// Stage the session was in.
    pub stage: Stage,
    /// Underlying protocol error.
    #[source]
    pub error: ProtocolError,
}

/// Identity and key presented during the handshake.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Pre-shared key the tag is computed with.
    pub key: AuthKey,
    /// Identifier sent in the handshake.
    pub device_id: DeviceId,
    /// Flags byte sent in the handshake.
    pub flags: HandshakeFlags,
}

impl Credentials {
    /// Credentials with empty flags.
    pub fn new(key: AuthKey, device_id: DeviceId) -> Self {
        Self {
            key,
            device_id,
            flags: HandshakeFlags::new(),
        }
    }

    /// Replaces the handshake flags.
    pub fn with_flags(mut self, flags: HandshakeFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Timeouts applied when opening a TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Bound on every blocking read and write.
    pub io_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_TIMEOUT,
            io_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// What a full run should do after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangePlan {
    /// Number of data frames to send.
    pub frames: u32,
    /// Pause between successive data frames (not after the last one).
    pub interval: Duration,
    /// Send one ping before the first data frame.
    pub ping: bool,
}

impl ExchangePlan {
    /// `frames` data frames, no pause, no ping.
    pub fn new(frames: u32) -> Self {
        Self {
            frames,
            interval: Duration::ZERO,
            ping: false,
        }
    }

    /// Sets the pause between data frames.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Enables or disables the ping.
    pub fn with_ping(mut self, ping: bool) -> Self {
        self.ping = ping;
        self
    }
}

/// Result of the best-effort ping exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// Server answered with the exact ping acknowledgement.
    Acknowledged,
    /// Server answered with two other bytes. Reported, not fatal.
    Unexpected([u8; ACK_SIZE]),
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Data frames acknowledged with a success-class acknowledgement.
    pub frames_acknowledged: u32,
    /// Outcome of the ping, if one was requested.
    pub ping: Option<PingOutcome>,
    /// Success-class codes other than the data acknowledgement, in order seen.
    pub unexpected_ack_codes: Vec<u8>,
}

/// A single authenticated connection to the collector.
pub struct Session<S: Read + Write> {
    stream: Option<S>,
    state: SessionState,
    credentials: Credentials,
    pinged: bool,
    frames_sent: u32,
}

impl Session<TcpStream> {
    /// Opens a TCP connection and applies the read/write bound.
    ///
    /// Every resolved address is tried in turn with `connect_timeout`.
    pub fn connect(
        host: &str,
        port: u16,
        credentials: Credentials,
        options: &ConnectOptions,
    ) -> Result<Self, SessionError> {
        let stream = open_stream(host, port, options).map_err(|error| SessionError {
            stage: Stage::Connect,
            error,
        })?;
        info!(host, port, device_id = %credentials.device_id, "connected to collector");
        Ok(Self::new(stream, credentials))
    }
}

fn open_stream(
    host: &str,
    port: u16,
    options: &ConnectOptions,
) -> Result<TcpStream, ProtocolError> {
    let mut last_error = None;

    for addr in (host, port).to_socket_addrs()? {
        debug!(%addr, "connecting");
        match TcpStream::connect_timeout(&addr, options.connect_timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(options.io_timeout))?;
                stream.set_write_timeout(Some(options.io_timeout))?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => e.into(),
        None => ProtocolError::Transport(format!("{}:{} resolved to no addresses", host, port)),
    })
}

impl<S: Read + Write> Session<S> {
    /// Wraps an established stream. The session starts in `Connecting`.
    pub fn new(stream: S, credentials: Credentials) -> Self {
        Self {
            stream: Some(stream),
            state: SessionState::Connecting,
            credentials,
            pinged: false,
            frames_sent: 0,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the number of data frames acknowledged so far.
    pub fn frames_sent(&self) -> u32 {
        self.frames_sent
    }

    /// Returns the credentials presented by this session.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Sends the handshake and waits for acceptance.
    ///
    /// Any rejection or transport failure closes the session.
    pub fn handshake(&mut self) -> Result<(), SessionError> {
        let stage = Stage::Handshake;
        self.expect_state(SessionState::Connecting, stage)?;

        let message = build_handshake(
            &self.credentials.key,
            self.credentials.device_id.as_bytes(),
            self.credentials.flags,
        )
        .map_err(|e| self.fail(stage, e))?;

        self.transition(SessionState::Handshaking);
        let result = self.io(stage, |stream| exchange_handshake(stream, &message))?;
        result.into_result().map_err(|e| self.fail(stage, e))?;

        info!(device_id = %self.credentials.device_id, "handshake accepted");
        self.transition(SessionState::Idle);
        Ok(())
    }

    /// Sends one ping and checks the acknowledgement.
    ///
    /// Allowed once per session. An unexpected but complete acknowledgement
    /// is reported as [`PingOutcome::Unexpected`] and the session stays
    /// usable; transport failures are still fatal.
    pub fn ping(&mut self) -> Result<PingOutcome, SessionError> {
        let stage = Stage::Ping;
        self.expect_state(SessionState::Idle, stage)?;
        if self.pinged {
            return Err(self.fail(
                stage,
                ProtocolError::InvalidState("ping already sent in this session".to_string()),
            ));
        }

        self.transition(SessionState::Pinging);
        let ack = self.io(stage, |stream| {
            write_frame(stream, FrameType::Ping, &[])?;
            Acknowledgement::read_from(stream)
        })?;
        self.pinged = true;

        let bytes = ack.to_bytes();
        let outcome = if bytes == PING_ACK {
            debug!("ping acknowledged");
            PingOutcome::Acknowledged
        } else {
            warn!(bytes = %hex::encode(bytes), "unexpected ping acknowledgement");
            PingOutcome::Unexpected(bytes)
        };

        self.transition(SessionState::Idle);
        Ok(outcome)
    }

    /// Sends one data frame carrying `record` and waits for its acknowledgement.
    ///
    /// Success-class acknowledgements with an unknown code count as success.
    /// An error-class acknowledgement or unrecognised bytes close the session.
    pub fn send_record(&mut self, record: &TelemetryRecord) -> Result<AckCode, SessionError> {
        let stage = Stage::Data(self.frames_sent + 1);
        self.expect_state(SessionState::Idle, stage)?;

        let payload = encode_record_as_some(record);
        self.transition(SessionState::Sending);
        let ack = self.io(stage, |stream| {
            write_frame(stream, FrameType::Data, &payload)?;
            Acknowledgement::read_from(stream)
        })?;

        match ack {
            Acknowledgement::Ack(code) => {
                if code != AckCode::Data {
                    warn!(%stage, code = code.as_byte(), "non-standard acknowledgement code");
                }
                self.frames_sent += 1;
                let m = record.measurements();
                debug!(
                    %stage,
                    seq = record.measurement_seq,
                    temperature_c = m.temperature_c,
                    humidity = m.relative_humidity,
                    pressure_pa = m.pressure_pa,
                    "frame acknowledged"
                );
                self.transition(SessionState::Idle);
                Ok(code)
            }
            Acknowledgement::ServerError(code) => {
                Err(self.fail(stage, ProtocolError::ServerError { code }))
            }
            Acknowledgement::Malformed(bytes) => Err(self.fail(
                stage,
                ProtocolError::ProtocolViolation {
                    bytes: bytes.to_vec(),
                },
            )),
        }
    }

    /// Drives the full lifecycle: handshake (if not done yet), optional ping,
    /// `plan.frames` data exchanges, then close.
    ///
    /// `next_record` is called with the zero-based frame index before each send.
    pub fn run<F>(
        &mut self,
        plan: &ExchangePlan,
        mut next_record: F,
    ) -> Result<SessionReport, SessionError>
    where
        F: FnMut(u32) -> TelemetryRecord,
    {
        if self.state == SessionState::Connecting {
            self.handshake()?;
        }

        let mut report = SessionReport::default();
        if plan.ping {
            report.ping = Some(self.ping()?);
        }

        for index in 0..plan.frames {
            let record = next_record(index);
            let code = self.send_record(&record)?;
            report.frames_acknowledged += 1;
            if code != AckCode::Data {
                report.unexpected_ack_codes.push(code.as_byte());
            }

            if index + 1 < plan.frames && !plan.interval.is_zero() {
                std::thread::sleep(plan.interval);
            }
        }

        self.close();
        info!(frames = report.frames_acknowledged, "session complete");
        Ok(report)
    }

    /// Releases the stream and enters `Closed`. Idempotent.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!(from = %self.state, "stream released");
        }
        self.state = SessionState::Closed;
    }

    fn transition(&mut self, to: SessionState) {
        debug!(from = %self.state, %to, "session state");
        self.state = to;
    }

    fn expect_state(&mut self, expected: SessionState, stage: Stage) -> Result<(), SessionError> {
        if self.state == expected {
            return Ok(());
        }
        let error = ProtocolError::InvalidState(format!(
            "{} requires state {}, session is {}",
            stage, expected, self.state
        ));
        Err(self.fail(stage, error))
    }

    /// Closes the session and tags `error` with its stage.
    fn fail(&mut self, stage: Stage, error: ProtocolError) -> SessionError {
        debug!(%stage, %error, "closing session after error");
        self.close();
        SessionError { stage, error }
    }

    /// Runs one blocking operation on the stream, closing on failure.
    fn io<T, F>(&mut self, stage: Stage, op: F) -> Result<T, SessionError>
    where
        F: FnOnce(&mut S) -> crate::error::Result<T>,
    {
        let outcome = match self.stream.as_mut() {
            Some(stream) => op(stream),
            None => Err(ProtocolError::InvalidState(
                "stream already released".to_string(),
            )),
        };
        outcome.map_err(|e| self.fail(stage, e))
    }
}

impl<S: Read + Write> Drop for Session<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: Read + Write> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("device_id", &self.credentials.device_id)
            .field("frames_sent", &self.frames_sent)
            .finish()
    }
}
