//! The command dispatcher that owns one instrument connection.
//!
//! A [`Session`] wraps exactly one [`Transport`] behind an async mutex so
//! that at most one command pipeline is in flight per physical connection.
//! Concurrent callers either queue on the mutex ([`BusyPolicy::Wait`]) or
//! fail fast with [`Error::SessionBusy`] ([`BusyPolicy::Fail`]).
//!
//! Each exchange moves the session through
//! `Idle -> Sending -> AwaitingResponse -> Idle`; `close()` moves it to the
//! terminal `Closed` state. A timeout fails only the call that timed out:
//! the session remembers that a reply may still be on its way and drains
//! it before the next exchange. The session performs no retries.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use benchlib_core::dispatch::CommandDispatcher;
use benchlib_core::error::{Error, Result};
use benchlib_core::parse::parse_error_entry;
use benchlib_core::transport::Transport;

use crate::protocol::{self, Command, DecodeResult, DEFAULT_TERMINATOR};

/// Largest response accepted before the exchange is abandoned.
const MAX_RESPONSE: usize = 4 * 1024 * 1024;

/// Default time to wait for a query response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time to wait for the trailing read after an action command.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// What a session does when a command arrives while another is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Queue behind the in-flight command.
    #[default]
    Wait,
    /// Fail immediately with [`Error::SessionBusy`].
    Fail,
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Sending = 1,
    AwaitingResponse = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Sending,
            2 => SessionState::AwaitingResponse,
            3 => SessionState::Closed,
            _ => SessionState::Idle,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Sending => "sending",
            SessionState::AwaitingResponse => "awaiting response",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Per-connection quirks and limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Line terminator appended to commands and expected after responses.
    pub terminator: Vec<u8>,
    /// Response timeout for queries.
    pub timeout: Duration,
    /// Behavior when a command is already in flight.
    pub busy_policy: BusyPolicy,
    /// Drain a trailing read after every action command, even if the
    /// transport does not report read-after-write.
    pub drain_after_write: bool,
    /// How long to wait for a trailing read.
    pub drain_timeout: Duration,
    /// Follow every action with `SYST:ERR?` and fail on a non-zero code.
    pub check_device_errors: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            terminator: DEFAULT_TERMINATOR.to_vec(),
            timeout: DEFAULT_TIMEOUT,
            busy_policy: BusyPolicy::Wait,
            drain_after_write: false,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            check_device_errors: false,
        }
    }
}

impl SessionConfig {
    pub fn terminator(mut self, terminator: &[u8]) -> Self {
        self.terminator = terminator.to_vec();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    pub fn drain_after_write(mut self, on: bool) -> Self {
        self.drain_after_write = on;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn check_device_errors(mut self, on: bool) -> Self {
        self.check_device_errors = on;
        self
    }
}

/// Serialized command/response access to one instrument connection.
pub struct Session {
    transport: Mutex<Box<dyn Transport>>,
    state: AtomicU8,
    /// A query timed out and its reply may still arrive.
    stale: AtomicBool,
    config: SessionConfig,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wrap a transport. The session takes exclusive ownership of it.
    pub fn new(transport: Box<dyn Transport>, config: SessionConfig) -> Self {
        Session {
            transport: Mutex::new(transport),
            state: AtomicU8::new(SessionState::Idle as u8),
            stale: AtomicBool::new(false),
            config,
        }
    }

    /// Wrap a transport with [`SessionConfig::default`].
    pub fn with_defaults(transport: Box<dyn Transport>) -> Self {
        Self::new(transport, SessionConfig::default())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    ///
    /// Advisory: another task may change it immediately after it is read.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != SessionState::Closed as u8).then_some(state as u8)
            });
    }

    fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, Box<dyn Transport>>> {
        if self.is_closed() {
            return Err(Error::Disconnected);
        }
        let guard = match self.config.busy_policy {
            BusyPolicy::Wait => self.transport.lock().await,
            BusyPolicy::Fail => self.transport.try_lock().map_err(|_| Error::SessionBusy)?,
        };
        // The session may have been closed while we waited.
        if self.is_closed() {
            return Err(Error::Disconnected);
        }
        Ok(guard)
    }

    /// Send an action command.
    pub async fn command(&self, text: &str) -> Result<()> {
        let mut transport = self.acquire().await.map_err(|e| e.with_command(text))?;
        let result = match self.discard_stale_input(&mut **transport).await {
            Ok(()) => self.run_action(&mut **transport, text).await,
            Err(e) => Err(e),
        };
        self.set_state(SessionState::Idle);
        result.map_err(|e| e.with_command(text))
    }

    /// Send a query and return the trimmed response payload.
    pub async fn query(&self, text: &str) -> Result<String> {
        self.query_inner(text, self.config.timeout, false).await
    }

    /// Send a query with a per-call response timeout.
    pub async fn query_with_timeout(&self, text: &str, timeout: Duration) -> Result<String> {
        self.query_inner(text, timeout, false).await
    }

    /// Send a query, returning the partial payload if the link reaches
    /// end-of-stream before the terminator arrives.
    pub async fn query_allow_incomplete(&self, text: &str) -> Result<String> {
        self.query_inner(text, self.config.timeout, true).await
    }

    /// Dispatch a [`Command`], returning the response for queries.
    pub async fn execute(&self, command: &Command) -> Result<Option<String>> {
        if command.expects_response() {
            self.query(command.text()).await.map(Some)
        } else {
            self.command(command.text()).await.map(|()| None)
        }
    }

    async fn query_inner(
        &self,
        text: &str,
        timeout: Duration,
        allow_incomplete: bool,
    ) -> Result<String> {
        let mut transport = self.acquire().await.map_err(|e| e.with_command(text))?;
        let result = match self.discard_stale_input(&mut **transport).await {
            Ok(()) => {
                self.run_query(&mut **transport, text, timeout, allow_incomplete)
                    .await
            }
            Err(e) => Err(e),
        };
        self.set_state(SessionState::Idle);
        result.map_err(|e| e.with_command(text))
    }

    async fn run_query(
        &self,
        transport: &mut dyn Transport,
        text: &str,
        timeout: Duration,
        allow_incomplete: bool,
    ) -> Result<String> {
        self.send(transport, text).await?;
        let response = self.read_response(transport, timeout, allow_incomplete).await;
        match &response {
            Ok(payload) => trace!(command = %text, response = %payload, "query complete"),
            Err(Error::Timeout) => {
                self.stale.store(true, Ordering::Release);
                debug!(command = %text, "query timed out");
            }
            Err(e) => debug!(command = %text, error = %e, "query failed"),
        }
        response
    }

    async fn run_action(&self, transport: &mut dyn Transport, text: &str) -> Result<()> {
        self.send(transport, text).await?;

        if transport.read_after_write() || self.config.drain_after_write {
            match self
                .read_response(transport, self.config.drain_timeout, false)
                .await
            {
                Ok(payload) if !payload.is_empty() => {
                    debug!(command = %text, response = %payload, "discarded trailing response");
                }
                Ok(_) | Err(Error::Timeout) | Err(Error::IncompleteResponse { .. }) => {
                    trace!(command = %text, "trailing read drained");
                }
                Err(e) => return Err(e),
            }
        }

        if self.config.check_device_errors {
            self.check_device_error(transport).await?;
        }
        Ok(())
    }

    async fn check_device_error(&self, transport: &mut dyn Transport) -> Result<()> {
        self.send(transport, "SYST:ERR?").await?;
        let response = self
            .read_response(transport, self.config.timeout, false)
            .await
            .inspect_err(|e| {
                if matches!(e, Error::Timeout) {
                    self.stale.store(true, Ordering::Release);
                }
            })?;
        let (code, message) = parse_error_entry(&response)?;
        if code != 0 {
            warn!(code, message = %message, "instrument reported an error");
            return Err(Error::DeviceReportedError { code, message });
        }
        Ok(())
    }

    /// Throw away whatever a timed-out query left behind.
    ///
    /// Waits up to the response timeout for the late reply to start, then
    /// keeps reading in drain-timeout steps until the link goes quiet.
    async fn discard_stale_input(&self, transport: &mut dyn Transport) -> Result<()> {
        if !self.stale.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.set_state(SessionState::AwaitingResponse);
        let mut chunk = [0u8; 1024];
        let mut discarded = 0usize;
        let mut wait = self.config.timeout.max(self.config.drain_timeout);
        loop {
            match transport.receive(&mut chunk, wait).await {
                Ok(0) | Err(Error::Timeout) => break,
                Ok(n) => {
                    trace!(bytes = ?&chunk[..n], "discarding late reply");
                    discarded += n;
                    if discarded > MAX_RESPONSE {
                        break;
                    }
                    wait = self.config.drain_timeout;
                }
                Err(e) => {
                    self.set_state(SessionState::Idle);
                    return Err(e);
                }
            }
        }
        if discarded > 0 {
            debug!(bytes = discarded, "discarded late reply to a timed-out query");
        }
        Ok(())
    }

    async fn send(&self, transport: &mut dyn Transport, text: &str) -> Result<()> {
        self.set_state(SessionState::Sending);
        let frame = protocol::encode_command(text, &self.config.terminator);
        trace!(bytes = ?&frame[..], "sending");
        transport.send(&frame).await
    }

    /// Read until a terminated response arrives or the deadline passes.
    async fn read_response(
        &self,
        transport: &mut dyn Transport,
        timeout: Duration,
        allow_incomplete: bool,
    ) -> Result<String> {
        self.set_state(SessionState::AwaitingResponse);
        let deadline = Instant::now() + timeout;
        let mut buf = BytesMut::new();
        let mut chunk = [0u8; 1024];

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }

            let n = transport.receive(&mut chunk, deadline - now).await?;
            if n == 0 {
                if allow_incomplete {
                    debug!(len = buf.len(), "accepting truncated response");
                    return payload_text(&buf);
                }
                return Err(Error::IncompleteResponse {
                    partial: buf.to_vec(),
                });
            }

            trace!(bytes = ?&chunk[..n], "received");
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > MAX_RESPONSE {
                return Err(Error::malformed(
                    format!("<{} bytes>", buf.len()),
                    "response exceeds maximum length",
                ));
            }

            match protocol::decode_response(&buf, &self.config.terminator) {
                DecodeResult::Response { payload, consumed } => {
                    if consumed < buf.len() {
                        debug!(
                            extra = buf.len() - consumed,
                            "discarding bytes after response"
                        );
                    }
                    return payload_text(&payload);
                }
                DecodeResult::Incomplete => {}
            }
        }
    }

    /// Selected device clear on the transport.
    pub async fn device_clear(&self) -> Result<()> {
        let mut transport = self.acquire().await?;
        debug!("device clear");
        transport.device_clear().await
    }

    /// Return the instrument's front panel to local control.
    pub async fn go_to_local(&self) -> Result<()> {
        let mut transport = self.acquire().await?;
        transport.go_to_local().await
    }

    /// Lock out the instrument's front panel.
    pub async fn local_lockout(&self) -> Result<()> {
        let mut transport = self.acquire().await?;
        transport.local_lockout().await
    }

    /// Close the transport and enter the terminal `Closed` state.
    ///
    /// Waits for any in-flight command. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        if self.is_closed() {
            return Ok(());
        }
        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
        info!("session closed");
        transport.close().await
    }
}

fn payload_text(payload: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(payload).map_err(|_| {
        Error::malformed(
            String::from_utf8_lossy(payload),
            "response is not valid UTF-8",
        )
    })?;
    Ok(protocol::trim_payload(text).to_string())
}

#[async_trait]
impl CommandDispatcher for Session {
    async fn command(&self, text: &str) -> Result<()> {
        Session::command(self, text).await
    }

    async fn query(&self, text: &str) -> Result<String> {
        Session::query(self, text).await
    }

    async fn query_with_timeout(&self, text: &str, timeout: Duration) -> Result<String> {
        Session::query_with_timeout(self, text, timeout).await
    }

    async fn query_allow_incomplete(&self, text: &str) -> Result<String> {
        Session::query_allow_incomplete(self, text).await
    }
}
