//! Mock transport for deterministic testing of sessions and drivers.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. This lets you test command generation, framing
//! and response parsing without real hardware.
//!
//! # Example
//!
//! ```
//! use benchlib_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // Pre-load: when the session sends this request, return this response.
//! mock.expect(b"*IDN?\n", b"Agilent Technologies,33220A,MY44036372,2.02-2.02-22-2\n");
//! // An action command: no response.
//! mock.expect_send(b"OUTP ON\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use benchlib_core::error::{Error, Result};
use benchlib_core::transport::Transport;

use crate::wire_log::WireLog;

/// What the mock does after a matching request.
#[derive(Debug, Clone)]
enum Reply {
    /// Return these bytes from subsequent `receive()` calls.
    Bytes(Vec<u8>),
    /// Return these bytes, then signal end-of-stream with `Ok(0)`.
    Truncated(Vec<u8>),
    /// Nothing comes back; `receive()` times out.
    Silent,
}

/// A pre-loaded request/reply pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    reply: Reply,
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation. The
/// corresponding response is then returned by the following `receive()`
/// calls.
///
/// If no expectation matches or the queue is exhausted, `send()` fails with
/// [`Error::Transport`].
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/reply pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes pending for the next `receive()` calls.
    pending: VecDeque<u8>,
    /// Signal end-of-stream once `pending` is drained.
    eof_after_pending: bool,
    /// Whether the transport is "connected".
    connected: bool,
    read_after_write: bool,
    serial: bool,
    /// Log of all bytes sent through this transport.
    sent_log: WireLog,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            pending: VecDeque::new(),
            eof_after_pending: false,
            connected: true,
            read_after_write: false,
            serial: false,
            sent_log: WireLog::new(),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, the subsequent
    /// `receive()` calls return `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply: Reply::Bytes(response.to_vec()),
        });
    }

    /// Expect a request that gets no response.
    pub fn expect_send(&mut self, request: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply: Reply::Silent,
        });
    }

    /// Expect a request whose response is cut short: `partial` is delivered
    /// and then the link reports end-of-stream.
    pub fn expect_partial(&mut self, request: &[u8], partial: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply: Reply::Truncated(partial.to_vec()),
        });
    }

    /// Make the mock report that it reads after every write.
    pub fn set_read_after_write(&mut self, on: bool) {
        self.read_after_write = on;
    }

    /// Make the mock report itself as a direct serial link.
    pub fn set_serial(&mut self, on: bool) {
        self.serial = on;
    }

    /// A handle to the log of sent data that stays valid after the mock is
    /// moved into a session.
    pub fn wire_log(&self) -> WireLog {
        self.sent_log.clone()
    }

    /// Return all data that has been sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.sent_log.entries()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::Disconnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::Disconnected);
        }

        // Record what was sent.
        self.sent_log.record(data);

        // Match against the next expectation.
        let expectation = self
            .expectations
            .pop_front()
            .ok_or_else(|| Error::Transport("no more expectations in mock transport".into()))?;
        if data != expectation.request.as_slice() {
            return Err(Error::Transport(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            )));
        }
        match expectation.reply {
            Reply::Bytes(b) => self.pending.extend(b),
            Reply::Truncated(b) => {
                self.pending.extend(b);
                self.eof_after_pending = true;
            }
            Reply::Silent => {}
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::Disconnected);
        }

        if self.pending.is_empty() {
            if self.eof_after_pending {
                self.eof_after_pending = false;
                return Ok(0);
            }
            return Err(Error::Timeout);
        }
        let n = self.pending.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending.clear();
        self.eof_after_pending = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_after_write(&self) -> bool {
        self.read_after_write
    }

    fn is_serial(&self) -> bool {
        self.serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_basic_send_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"FREQ?\n", b"+1.000000000000000E+03\n");

        mock.send(b"FREQ?\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"+1.000000000000000E+03\n");
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        let log = mock.wire_log();
        mock.expect_send(b"OUTP ON\n");
        mock.expect_send(b"OUTP OFF\n");

        mock.send(b"OUTP ON\n").await.unwrap();
        mock.send(b"OUTP OFF\n").await.unwrap();

        assert_eq!(mock.sent_data().len(), 2);
        assert_eq!(log.lines(), vec!["OUTP ON", "OUTP OFF"]);
    }

    #[tokio::test]
    async fn mock_transport_wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(b"*IDN?\n", b"x\n");

        let result = mock.send(b"*RST\n").await;
        assert!(matches!(result.unwrap_err(), Error::Transport(_)));
    }

    #[tokio::test]
    async fn mock_transport_no_expectations_errors() {
        let mut mock = MockTransport::new();
        let result = mock.send(b"*RST\n").await;
        assert!(matches!(result.unwrap_err(), Error::Transport(_)));
    }

    #[tokio::test]
    async fn mock_transport_silent_reply_times_out() {
        let mut mock = MockTransport::new();
        mock.expect_send(b"VOLT 5\n");
        mock.send(b"VOLT 5\n").await.unwrap();

        let mut buf = [0u8; 64];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[tokio::test]
    async fn mock_transport_partial_then_eof() {
        let mut mock = MockTransport::new();
        mock.expect_partial(b"READ?\n", b"+1.23");
        mock.send(b"READ?\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"+1.23");
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(n, 0);
        // End-of-stream is reported once.
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        let result = mock.send(b"*RST\n").await;
        assert!(matches!(result.unwrap_err(), Error::Disconnected));

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::Disconnected));
    }

    #[tokio::test]
    async fn mock_transport_remaining_expectations() {
        let mut mock = MockTransport::new();
        mock.expect(b"A?\n", b"1\n");
        mock.expect_send(b"B 1\n");
        assert_eq!(mock.remaining_expectations(), 2);

        mock.send(b"A?\n").await.unwrap();
        assert_eq!(mock.remaining_expectations(), 1);
    }

    #[tokio::test]
    async fn mock_transport_partial_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"X?\n", b"ABCD");
        mock.send(b"X?\n").await.unwrap();

        // Read with a buffer smaller than the response.
        let mut buf = [0u8; 2];
        let n = mock.receive(&mut buf, Duration::from_millis(100)).await.unwrap();
        assert_eq!(&buf[..n], b"AB");
        let n = mock.receive(&mut buf, Duration::from_millis(100)).await.unwrap();
        assert_eq!(&buf[..n], b"CD");
    }

    #[test]
    fn read_after_write_flag() {
        let mut mock = MockTransport::new();
        assert!(!mock.read_after_write());
        mock.set_read_after_write(true);
        assert!(mock.read_after_write());
    }
}
