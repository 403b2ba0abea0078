//! Mock TCP server for socket-level testing.
//!
//! [`MockTcpServer`] provides a localhost TCP listener pre-loaded with
//! scripted responses, enabling deterministic testing of LXI socket
//! transports without a real instrument on the network.
//!
//! # Example
//!
//! ```
//! use benchlib_test_harness::MockTcpServer;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let mut server = MockTcpServer::new().await?;
//!
//! // When the client sends "*IDN?\n", respond with an identity string.
//! server.expect(b"*IDN?\n", b"KIKUSUI,PMX18-5A,AB123456,IFC01.52\n");
//!
//! // Get the address to connect a TcpTransport to
//! let addr = server.addr().to_string();
//! server.start();
//! // ... connect and test ...
//! # Ok(())
//! # }
//! ```

use benchlib_core::error::{Error, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A pre-loaded request/response pair for the mock TCP server.
#[derive(Debug, Clone)]
struct TcpExpectation {
    /// The exact bytes we expect the client to send.
    request: Vec<u8>,
    /// The bytes to send back when the matching request is received.
    response: Vec<u8>,
    /// Close the connection after replying.
    hang_up: bool,
}

/// A mock TCP server for testing socket transports.
///
/// The server listens on a random available port on localhost. Once
/// [`start`](MockTcpServer::start) is called, it accepts a single
/// connection and processes expectations in order: for each expected
/// request, it reads from the client and writes back the corresponding
/// response.
///
/// If the client sends data that does not match the next expectation,
/// the server closes the connection and [`wait`](MockTcpServer::wait)
/// reports the mismatch.
pub struct MockTcpServer {
    /// The address the server is listening on (e.g., "127.0.0.1:54321").
    addr: String,
    listener: Option<TcpListener>,
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<TcpExpectation>,
    /// Handle to the server task once started.
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockTcpServer {
    /// Create a new mock TCP server listening on a random port.
    ///
    /// Connections are queued by the OS but not served until
    /// [`start`](MockTcpServer::start) is called, so expectations can be
    /// loaded first.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Connection(format!("failed to bind mock TCP server: {e}")))?;
        let addr = listener.local_addr()?.to_string();
        Ok(Self {
            addr,
            listener: Some(listener),
            expectations: VecDeque::new(),
            server_handle: None,
        })
    }

    /// Add an expected request/response pair.
    ///
    /// Expectations are consumed in order. When the connected client sends
    /// bytes matching `request`, the server replies with `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: response.to_vec(),
            hang_up: false,
        });
    }

    /// Add an expectation after which the server sends `response` and then
    /// closes the connection.
    pub fn expect_then_hang_up(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: response.to_vec(),
            hang_up: true,
        });
    }

    /// Get the address the server is listening on.
    ///
    /// Use this to connect a `TcpTransport` to the mock server.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The port the server is listening on.
    pub fn port(&self) -> u16 {
        self.addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }

    /// Start serving: accept a single client connection and process all
    /// expectations.
    ///
    /// This spawns a background task. Call [`wait`](MockTcpServer::wait) to
    /// block until all expectations have been processed and check for errors.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let expectations: Vec<TcpExpectation> = self.expectations.drain(..).collect();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {e}"))?;

            for (i, expectation) in expectations.iter().enumerate() {
                let mut buf = vec![0u8; expectation.request.len()];
                let mut total_read = 0;

                // Read exactly the expected number of bytes
                while total_read < expectation.request.len() {
                    let n = stream
                        .read(&mut buf[total_read..])
                        .await
                        .map_err(|e| format!("expectation {i}: read error: {e}"))?;
                    if n == 0 {
                        return Err(format!(
                            "expectation {i}: client disconnected after {total_read} bytes (expected {})",
                            expectation.request.len()
                        ));
                    }
                    total_read += n;
                }

                if buf != expectation.request {
                    return Err(format!(
                        "expectation {i}: request mismatch: expected {:?}, got {:?}",
                        String::from_utf8_lossy(&expectation.request),
                        String::from_utf8_lossy(&buf)
                    ));
                }

                stream
                    .write_all(&expectation.response)
                    .await
                    .map_err(|e| format!("expectation {i}: write error: {e}"))?;

                stream
                    .flush()
                    .await
                    .map_err(|e| format!("expectation {i}: flush error: {e}"))?;

                if expectation.hang_up {
                    return Ok(());
                }
            }

            Ok(())
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to complete and return any errors.
    ///
    /// Call this after the client has finished its interactions to verify
    /// that all expectations were met.
    pub async fn wait(self) -> std::result::Result<(), String> {
        if let Some(handle) = self.server_handle {
            handle
                .await
                .map_err(|e| format!("server task panicked: {e}"))?
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn serves_scripted_exchange() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect(b"*IDN?\n", b"ACME,1,2,3\n");
        let addr = server.addr().to_string();
        assert!(server.port() > 0);
        server.start();

        let mut client = TcpStream::connect(&addr).await.unwrap();
        client.write_all(b"*IDN?\n").await.unwrap();
        let mut buf = [0u8; 32];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ACME,1,2,3\n");
        drop(client);

        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn reports_mismatch() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect(b"*IDN?\n", b"x\n");
        let addr = server.addr().to_string();
        server.start();

        let mut client = TcpStream::connect(&addr).await.unwrap();
        client.write_all(b"*RST\n").await.unwrap();
        client.write_all(b"x").await.unwrap();

        let err = server.wait().await.unwrap_err();
        assert!(err.contains("request mismatch"));
    }
}
