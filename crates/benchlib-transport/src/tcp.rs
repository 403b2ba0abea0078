//! LXI raw-socket transport.
//!
//! This module provides [`TcpTransport`], which implements the [`Transport`]
//! trait for LAN instruments that accept SCPI on a raw TCP socket (LXI
//! "SCPI-RAW", port 5025 by convention). Keysight InfiniiVision scopes,
//! 3446x DMMs and Kikusui PMX supplies all listen there.
//!
//! # Example
//!
//! ```no_run
//! use benchlib_transport::TcpTransport;
//! use benchlib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let mut transport = TcpTransport::connect("192.168.1.50", 5025).await?;
//! transport.send(b"*IDN?\n").await?;
//!
//! let mut buf = [0u8; 4096];
//! let n = transport.receive(&mut buf, Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use benchlib_core::error::{Error, Result};
use benchlib_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub use benchlib_core::resource::DEFAULT_SOCKET_PORT;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw TCP socket transport.
///
/// The connection is established eagerly by
/// [`connect`](TcpTransport::connect). End-of-stream from the peer is
/// reported as [`Error::Disconnected`]: an LXI instrument never closes the
/// socket mid-session.
#[derive(Debug)]
pub struct TcpTransport {
    /// `None` after `close()`.
    stream: Option<TcpStream>,
    /// `host:port`, for logging.
    addr: String,
}

impl TcpTransport {
    /// Connect to `host:port` with the default timeout.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_addr(&format!("{host}:{port}"), DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a `host:port` string with a specific timeout.
    pub async fn connect_addr(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "connecting to instrument socket"
        );

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Connection(format!("timed out connecting to {addr}"))
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "TCP connection failed");
                Error::Connection(format!("failed to connect to {addr}: {e}"))
            })?;

        // Commands are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        tracing::info!(addr = %addr, "instrument socket connected");

        Ok(Self {
            stream: Some(stream),
            addr: addr.to_string(),
        })
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        Self {
            stream: Some(stream),
            addr,
        }
    }

    /// The `host:port` this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::Disconnected)?;

        tracing::trace!(addr = %self.addr, bytes = data.len(), data = ?data, "sending data");

        stream.write_all(data).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "failed to send data");
            map_io_error(e)
        })?;
        stream.flush().await.map_err(map_io_error)?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::Disconnected)?;

        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::warn!(addr = %self.addr, "peer closed connection");
                Err(Error::Disconnected)
            }
            Ok(Ok(n)) => {
                tracing::trace!(addr = %self.addr, bytes = n, data = ?&buf[..n], "received data");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(addr = %self.addr, error = %e, "failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "failed to shut down socket (continuing anyway)"
                );
            }
            tracing::info!(addr = %self.addr, "instrument socket closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::Disconnected,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_test_harness::MockTcpServer;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn scpi_exchange_over_socket() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect(b"*IDN?\n", b"KEYSIGHT TECHNOLOGIES,DSOX3024T,MY1,07.50\n");
        server.expect(b"*RST\n", b"");
        let port = server.port();
        server.start();

        let mut transport = TcpTransport::connect("127.0.0.1", port).await.unwrap();
        transport.send(b"*IDN?\n").await.unwrap();
        let mut buf = [0u8; 128];
        let n = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(buf[..n].starts_with(b"KEYSIGHT"));
        transport.send(b"*RST\n").await.unwrap();

        transport.close().await.unwrap();
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpTransport::connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn receive_timeout_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::connect_addr(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let result = transport.receive(&mut buf, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(transport.is_connected());

        server.abort();
    }

    #[tokio::test]
    async fn peer_hang_up_is_disconnect() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect_then_hang_up(b"SYST:REM\n", b"");
        let addr = server.addr().to_string();
        server.start();

        let mut transport = TcpTransport::connect_addr(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        transport.send(b"SYST:REM\n").await.unwrap();
        server.wait().await.unwrap();

        let mut buf = [0u8; 16];
        let result = transport.receive(&mut buf, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::Disconnected)), "got {result:?}");
    }

    #[tokio::test]
    async fn io_after_close_is_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut transport = TcpTransport::connect_addr(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(transport.addr(), addr);
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        assert!(matches!(transport.send(b"x").await, Err(Error::Disconnected)));
        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.receive(&mut buf, Duration::from_millis(10)).await,
            Err(Error::Disconnected)
        ));
        server.abort();
    }
}
