//! Transport trait for instrument communication.
//!
//! The [`Transport`] trait abstracts over the physical link to an
//! instrument. Implementations exist for serial ports, LXI TCP sockets,
//! USB-TMC, VISA-delegated resources, GPIB devices behind a serial-attached
//! controller, and mock transports for testing.
//!
//! The session layer in `benchlib-scpi` operates on a `Transport` rather than
//! on a concrete port, enabling both real hardware control and deterministic
//! unit testing with the doubles in `benchlib-test-harness`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};

/// Asynchronous byte-level transport to an instrument.
///
/// Implementations handle framing, buffering, and error recovery at the
/// physical layer. Command termination, query/response pairing, and error
/// classification are handled by the session that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the instrument.
    ///
    /// Implementations should block until all bytes have been written to
    /// the underlying link, looping over partial writes.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the instrument into the provided buffer.
    ///
    /// Returns the number of bytes read. Will wait up to `timeout` for data
    /// to arrive; returns [`Error::Timeout`] if nothing is received within
    /// the deadline. `Ok(0)` signals end-of-stream.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// Idempotent. After `close()`, subsequent `send()` and `receive()`
    /// calls return [`Error::Disconnected`].
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Whether the link automatically reads after every write.
    ///
    /// When `true`, action commands (which produce no response) leave a
    /// trailing read that the session must drain.
    fn read_after_write(&self) -> bool {
        false
    }

    /// Whether this is a direct RS-232 link to the instrument.
    ///
    /// Some instruments ignore remote commands on their serial port until
    /// they are put into remote mode.
    fn is_serial(&self) -> bool {
        false
    }

    /// Issue a selected device clear on the link.
    async fn device_clear(&mut self) -> Result<()> {
        Err(Error::not_supported("device clear on this transport"))
    }

    /// Return the instrument to local (front panel) control.
    async fn go_to_local(&mut self) -> Result<()> {
        Err(Error::not_supported("go to local on this transport"))
    }

    /// Lock out the instrument's front panel.
    async fn local_lockout(&mut self) -> Result<()> {
        Err(Error::not_supported("local lockout on this transport"))
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        (**self).send(data).await
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).receive(buf, timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn read_after_write(&self) -> bool {
        (**self).read_after_write()
    }

    fn is_serial(&self) -> bool {
        (**self).is_serial()
    }

    async fn device_clear(&mut self) -> Result<()> {
        (**self).device_clear().await
    }

    async fn go_to_local(&mut self) -> Result<()> {
        (**self).go_to_local().await
    }

    async fn local_lockout(&mut self) -> Result<()> {
        (**self).local_lockout().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loopback {
        buf: Vec<u8>,
        open: bool,
    }

    #[async_trait]
    impl Transport for Loopback {
        async fn send(&mut self, data: &[u8]) -> Result<()> {
            if !self.open {
                return Err(Error::Disconnected);
            }
            self.buf.extend_from_slice(data);
            Ok(())
        }

        async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            if self.buf.is_empty() {
                return Err(Error::Timeout);
            }
            let n = self.buf.len().min(buf.len());
            buf[..n].copy_from_slice(&self.buf[..n]);
            self.buf.drain(..n);
            Ok(n)
        }

        async fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.open
        }
    }

    #[tokio::test]
    async fn default_quirks() {
        let mut t = Loopback {
            buf: Vec::new(),
            open: true,
        };
        assert!(!t.read_after_write());
        assert!(!t.is_serial());
        assert!(t.device_clear().await.unwrap_err().is_not_supported());
        assert!(t.go_to_local().await.unwrap_err().is_not_supported());
        assert!(t.local_lockout().await.unwrap_err().is_not_supported());
    }

    #[tokio::test]
    async fn boxed_transport_delegates() {
        let mut t: Box<dyn Transport> = Box::new(Loopback {
            buf: Vec::new(),
            open: true,
        });
        t.send(b"*IDN?\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = t.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"*IDN?\n");

        t.close().await.unwrap();
        assert!(!t.is_connected());
        assert!(matches!(t.send(b"x").await, Err(Error::Disconnected)));
    }
}
