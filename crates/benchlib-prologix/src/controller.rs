//! The GPIB controller and the per-address devices multiplexed over it.
//!
//! A [`Controller`] owns the serial transport to the adapter. Every
//! [`GpibDevice`] it hands out shares that transport through one async
//! mutex, so addressing and traffic for all addresses on the bus go through
//! a single serialized path. The controller remembers which address is
//! currently selected and only emits `++addr` when it changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use benchlib_core::error::{Error, Result};
use benchlib_core::parse::parse_i64;
use benchlib_core::transport::Transport;

use crate::protocol::{self, Directive, Eos};

/// Settings applied when the controller is initialized.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// `++auto 1`: the adapter reads after every write.
    pub auto_read: bool,
    /// Assert EOI with the last byte of each write.
    pub eoi: bool,
    /// Terminator the adapter appends to forwarded data.
    pub eos: Eos,
    /// Adapter-side read timeout (`++read_tmo_ms`), 1..=3000 ms.
    pub read_timeout: Duration,
    /// Pulse IFC during initialization.
    pub interface_clear: bool,
    /// How long to wait for replies to `++ver`, `++srq` and `++spoll`.
    pub reply_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            auto_read: false,
            eoi: true,
            eos: Eos::Lf,
            read_timeout: Duration::from_millis(500),
            interface_clear: false,
            reply_timeout: Duration::from_secs(1),
        }
    }
}

impl ControllerConfig {
    pub fn auto_read(mut self, on: bool) -> Self {
        self.auto_read = on;
        self
    }

    pub fn eoi(mut self, on: bool) -> Self {
        self.eoi = on;
        self
    }

    pub fn eos(mut self, eos: Eos) -> Self {
        self.eos = eos;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn interface_clear(mut self, on: bool) -> Self {
        self.interface_clear = on;
        self
    }

    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }
}

/// Primary plus optional secondary address.
type Address = (u8, Option<u8>);

struct Link {
    transport: Box<dyn Transport>,
    /// Currently addressed device; `None` forces the next use to
    /// re-address.
    addressed: Option<Address>,
}

impl Link {
    async fn directive(&mut self, directive: Directive) -> Result<()> {
        let frame = directive.encode();
        trace!(directive = ?directive, "controller directive");
        if let Err(e) = self.transport.send(&frame).await {
            self.addressed = None;
            return Err(e);
        }
        Ok(())
    }

    async fn select(&mut self, address: Address) -> Result<()> {
        if self.addressed == Some(address) {
            return Ok(());
        }
        let (primary, secondary) = address;
        self.directive(Directive::Address { primary, secondary })
            .await?;
        self.addressed = Some(address);
        debug!(addr = primary, secondary = ?secondary, "addressed GPIB device");
        Ok(())
    }

    /// Read one LF-terminated reply from the adapter itself.
    async fn reply(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut buf = BytesMut::new();
        let mut chunk = [0u8; 128];
        loop {
            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line = String::from_utf8_lossy(&buf[..pos]);
                return Ok(line.trim().to_string());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let n = self.transport.receive(&mut chunk, deadline - now).await?;
            if n == 0 {
                return Err(Error::IncompleteResponse {
                    partial: buf.to_vec(),
                });
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Send `directive` and read the adapter's answer if it gives one.
    async fn exchange(&mut self, directive: Directive, timeout: Duration) -> Result<Option<String>> {
        self.directive(directive).await?;
        if !directive.has_reply() {
            return Ok(None);
        }
        self.reply(timeout).await.map(Some)
    }

    async fn query(&mut self, directive: Directive, timeout: Duration) -> Result<String> {
        self.exchange(directive, timeout)
            .await?
            .ok_or_else(|| Error::InvalidParameter(format!("{directive:?} has no reply")))
    }
}

struct Shared {
    link: Mutex<Link>,
    auto_read: AtomicBool,
    reply_timeout: Duration,
}

/// A Prologix-style GPIB controller reached through a serial transport.
///
/// Cloning is cheap; clones share the same adapter.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    /// Initialize the adapter and take ownership of its transport.
    ///
    /// Sends `++mode 1`, `++auto`, `++eoi`, `++eos`, `++read_tmo_ms` and,
    /// when configured, `++ifc`.
    pub async fn new(transport: Box<dyn Transport>, config: ControllerConfig) -> Result<Self> {
        let read_ms = protocol::check_read_timeout(config.read_timeout.as_millis() as u64)?;
        let mut link = Link {
            transport,
            addressed: None,
        };
        link.directive(Directive::ControllerMode).await?;
        link.directive(Directive::Auto(config.auto_read)).await?;
        link.directive(Directive::Eoi(config.eoi)).await?;
        link.directive(Directive::Eos(config.eos)).await?;
        link.directive(Directive::ReadTimeout(read_ms)).await?;
        if config.interface_clear {
            link.directive(Directive::InterfaceClear).await?;
        }
        info!(auto_read = config.auto_read, read_timeout_ms = read_ms, "GPIB controller initialized");

        Ok(Controller {
            shared: Arc::new(Shared {
                link: Mutex::new(link),
                auto_read: AtomicBool::new(config.auto_read),
                reply_timeout: config.reply_timeout,
            }),
        })
    }

    /// A transport for the device at `address`.
    pub fn device(&self, address: u8) -> Result<GpibDevice> {
        self.device_at(address, None)
    }

    /// A transport for the device at `address` with a secondary address.
    pub fn device_at(&self, address: u8, secondary: Option<u8>) -> Result<GpibDevice> {
        let primary = protocol::check_address(address)?;
        let secondary = secondary.map(protocol::check_address).transpose()?;
        Ok(GpibDevice {
            shared: Arc::clone(&self.shared),
            address: (primary, secondary),
            read_pending: false,
            connected: true,
        })
    }

    /// The adapter's version string (`++ver`).
    pub async fn version(&self) -> Result<String> {
        let mut link = self.shared.link.lock().await;
        link.query(Directive::Version, self.shared.reply_timeout)
            .await
    }

    /// Send a raw controller directive, returning its reply for `++ver`,
    /// `++srq` and `++spoll`.
    ///
    /// Directives that change addressing go through [`GpibDevice`];
    /// sending `++addr` here makes the next device use re-address.
    pub async fn directive(&self, directive: Directive) -> Result<Option<String>> {
        let mut link = self.shared.link.lock().await;
        if matches!(directive, Directive::Address { .. }) {
            link.addressed = None;
        }
        link.exchange(directive, self.shared.reply_timeout).await
    }

    /// The address the adapter currently has selected.
    pub async fn current_address(&self) -> Option<u8> {
        self.shared.link.lock().await.addressed.map(|(p, _)| p)
    }

    /// Change the adapter-side read timeout.
    pub async fn set_read_timeout(&self, timeout: Duration) -> Result<()> {
        let ms = protocol::check_read_timeout(timeout.as_millis() as u64)?;
        let mut link = self.shared.link.lock().await;
        link.directive(Directive::ReadTimeout(ms)).await
    }

    /// Toggle `++auto`. With it on, devices report read-after-write.
    pub async fn set_auto_read(&self, on: bool) -> Result<()> {
        let mut link = self.shared.link.lock().await;
        link.directive(Directive::Auto(on)).await?;
        self.shared.auto_read.store(on, Ordering::Release);
        Ok(())
    }

    pub fn auto_read(&self) -> bool {
        self.shared.auto_read.load(Ordering::Acquire)
    }

    /// Whether any device is asserting SRQ.
    pub async fn srq_asserted(&self) -> Result<bool> {
        let mut link = self.shared.link.lock().await;
        let reply = link
            .query(Directive::Srq, self.shared.reply_timeout)
            .await?;
        match reply.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            _ => Err(Error::malformed(reply, "expected 0 or 1")),
        }
    }

    /// Serial poll the device at `address` and return its status byte.
    pub async fn serial_poll(&self, address: u8) -> Result<u8> {
        let primary = protocol::check_address(address)?;
        let mut link = self.shared.link.lock().await;
        let reply = link
            .query(
                Directive::SerialPoll {
                    primary,
                    secondary: None,
                },
                self.shared.reply_timeout,
            )
            .await?;
        let value = parse_i64(&reply)?;
        u8::try_from(value).map_err(|_| Error::malformed(reply, "status byte out of range"))
    }

    /// Pulse the interface clear line.
    pub async fn interface_clear(&self) -> Result<()> {
        let mut link = self.shared.link.lock().await;
        link.directive(Directive::InterfaceClear).await
    }

    /// Return the device at `address` to local control (`enabled`), or lock
    /// out its front panel.
    pub async fn front_panel(&self, address: u8, enabled: bool) -> Result<()> {
        let primary = protocol::check_address(address)?;
        let mut link = self.shared.link.lock().await;
        link.select((primary, None)).await?;
        let directive = if enabled {
            Directive::Local
        } else {
            Directive::LocalLockout
        };
        link.directive(directive).await
    }

    /// Close the adapter's transport. Devices fail with `Disconnected`
    /// afterwards.
    pub async fn close(&self) -> Result<()> {
        let mut link = self.shared.link.lock().await;
        link.addressed = None;
        link.transport.close().await
    }
}

/// One instrument on the bus, usable as a [`Transport`].
///
/// With `++auto 0`, the first read after a write issues `++read eoi`.
pub struct GpibDevice {
    shared: Arc<Shared>,
    address: Address,
    read_pending: bool,
    connected: bool,
}

impl GpibDevice {
    /// Primary GPIB address.
    pub fn address(&self) -> u8 {
        self.address.0
    }

    pub fn secondary_address(&self) -> Option<u8> {
        self.address.1
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }

    async fn addressed_directive(&mut self, directive: Directive) -> Result<()> {
        self.check_connected()?;
        let mut link = self.shared.link.lock().await;
        link.select(self.address).await?;
        link.directive(directive).await
    }
}

#[async_trait]
impl Transport for GpibDevice {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.check_connected()?;
        let mut link = self.shared.link.lock().await;
        link.select(self.address).await?;
        let frame = protocol::escape_data(data);
        trace!(addr = self.address.0, bytes = ?&frame[..], "GPIB write");
        if let Err(e) = link.transport.send(&frame).await {
            // Next use re-addresses in case the adapter lost state.
            link.addressed = None;
            warn!(addr = self.address.0, error = %e, "GPIB write failed");
            return Err(e);
        }
        self.read_pending = true;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.check_connected()?;
        let mut link = self.shared.link.lock().await;
        link.select(self.address).await?;
        if self.read_pending && !self.shared.auto_read.load(Ordering::Acquire) {
            link.directive(Directive::ReadEoi).await?;
        }
        self.read_pending = false;
        link.transport.receive(buf, timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_after_write(&self) -> bool {
        self.shared.auto_read.load(Ordering::Acquire)
    }

    async fn device_clear(&mut self) -> Result<()> {
        self.read_pending = false;
        self.addressed_directive(Directive::Clear).await
    }

    async fn go_to_local(&mut self) -> Result<()> {
        self.addressed_directive(Directive::Local).await
    }

    async fn local_lockout(&mut self) -> Result<()> {
        self.addressed_directive(Directive::LocalLockout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_test_harness::MockTransport;

    fn init_expectations(mock: &mut MockTransport) {
        mock.expect_send(b"++mode 1\n");
        mock.expect_send(b"++auto 0\n");
        mock.expect_send(b"++eoi 1\n");
        mock.expect_send(b"++eos 2\n");
        mock.expect_send(b"++read_tmo_ms 500\n");
    }

    #[tokio::test]
    async fn initialization_sequence() {
        let mut mock = MockTransport::new();
        let log = mock.wire_log();
        init_expectations(&mut mock);
        mock.expect_send(b"++ifc\n");
        Controller::new(
            Box::new(mock),
            ControllerConfig::default().interface_clear(true),
        )
        .await
        .unwrap();
        assert_eq!(log.len(), 6);
    }

    #[tokio::test]
    async fn rejects_bad_read_timeout() {
        let result = Controller::new(
            Box::new(MockTransport::new()),
            ControllerConfig::default().read_timeout(Duration::from_secs(5)),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn addressing_is_cached() {
        let mut mock = MockTransport::new();
        let log = mock.wire_log();
        init_expectations(&mut mock);
        mock.expect_send(b"++addr 5\n");
        mock.expect_send(b"VOLT 5\n");
        mock.expect_send(b"CURR 1\n");
        mock.expect_send(b"++addr 10\n");
        mock.expect_send(b"OUTP ON\n");
        mock.expect_send(b"++addr 5\n");
        mock.expect_send(b"OUTP ON\n");

        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        let mut psu = gpib.device(5).unwrap();
        let mut fgen = gpib.device(10).unwrap();

        psu.send(b"VOLT 5\n").await.unwrap();
        psu.send(b"CURR 1\n").await.unwrap();
        assert_eq!(gpib.current_address().await, Some(5));
        fgen.send(b"OUTP ON\n").await.unwrap();
        psu.send(b"OUTP ON\n").await.unwrap();

        assert_eq!(log.count_starting_with("++addr"), 3);
    }

    #[tokio::test]
    async fn failed_write_forces_readdress() {
        let mut mock = MockTransport::new();
        init_expectations(&mut mock);
        mock.expect_send(b"++addr 5\n");
        mock.expect_send(b"something else\n");
        mock.expect_send(b"++addr 5\n");
        mock.expect_send(b"VOLT 5\n");

        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        let mut psu = gpib.device(5).unwrap();
        assert!(psu.send(b"VOLT 5\n").await.is_err());
        assert_eq!(gpib.current_address().await, None);
        psu.send(b"VOLT 5\n").await.unwrap();
    }

    #[tokio::test]
    async fn query_issues_read_eoi_once() {
        let mut mock = MockTransport::new();
        init_expectations(&mut mock);
        mock.expect_send(b"++addr 5\n");
        mock.expect_send(b"*IDN?\n");
        mock.expect(b"++read eoi\n", b"HEWLETT-PACKARD,E3631A,0,2.1-5.0-1.0\n");

        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        let mut psu = gpib.device(5).unwrap();
        assert!(!psu.read_after_write());
        psu.send(b"*IDN?\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = psu.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert!(buf[..n].starts_with(b"HEWLETT-PACKARD"));
        // Already read: no second ++read.
        let err = psu.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(err, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn escapes_instrument_data() {
        let mut mock = MockTransport::new();
        init_expectations(&mut mock);
        mock.expect_send(b"++addr 2\n");
        mock.expect_send(b"DISP:TEXT '\x1b+5V'\n");

        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        let mut dev = gpib.device(2).unwrap();
        dev.send(b"DISP:TEXT '+5V'\n").await.unwrap();
    }

    #[tokio::test]
    async fn controller_queries() {
        let mut mock = MockTransport::new();
        init_expectations(&mut mock);
        mock.expect(b"++ver\n", b"Prologix GPIB-USB Controller version 6.101\r\n");
        mock.expect(b"++srq\n", b"1\n");
        mock.expect(b"++spoll 5\n", b"64\n");
        mock.expect_send(b"++read_tmo_ms 1000\n");
        mock.expect_send(b"++auto 1\n");

        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        assert_eq!(
            gpib.version().await.unwrap(),
            "Prologix GPIB-USB Controller version 6.101"
        );
        assert!(gpib.srq_asserted().await.unwrap());
        assert_eq!(gpib.serial_poll(5).await.unwrap(), 64);
        gpib.set_read_timeout(Duration::from_secs(1)).await.unwrap();

        let dev = gpib.device(5).unwrap();
        gpib.set_auto_read(true).await.unwrap();
        assert!(dev.read_after_write());
        assert!(gpib.auto_read());
    }

    #[tokio::test]
    async fn custom_terminator_and_eoi() {
        let mut mock = MockTransport::new();
        let log = mock.wire_log();
        mock.expect_send(b"++mode 1\n");
        mock.expect_send(b"++auto 0\n");
        mock.expect_send(b"++eoi 0\n");
        mock.expect_send(b"++eos 0\n");
        mock.expect_send(b"++read_tmo_ms 500\n");
        Controller::new(
            Box::new(mock),
            ControllerConfig::default().eoi(false).eos(Eos::CrLf),
        )
        .await
        .unwrap();
        assert_eq!(log.lines()[3], "++eos 0");
    }

    #[tokio::test]
    async fn raw_directives_read_only_when_answered() {
        let mut mock = MockTransport::new();
        init_expectations(&mut mock);
        mock.expect_send(b"++ifc\n");
        mock.expect(b"++ver\n", b"Prologix GPIB-ETHERNET Controller version 01.06.06.00\n");
        mock.expect_send(b"++addr 5\n");
        mock.expect_send(b"++addr 5\n");
        mock.expect_send(b"*RST\n");

        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        assert_eq!(gpib.directive(Directive::InterfaceClear).await.unwrap(), None);
        assert_eq!(
            gpib.directive(Directive::Version).await.unwrap().as_deref(),
            Some("Prologix GPIB-ETHERNET Controller version 01.06.06.00")
        );
        let addr = Directive::Address {
            primary: 5,
            secondary: None,
        };
        assert_eq!(gpib.directive(addr).await.unwrap(), None);
        assert_eq!(gpib.current_address().await, None);

        let mut dev = gpib.device(5).unwrap();
        dev.send(b"*RST\n").await.unwrap();
    }

    #[tokio::test]
    async fn front_panel_and_clear() {
        let mut mock = MockTransport::new();
        init_expectations(&mut mock);
        mock.expect_send(b"++addr 5\n");
        mock.expect_send(b"++loc\n");
        mock.expect_send(b"++llo\n");
        mock.expect_send(b"++clr\n");
        mock.expect_send(b"++addr 6 96\n");
        mock.expect_send(b"++clr\n");

        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        gpib.front_panel(5, true).await.unwrap();
        let mut dev = gpib.device(5).unwrap();
        dev.local_lockout().await.unwrap();
        dev.device_clear().await.unwrap();
        let mut scanner = gpib.device_at(6, Some(0)).unwrap();
        assert_eq!(scanner.secondary_address(), Some(0));
        scanner.device_clear().await.unwrap();
    }

    #[tokio::test]
    async fn device_address_is_validated() {
        let mut mock = MockTransport::new();
        init_expectations(&mut mock);
        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        assert!(gpib.device(31).is_err());
        assert!(gpib.device_at(5, Some(31)).is_err());
        assert_eq!(gpib.device(30).unwrap().address(), 30);
    }

    #[tokio::test]
    async fn closed_device_is_disconnected() {
        let mut mock = MockTransport::new();
        init_expectations(&mut mock);
        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        let mut dev = gpib.device(5).unwrap();
        dev.close().await.unwrap();
        assert!(!dev.is_connected());
        assert!(matches!(dev.send(b"*RST\n").await, Err(Error::Disconnected)));
    }
}
