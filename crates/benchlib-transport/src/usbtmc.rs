//! USB Test & Measurement Class transport.
//!
//! [`UsbtmcTransport`] implements USBTMC bulk framing on top of a
//! [`UsbBulkIo`] collaborator that moves raw bytes over the device's bulk
//! and control endpoints. Opening the USB device, claiming the interface and
//! the host-side driver are the collaborator's job; this module only speaks
//! the class protocol.
//!
//! Every bulk transfer starts with a 12-byte header:
//!
//! | Offset | Field                                      |
//! |--------|--------------------------------------------|
//! | 0      | MsgID                                      |
//! | 1      | bTag (1..=255)                             |
//! | 2      | bTagInverse (`!bTag`)                      |
//! | 3      | reserved (0)                               |
//! | 4..8   | TransferSize, little endian                |
//! | 8      | bmTransferAttributes (EOM / TermCharEnabled) |
//! | 9      | TermChar (requests only)                   |
//! | 10..12 | reserved (0)                               |
//!
//! Outgoing data is padded to a multiple of four bytes.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;
use std::time::Duration;

use benchlib_core::error::{Error, Result};
use benchlib_core::transport::Transport;

/// `DEV_DEP_MSG_OUT`: host-to-device message.
pub const DEV_DEP_MSG_OUT: u8 = 1;
/// `REQUEST_DEV_DEP_MSG_IN`: ask the device for a response.
pub const REQUEST_DEV_DEP_MSG_IN: u8 = 2;
/// `DEV_DEP_MSG_IN`: device-to-host response.
pub const DEV_DEP_MSG_IN: u8 = 2;

/// Class control requests.
pub const INITIATE_CLEAR: u8 = 5;
pub const CHECK_CLEAR_STATUS: u8 = 6;
/// USB488 subclass control requests.
pub const GO_TO_LOCAL: u8 = 161;
pub const LOCAL_LOCKOUT: u8 = 162;

const STATUS_SUCCESS: u8 = 0x01;
const STATUS_PENDING: u8 = 0x02;

const HEADER_LEN: usize = 12;
const ATTR_EOM: u8 = 0x01;
const ATTR_TERM_CHAR: u8 = 0x02;

const DEFAULT_MAX_TRANSFER: u32 = 64 * 1024;
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);
const CLEAR_POLL_ATTEMPTS: usize = 50;
const CLEAR_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Raw endpoint access to one USBTMC interface.
///
/// `bulk_in` must return one complete USB transfer (read until a short
/// packet), which may hold less than the transfer size announced in its
/// header; the transport keeps reading until it has it all.
#[async_trait]
pub trait UsbBulkIo: Send + Sync {
    /// Write one transfer to the bulk-OUT endpoint.
    async fn bulk_out(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Read one transfer from the bulk-IN endpoint.
    async fn bulk_in(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Issue a class-specific IN control request to the interface.
    async fn control_in(
        &mut self,
        request: u8,
        value: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Release the interface.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Build a 12-byte bulk header.
fn header(msg_id: u8, tag: u8, transfer_size: u32, attributes: u8, term_char: u8) -> [u8; 12] {
    let size = transfer_size.to_le_bytes();
    [
        msg_id, tag, !tag, 0, size[0], size[1], size[2], size[3], attributes, term_char, 0, 0,
    ]
}

/// USBTMC transport over a [`UsbBulkIo`] collaborator.
pub struct UsbtmcTransport {
    io: Box<dyn UsbBulkIo>,
    vendor_id: u16,
    product_id: u16,
    serial_number: String,
    last_tag: u8,
    term_char: Option<u8>,
    max_transfer: u32,
    pending: VecDeque<u8>,
    /// The device finished its message; reads return end-of-stream until
    /// the next write.
    eom: bool,
    connected: bool,
}

impl UsbtmcTransport {
    /// Wrap an opened interface. The ids and serial are kept for logging.
    pub fn new(
        io: Box<dyn UsbBulkIo>,
        vendor_id: u16,
        product_id: u16,
        serial_number: impl Into<String>,
    ) -> Self {
        let serial_number = serial_number.into();
        tracing::info!(
            vendor_id = %format!("{vendor_id:#06x}"),
            product_id = %format!("{product_id:#06x}"),
            serial = %serial_number,
            "USBTMC interface opened"
        );
        UsbtmcTransport {
            io,
            vendor_id,
            product_id,
            serial_number,
            last_tag: 0,
            term_char: Some(b'\n'),
            max_transfer: DEFAULT_MAX_TRANSFER,
            pending: VecDeque::new(),
            eom: false,
            connected: true,
        }
    }

    /// Ask the device to stop a response at `term_char`, or disable with
    /// `None`.
    pub fn with_term_char(mut self, term_char: Option<u8>) -> Self {
        self.term_char = term_char;
        self
    }

    /// Largest response requested per `REQUEST_DEV_DEP_MSG_IN`.
    pub fn with_max_transfer(mut self, max_transfer: u32) -> Self {
        self.max_transfer = max_transfer.max(1);
        self
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Next bTag in 1..=255; zero is never used.
    fn next_tag(&mut self) -> u8 {
        self.last_tag = self.last_tag % 255 + 1;
        self.last_tag
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }

    /// Request one response transfer and queue its payload.
    async fn fetch(&mut self, timeout: Duration) -> Result<()> {
        let tag = self.next_tag();
        let (attributes, term) = match self.term_char {
            Some(c) => (ATTR_TERM_CHAR, c),
            None => (0, 0),
        };
        let request = header(REQUEST_DEV_DEP_MSG_IN, tag, self.max_transfer, attributes, term);
        self.io.bulk_out(&request, timeout).await?;

        let mut buf = vec![0u8; HEADER_LEN + self.max_transfer as usize + 3];
        let mut n = self.io.bulk_in(&mut buf, timeout).await?;
        if n < HEADER_LEN {
            return Err(Error::malformed(
                format!("{:02x?}", &buf[..n]),
                "short DEV_DEP_MSG_IN header",
            ));
        }
        let h = &buf[..HEADER_LEN];
        if h[0] != DEV_DEP_MSG_IN || h[1] != tag || h[2] != !tag {
            return Err(Error::malformed(
                format!("{h:02x?}"),
                format!("unexpected DEV_DEP_MSG_IN header (expected bTag {tag})"),
            ));
        }
        let size = u32::from_le_bytes([h[4], h[5], h[6], h[7]]) as usize;
        let eom = h[8] & ATTR_EOM != 0;
        if size > self.max_transfer as usize {
            return Err(Error::malformed(
                format!("{h:02x?}"),
                format!("transfer size {size} exceeds requested {}", self.max_transfer),
            ));
        }

        while n < HEADER_LEN + size {
            let more = self.io.bulk_in(&mut buf[n..], timeout).await?;
            if more == 0 {
                return Err(Error::IncompleteResponse {
                    partial: buf[HEADER_LEN..n].to_vec(),
                });
            }
            n += more;
        }

        tracing::trace!(tag, size, eom, "USBTMC transfer received");
        self.pending.extend(&buf[HEADER_LEN..HEADER_LEN + size]);
        self.eom = eom;
        Ok(())
    }

    async fn usb488_request(&mut self, request: u8, name: &str) -> Result<()> {
        self.check_connected()?;
        let mut status = [0u8; 1];
        self.io
            .control_in(request, 0, &mut status, DEFAULT_IO_TIMEOUT)
            .await?;
        if status[0] != STATUS_SUCCESS {
            return Err(Error::Transport(format!(
                "{name} failed with USBTMC status {:#04x}",
                status[0]
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for UsbtmcTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.check_connected()?;
        self.pending.clear();
        self.eom = false;

        let tag = self.next_tag();
        let padded = data.len().div_ceil(4) * 4;
        let mut frame = BytesMut::with_capacity(HEADER_LEN + padded);
        frame.put_slice(&header(DEV_DEP_MSG_OUT, tag, data.len() as u32, ATTR_EOM, 0));
        frame.put_slice(data);
        frame.put_bytes(0, padded - data.len());

        tracing::trace!(tag, bytes = data.len(), "USBTMC DEV_DEP_MSG_OUT");
        self.io.bulk_out(&frame, DEFAULT_IO_TIMEOUT).await
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.check_connected()?;
        if self.pending.is_empty() {
            if self.eom {
                return Ok(0);
            }
            self.fetch(timeout).await?;
        }
        let n = self.pending.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        if self.connected {
            self.connected = false;
            self.pending.clear();
            tracing::info!(serial = %self.serial_number, "USBTMC interface closed");
            self.io.close().await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn device_clear(&mut self) -> Result<()> {
        self.check_connected()?;
        let mut status = [0u8; 1];
        self.io
            .control_in(INITIATE_CLEAR, 0, &mut status, DEFAULT_IO_TIMEOUT)
            .await?;
        if status[0] != STATUS_SUCCESS {
            return Err(Error::Transport(format!(
                "INITIATE_CLEAR failed with USBTMC status {:#04x}",
                status[0]
            )));
        }

        let mut check = [0u8; 2];
        for _ in 0..CLEAR_POLL_ATTEMPTS {
            self.io
                .control_in(CHECK_CLEAR_STATUS, 0, &mut check, DEFAULT_IO_TIMEOUT)
                .await?;
            if check[0] != STATUS_PENDING {
                self.pending.clear();
                self.eom = false;
                tracing::debug!(serial = %self.serial_number, "USBTMC device clear complete");
                return Ok(());
            }
            tokio::time::sleep(CLEAR_POLL_INTERVAL).await;
        }
        Err(Error::Timeout)
    }

    async fn go_to_local(&mut self) -> Result<()> {
        self.usb488_request(GO_TO_LOCAL, "GO_TO_LOCAL").await
    }

    async fn local_lockout(&mut self) -> Result<()> {
        self.usb488_request(LOCAL_LOCKOUT, "LOCAL_LOCKOUT").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A device that answers each request with the next queued chunk.
    #[derive(Default)]
    struct FakeDevice {
        out: Arc<Mutex<Vec<Vec<u8>>>>,
        chunks: VecDeque<(Vec<u8>, bool)>,
        last_request_tag: u8,
        corrupt_tag: bool,
        clear_pending_polls: usize,
    }

    #[async_trait]
    impl UsbBulkIo for FakeDevice {
        async fn bulk_out(&mut self, data: &[u8], _timeout: Duration) -> Result<()> {
            if data[0] == REQUEST_DEV_DEP_MSG_IN {
                self.last_request_tag = data[1];
            }
            self.out.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn bulk_in(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            let (data, eom) = self.chunks.pop_front().ok_or(Error::Timeout)?;
            let tag = if self.corrupt_tag {
                self.last_request_tag.wrapping_add(1)
            } else {
                self.last_request_tag
            };
            let h = header(DEV_DEP_MSG_IN, tag, data.len() as u32, eom as u8, 0);
            buf[..HEADER_LEN].copy_from_slice(&h);
            buf[HEADER_LEN..HEADER_LEN + data.len()].copy_from_slice(&data);
            Ok(HEADER_LEN + data.len())
        }

        async fn control_in(
            &mut self,
            request: u8,
            _value: u16,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> Result<usize> {
            buf[0] = match request {
                CHECK_CLEAR_STATUS if self.clear_pending_polls > 0 => {
                    self.clear_pending_polls -= 1;
                    STATUS_PENDING
                }
                _ => STATUS_SUCCESS,
            };
            Ok(buf.len())
        }
    }

    fn transport(dev: FakeDevice) -> UsbtmcTransport {
        UsbtmcTransport::new(Box::new(dev), 0x0957, 0x0407, "MY44036372")
    }

    #[tokio::test]
    async fn out_message_framing() {
        let dev = FakeDevice::default();
        let out = Arc::clone(&dev.out);
        let mut t = transport(dev);
        t.send(b"*IDN?\n").await.unwrap();

        let frames = out.lock().unwrap().clone();
        let f = &frames[0];
        assert_eq!(f.len(), 20);
        assert_eq!(&f[..4], &[DEV_DEP_MSG_OUT, 1, 0xFE, 0]);
        assert_eq!(&f[4..8], &6u32.to_le_bytes());
        assert_eq!(f[8], ATTR_EOM);
        assert_eq!(&f[12..18], b"*IDN?\n");
        assert_eq!(&f[18..], &[0, 0]);
    }

    #[tokio::test]
    async fn response_is_requested_and_unwrapped() {
        let mut dev = FakeDevice::default();
        dev.chunks.push_back((b"Agilent,33220A,".to_vec(), false));
        dev.chunks.push_back((b"MY1,2.02\n".to_vec(), true));
        let out = Arc::clone(&dev.out);
        let mut t = transport(dev);

        t.send(b"*IDN?\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = t.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"Agilent,33220A,");
        let n = t.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"MY1,2.02\n");
        // EOM seen: end of message.
        assert_eq!(t.receive(&mut buf, Duration::from_secs(1)).await.unwrap(), 0);

        let frames = out.lock().unwrap().clone();
        let request = &frames[1];
        assert_eq!(request[0], REQUEST_DEV_DEP_MSG_IN);
        assert_eq!(request[1], 2);
        assert_eq!(request[8], ATTR_TERM_CHAR);
        assert_eq!(request[9], b'\n');
    }

    #[tokio::test]
    async fn mismatched_tag_is_malformed() {
        let mut dev = FakeDevice::default();
        dev.corrupt_tag = true;
        dev.chunks.push_back((b"1\n".to_vec(), true));
        let mut t = transport(dev);
        t.send(b"*OPC?\n").await.unwrap();
        let mut buf = [0u8; 16];
        let err = t.receive(&mut buf, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn tags_wrap_and_skip_zero() {
        let mut t = transport(FakeDevice::default());
        t.last_tag = 254;
        assert_eq!(t.next_tag(), 255);
        assert_eq!(t.next_tag(), 1);
    }

    #[tokio::test]
    async fn device_clear_polls_until_done() {
        let mut dev = FakeDevice::default();
        dev.clear_pending_polls = 2;
        let mut t = transport(dev);
        t.device_clear().await.unwrap();
        t.go_to_local().await.unwrap();
        t.local_lockout().await.unwrap();
    }

    #[tokio::test]
    async fn closed_transport_is_disconnected() {
        let mut t = transport(FakeDevice::default());
        assert_eq!(t.serial_number(), "MY44036372");
        assert_eq!((t.vendor_id(), t.product_id()), (0x0957, 0x0407));
        t.close().await.unwrap();
        assert!(!t.is_connected());
        assert!(matches!(t.send(b"*RST\n").await, Err(Error::Disconnected)));
    }
}
