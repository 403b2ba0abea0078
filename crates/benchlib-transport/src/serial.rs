//! Serial port transport for RS-232 instruments and serial-attached
//! controllers.
//!
//! This module provides [`SerialTransport`], which implements the [`Transport`]
//! trait for physical RS-232 ports and USB virtual COM ports.
//!
//! Typical bench settings:
//! - Keysight E3631A / 33220A rear RS-232: 9600 baud, 8N2, DTR/DSR handshake
//! - SRS DS345: 9600 baud, 8N2
//! - Prologix GPIB-USB controller: any baud (virtual port), 8N1
//!
//! # Example
//!
//! ```no_run
//! use benchlib_transport::SerialTransport;
//! use benchlib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//!
//! transport.send(b"*IDN?\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use benchlib_core::error::{Error, Result};
use benchlib_core::resource::{SerialFraming, SerialParity};
use benchlib_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

/// Serial port configuration.
///
/// Defaults are 9600 baud, 8 data bits, no parity, 1 stop bit, no flow
/// control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    /// Hardware handshaking leaves DTR/RTS under driver control.
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Build a configuration from a baud rate and a resource-string
    /// framing such as `8N2`.
    pub fn from_framing(baud_rate: u32, framing: SerialFraming) -> Result<Self> {
        let data_bits = match framing.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            n => {
                return Err(Error::InvalidParameter(format!(
                    "unsupported data bits: {n}"
                )));
            }
        };
        let stop_bits = match framing.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            n => {
                return Err(Error::InvalidParameter(format!(
                    "unsupported stop bits: {n}"
                )));
            }
        };
        let parity = match framing.parity {
            SerialParity::None => Parity::None,
            SerialParity::Even => Parity::Even,
            SerialParity::Odd => Parity::Odd,
        };
        Ok(SerialConfig {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            flow_control: FlowControl::None,
        })
    }

    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => Error::Disconnected,
        _ => Error::Io(e),
    }
}

/// Serial port transport.
pub struct SerialTransport {
    port: Option<SerialStream>,
    /// Port name for logging
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port at `baud_rate` with 8N1 framing and no flow
    /// control.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open a serial port with full configuration control.
    ///
    /// ```no_run
    /// # use benchlib_transport::{SerialTransport, SerialConfig, DataBits, StopBits, Parity, FlowControl};
    /// # async fn example() -> benchlib_core::Result<()> {
    /// let config = SerialConfig {
    ///     baud_rate: 9600,
    ///     data_bits: DataBits::Eight,
    ///     stop_bits: StopBits::Two,
    ///     parity: Parity::None,
    ///     flow_control: FlowControl::Hardware,
    /// };
    /// let transport = SerialTransport::open_with_config("/dev/ttyS0", config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            data_bits = ?config.data_bits,
            stop_bits = ?config.stop_bits,
            parity = ?config.parity,
            flow_control = ?config.flow_control,
            "opening serial port"
        );

        let mut serial_stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(config.data_bits.into())
            .stop_bits(config.stop_bits.into())
            .parity(config.parity.into())
            .flow_control(config.flow_control.into())
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "failed to open serial port");
                Error::Connection(format!("failed to open serial port {port}: {e}"))
            })?;

        // USB-serial adapters often assert DTR/RTS on open, which some
        // controllers treat as a reset request. Leave them alone when the
        // instrument handshakes on them.
        if config.flow_control != FlowControl::Hardware {
            if let Err(e) = serial_stream.write_data_terminal_ready(false) {
                tracing::warn!(port = %port, error = %e, "failed to de-assert DTR");
            }
            if let Err(e) = serial_stream.write_request_to_send(false) {
                tracing::warn!(port = %port, error = %e, "failed to de-assert RTS");
            }
        }

        tracing::info!(port = %port, baud_rate = config.baud_rate, "serial port opened");

        Ok(Self {
            port: Some(serial_stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Discard bytes received but not yet read.
    pub fn flush_input(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::Disconnected)?;
        port.clear(ClearBuffer::Input)
            .map_err(|e| Error::Transport(format!("failed to flush input: {e}")))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::Disconnected)?;

        tracing::trace!(
            port = %self.port_name,
            bytes = data.len(),
            data = ?data,
            "sending data"
        );

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "failed to send data");
            map_io_error(e)
        })?;

        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "failed to flush serial port");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::Disconnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(
                    port = %self.port_name,
                    bytes = n,
                    data = ?&buf[..n],
                    "received data"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => {
                tracing::trace!(
                    port = %self.port_name,
                    timeout_ms = timeout.as_millis(),
                    "timeout waiting for data"
                );
                Err(Error::Timeout)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "failed to flush before closing (continuing anyway)"
                );
            }
            tracing::info!(port = %self.port_name, "serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn is_serial(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn config_from_framing() {
        let framing: SerialFraming = "7E2".parse().unwrap();
        let config = SerialConfig::from_framing(4800, framing)
            .unwrap()
            .flow_control(FlowControl::Hardware);
        assert_eq!(config.baud_rate, 4800);
        assert_eq!(config.data_bits, DataBits::Seven);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::Two);
        assert_eq!(config.flow_control, FlowControl::Hardware);
    }

    #[test]
    fn config_from_framing_rejects_odd_sizes() {
        let framing = SerialFraming {
            data_bits: 9,
            parity: SerialParity::None,
            stop_bits: 1,
        };
        assert!(SerialConfig::from_framing(9600, framing).is_err());
    }

    #[test]
    fn io_errors_map_to_disconnect() {
        let e = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(map_io_error(e), Error::Disconnected));
        let e = std::io::Error::other("weird");
        assert!(matches!(map_io_error(e), Error::Io(_)));
    }

    #[tokio::test]
    async fn open_missing_port_is_connection_error() {
        let result = SerialTransport::open("/dev/benchlib-does-not-exist", 9600).await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
