//! Transport implementations for benchlib.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](benchlib_core::Transport) trait from `benchlib-core` for the
//! physical links bench instruments hang off:
//!
//! - [`SerialTransport`]: RS-232 ports and USB virtual COM ports
//! - [`TcpTransport`]: LXI raw SCPI sockets (port 5025)
//! - [`UsbtmcTransport`]: USB Test & Measurement Class framing over a
//!   caller-supplied [`UsbBulkIo`]
//! - [`VisaResource`]: delegation to an external [`ResourceManager`]
//!
//! GPIB devices are reached through `benchlib-prologix`.
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
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;
pub mod tcp;
pub mod usbtmc;
pub mod visa;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
pub use tcp::TcpTransport;
pub use usbtmc::{UsbBulkIo, UsbtmcTransport};
pub use visa::{ResourceManager, VisaResource};
