//! benchlib-prologix: GPIB through a Prologix-style serial controller.
//!
//! The adapter sits on a serial port and speaks GPIB on the other side.
//! [`Controller`] initializes it and owns the serial link; each
//! [`GpibDevice`] it hands out is a [`Transport`](benchlib_core::Transport)
//! for one bus address, so a `Session` and a driver can sit on top of it
//! exactly as they would on a socket.
//!
//! ```no_run
//! use benchlib_prologix::{Controller, ControllerConfig};
//! use benchlib_transport::SerialTransport;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let serial = SerialTransport::open("/dev/ttyUSB0", 115200).await?;
//! let gpib = Controller::new(Box::new(serial), ControllerConfig::default()).await?;
//! println!("{}", gpib.version().await?);
//! let psu = gpib.device(5)?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod protocol;

pub use controller::{Controller, ControllerConfig, GpibDevice};
pub use protocol::{Directive, Eos};
