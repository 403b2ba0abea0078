//! Keysight (formerly Agilent) instrument drivers for benchlib.
//!
//! Every driver talks SCPI through a [`benchlib_scpi::Session`] and works
//! over any transport: GPIB through a Prologix controller, RS-232, LXI
//! sockets or USB-TMC.
//!
//! | Driver | Instruments | Capability group |
//! |--------|-------------|------------------|
//! | [`Key33220`] | 33210A, 33220A | function generator |
//! | [`E36xx`] | E3631A, E3632A, E3633A, E3634A | DC power |
//! | [`Key3446x`] | 34460A, 34461A, 34465A, 34470A | DMM |
//! | [`InfiniiVision`] | 2000/3000/4000 X-Series, 4 channel | oscilloscope |
//! | [`U2751a`] | U2751A 4x8 matrix | switch |
//!
//! # Example
//!
//! ```no_run
//! use benchlib_core::{DcPower, Instrument};
//! use benchlib_keysight::E36xx;
//! use benchlib_scpi::Session;
//!
//! # async fn example(transport: Box<dyn benchlib_core::Transport>) -> benchlib_core::Result<()> {
//! let psu = E36xx::builder().build(Session::with_defaults(transport)).await?;
//! let p6v = psu.resolve_channel("P6V")?;
//! psu.set_output_enabled(p6v, false).await?;
//! psu.set_voltage_level(p6v, 5.0).await?;
//! psu.set_current_limit(p6v, 1.0).await?;
//! psu.set_output_enabled(p6v, true).await?;
//! # Ok(())
//! # }
//! ```

pub mod e36xx;
pub mod infiniivision;
pub mod key33220;
pub mod key3446x;
pub mod u2751a;

pub use e36xx::{E36xx, E36xxBuilder, E36xxModel};
pub use infiniivision::{InfiniiVision, InfiniiVisionBuilder};
pub use key33220::{Key33220, Key33220Builder};
pub use key3446x::{Key3446x, Key3446xBuilder};
pub use u2751a::{U2751a, U2751aBuilder};
