//! # benchlib -- Transport-Agnostic Instrument Control
//!
//! `benchlib` is an asynchronous Rust library for controlling bench test
//! and measurement instruments: function generators, DC power supplies,
//! multimeters, oscilloscopes and switch matrices. The same driver runs
//! over RS-232, GPIB through a Prologix-style controller, LXI raw sockets,
//! USB-TMC or an external VISA layer.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! benchlib = { version = "0.1", features = ["keysight"] }
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ```no_run
//! use benchlib::keysight::Key33220;
//! use benchlib::{BenchResourceManager, FunctionGenerator, Instrument, Waveform};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = BenchResourceManager::new();
//!     let transport = manager.open_str("TCPIP0::10.12.100.150::5025::SOCKET").await?;
//!     let fgen = Key33220::builder().build_with_transport(transport).await?;
//!
//!     let ch = fgen.resolve_channel("CH1")?;
//!     fgen.configure_standard_waveform(ch, Waveform::Sine, 0.4, 0.1, 2340.0, 0.0).await?;
//!     fgen.set_output_enabled(ch, true).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                   | Purpose                                           |
//! |-------------------------|---------------------------------------------------|
//! | `benchlib-core`         | Traits ([`Instrument`], capability groups), types, errors, resource strings |
//! | `benchlib-transport`    | Serial, TCP socket, USB-TMC and VISA transports   |
//! | `benchlib-prologix`     | GPIB through a Prologix-style controller          |
//! | `benchlib-scpi`         | The serialized command session                    |
//! | `benchlib-keysight`     | Keysight drivers                                  |
//! | `benchlib-srs`          | Stanford Research Systems drivers                 |
//! | `benchlib-kikusui`      | Kikusui drivers                                   |
//! | `benchlib-fluke`        | Fluke drivers                                     |
//! | **`benchlib`**          | This facade crate, plus [`BenchResourceManager`]  |
//!
//! Every driver implements [`Instrument`] and one capability-group trait
//! ([`FunctionGenerator`], [`DcPower`], [`Dmm`], [`Oscilloscope`],
//! [`Switch`]). Code holding a `dyn Instrument` asks for a group with the
//! `as_*` methods and gets `None` from drivers outside it.
//!
//! ## Feature Flags
//!
//! | Feature    | Enables                         | Default |
//! |------------|---------------------------------|---------|
//! | `keysight` | [`keysight`] module             | yes     |
//! | `srs`      | [`srs`] module                  | yes     |
//! | `kikusui`  | [`kikusui`] module              | yes     |
//! | `fluke`    | [`fluke`] module                | yes     |
//! | `full`     | All driver crates               | no      |
//!
//! ## Logging
//!
//! Libraries emit `tracing` events and never install a subscriber. Wire
//! bytes are at `trace`, driver operations at `debug`, opens and closes at
//! `info`.

pub use benchlib_core::*;

mod manager;

pub use manager::{BenchResourceManager, DEFAULT_BAUD_RATE, UsbBackend};

/// The [`Transport`] trait and its implementations: serial ports, LXI
/// sockets, USB-TMC and VISA delegation.
pub mod transport {
    pub use benchlib_core::transport::*;
    pub use benchlib_transport::*;
}

/// GPIB through a Prologix-style controller.
pub mod prologix {
    pub use benchlib_prologix::*;
}

/// The serialized command session every driver talks through.
pub mod scpi {
    pub use benchlib_scpi::*;
}

/// Keysight (Agilent) drivers.
///
/// Provides [`Key33220`](keysight::Key33220), [`E36xx`](keysight::E36xx),
/// [`Key3446x`](keysight::Key3446x),
/// [`InfiniiVision`](keysight::InfiniiVision) and
/// [`U2751a`](keysight::U2751a).
#[cfg(feature = "keysight")]
pub mod keysight {
    pub use benchlib_keysight::*;
}

/// Stanford Research Systems drivers.
///
/// Provides the [`Ds345`](srs::Ds345) function generator.
#[cfg(feature = "srs")]
pub mod srs {
    pub use benchlib_srs::*;
}

/// Kikusui drivers.
///
/// Provides the [`Pmx`](kikusui::Pmx) DC power supply.
#[cfg(feature = "kikusui")]
pub mod kikusui {
    pub use benchlib_kikusui::*;
}

/// Fluke drivers.
///
/// Provides the [`Fluke45`](fluke::Fluke45) multimeter.
#[cfg(feature = "fluke")]
pub mod fluke {
    pub use benchlib_fluke::*;
}
