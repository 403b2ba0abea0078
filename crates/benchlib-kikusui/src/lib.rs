//! Kikusui instrument drivers for benchlib.
//!
//! [`Pmx`] covers the PMX series of compact regulated DC supplies over
//! LXI sockets, USB-TMC, RS-232 or GPIB.

pub mod pmx;

pub use pmx::{Pmx, PmxBuilder, Rating};
