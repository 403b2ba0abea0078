//! Fluke instrument drivers for benchlib.
//!
//! [`Fluke45`] covers the Fluke 45 dual display multimeter, normally reached
//! through its IEEE-488 option and a Prologix-style GPIB controller.

pub mod fluke45;

pub use fluke45::{Fluke45, Fluke45Builder};
