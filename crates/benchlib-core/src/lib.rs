//! benchlib-core: Core traits, types, and error definitions for benchlib.
//!
//! This crate defines the model-agnostic abstractions that every benchlib
//! transport and instrument driver builds on. Test programs depend on these
//! types without pulling in any specific bus or driver.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level link to an instrument
//! - [`CommandDispatcher`] -- command/query seam between drivers and sessions
//! - [`Instrument`] -- identity, reset, pass-through and capability queries
//! - [`FunctionGenerator`], [`DcPower`], [`Oscilloscope`], [`Dmm`],
//!   [`Switch`] -- capability groups
//! - [`ChannelMap`] / [`Channel`] -- channel naming and typed channel views
//! - [`Resource`] -- parsed resource strings
//! - [`Error`] / [`Result`] -- error handling

pub mod cache;
pub mod capability;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod instrument;
pub mod parse;
pub mod resource;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use benchlib_core::*`.
pub use cache::{CachedValue, INSTRUMENT_WIDE, SettingsCache};
pub use capability::{DcPower, Dmm, FunctionGenerator, Oscilloscope, PathCapability, Switch};
pub use channel::{Channel, ChannelMap};
pub use dispatch::CommandDispatcher;
pub use error::{Error, ErrorKind, Result};
pub use instrument::{DriverOptions, Instrument, InstrumentCore};
pub use resource::{Resource, SerialFraming, SerialParity};
pub use transport::Transport;
pub use types::*;
