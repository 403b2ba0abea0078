//! Stanford Research Systems instrument drivers for benchlib.
//!
//! The DS345 speaks a terse pre-SCPI dialect (four-letter headers, numeric
//! codes for enumerated settings) but frames lines the same way, so it
//! runs on a [`benchlib_scpi::Session`] like every other driver.
//!
//! ```no_run
//! use benchlib_core::{FunctionGenerator, OperationMode, TriggerSource, Waveform};
//! use benchlib_srs::Ds345;
//!
//! # async fn example(transport: Box<dyn benchlib_core::Transport>) -> benchlib_core::Result<()> {
//! let fgen = Ds345::builder().build_with_transport(transport).await?;
//! fgen.configure_standard_waveform(0, Waveform::Sine, 0.5, 0.1, 100.0, 0.0).await?;
//! fgen.set_burst_count(0, 40).await?;
//! fgen.set_trigger_source(0, TriggerSource::Internal).await?;
//! fgen.set_operation_mode(0, OperationMode::Burst).await?;
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod ds345;

pub use ds345::{Ds345, Ds345Builder};
