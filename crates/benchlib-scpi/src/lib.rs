//! benchlib-scpi: Command framing and the session that owns one instrument
//! connection.
//!
//! - [`protocol`] -- command encoding, query detection, terminated and
//!   definite-length block response decoding
//! - [`session`] -- [`Session`], the serialized command dispatcher drivers
//!   talk through
//!
//! ```no_run
//! use benchlib_scpi::{Session, SessionConfig};
//! # async fn example(transport: Box<dyn benchlib_core::Transport>) -> benchlib_core::Result<()> {
//! let session = Session::new(transport, SessionConfig::default());
//! let idn = session.query("*IDN?").await?;
//! session.command("*RST").await?;
//! # Ok(())
//! # }
//! ```

pub mod protocol;
pub mod session;

pub use protocol::Command;
pub use session::{BusyPolicy, Session, SessionConfig, SessionState};
