//! Controller directives and data escaping.
//!
//! Lines that start with `++` are consumed by the controller itself; every
//! other line is forwarded to the currently addressed instrument. Bytes in
//! instrument data that the controller would otherwise interpret (CR, LF,
//! ESC and `+`) are prefixed with ESC.

use bytes::{BufMut, BytesMut};

use benchlib_core::error::{Error, Result};
use benchlib_core::resource::GPIB_MAX_ADDRESS;

/// Escape character understood by the controller.
pub const ESC: u8 = 0x1B;

/// Shortest and longest accepted `++read_tmo_ms` values.
pub const MIN_READ_TIMEOUT_MS: u64 = 1;
pub const MAX_READ_TIMEOUT_MS: u64 = 3000;

/// Offset added to a secondary address on the wire.
const SECONDARY_BASE: u8 = 96;

/// Line ending appended by the controller to data it forwards (`++eos`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Eos {
    CrLf,
    Cr,
    #[default]
    Lf,
    None,
}

impl Eos {
    fn code(self) -> u8 {
        match self {
            Eos::CrLf => 0,
            Eos::Cr => 1,
            Eos::Lf => 2,
            Eos::None => 3,
        }
    }
}

/// A controller directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// `++mode 1`: act as bus controller.
    ControllerMode,
    /// `++addr N [SAD]`
    Address { primary: u8, secondary: Option<u8> },
    /// `++auto 0|1`: read after every write.
    Auto(bool),
    /// `++eoi 0|1`: assert EOI with the last byte.
    Eoi(bool),
    /// `++eos N`
    Eos(Eos),
    /// `++read_tmo_ms N`
    ReadTimeout(u64),
    /// `++read eoi`: read until EOI.
    ReadEoi,
    /// `++clr`: selected device clear.
    Clear,
    /// `++loc`: go to local.
    Local,
    /// `++llo`: local lockout.
    LocalLockout,
    /// `++ifc`: interface clear.
    InterfaceClear,
    /// `++srq`: query the SRQ line.
    Srq,
    /// `++spoll N [SAD]`: serial poll.
    SerialPoll { primary: u8, secondary: Option<u8> },
    /// `++ver`
    Version,
}

impl Directive {
    /// Whether the controller answers this directive with a line.
    pub fn has_reply(&self) -> bool {
        matches!(
            self,
            Directive::Srq | Directive::SerialPoll { .. } | Directive::Version
        )
    }

    /// Encode as an LF-terminated directive line.
    pub fn encode(&self) -> BytesMut {
        let text = match *self {
            Directive::ControllerMode => "++mode 1".to_string(),
            Directive::Address { primary, secondary } => with_secondary("++addr", primary, secondary),
            Directive::Auto(on) => format!("++auto {}", on as u8),
            Directive::Eoi(on) => format!("++eoi {}", on as u8),
            Directive::Eos(eos) => format!("++eos {}", eos.code()),
            Directive::ReadTimeout(ms) => format!("++read_tmo_ms {ms}"),
            Directive::ReadEoi => "++read eoi".to_string(),
            Directive::Clear => "++clr".to_string(),
            Directive::Local => "++loc".to_string(),
            Directive::LocalLockout => "++llo".to_string(),
            Directive::InterfaceClear => "++ifc".to_string(),
            Directive::Srq => "++srq".to_string(),
            Directive::SerialPoll { primary, secondary } => {
                with_secondary("++spoll", primary, secondary)
            }
            Directive::Version => "++ver".to_string(),
        };
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(b'\n');
        buf
    }
}

fn with_secondary(name: &str, primary: u8, secondary: Option<u8>) -> String {
    match secondary {
        Some(sec) => format!("{name} {primary} {}", SECONDARY_BASE + sec),
        None => format!("{name} {primary}"),
    }
}

/// Validate a primary or secondary GPIB address.
pub fn check_address(address: u8) -> Result<u8> {
    if address > GPIB_MAX_ADDRESS {
        return Err(Error::InvalidParameter(format!(
            "GPIB address {address} out of range 0-{GPIB_MAX_ADDRESS}"
        )));
    }
    Ok(address)
}

/// Validate a `++read_tmo_ms` value.
pub fn check_read_timeout(ms: u64) -> Result<u64> {
    if !(MIN_READ_TIMEOUT_MS..=MAX_READ_TIMEOUT_MS).contains(&ms) {
        return Err(Error::InvalidParameter(format!(
            "read timeout {ms} ms out of range {MIN_READ_TIMEOUT_MS}-{MAX_READ_TIMEOUT_MS}"
        )));
    }
    Ok(ms)
}

/// Frame instrument data for the controller.
///
/// A trailing CR/LF terminator is removed, the remaining bytes are escaped,
/// and one unescaped LF is appended to end the line.
pub fn escape_data(data: &[u8]) -> BytesMut {
    let mut end = data.len();
    while end > 0 && matches!(data[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    let body = &data[..end];
    let mut buf = BytesMut::with_capacity(body.len() + 8);
    for &b in body {
        if matches!(b, b'\r' | b'\n' | ESC | b'+') {
            buf.put_u8(ESC);
        }
        buf.put_u8(b);
    }
    buf.put_u8(b'\n');
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_encoding() {
        assert_eq!(&Directive::ControllerMode.encode()[..], b"++mode 1\n");
        assert_eq!(
            &Directive::Address {
                primary: 5,
                secondary: None
            }
            .encode()[..],
            b"++addr 5\n"
        );
        assert_eq!(
            &Directive::Address {
                primary: 5,
                secondary: Some(2)
            }
            .encode()[..],
            b"++addr 5 98\n"
        );
        assert_eq!(&Directive::Auto(false).encode()[..], b"++auto 0\n");
        assert_eq!(&Directive::Eos(Eos::Lf).encode()[..], b"++eos 2\n");
        assert_eq!(&Directive::ReadTimeout(500).encode()[..], b"++read_tmo_ms 500\n");
        assert_eq!(&Directive::ReadEoi.encode()[..], b"++read eoi\n");
        assert!(Directive::Version.has_reply());
        assert!(!Directive::Clear.has_reply());
    }

    #[test]
    fn escaping() {
        assert_eq!(&escape_data(b"*IDN?\n")[..], b"*IDN?\n");
        assert_eq!(&escape_data(b"VOLT +5\r\n")[..], b"VOLT \x1b+5\n");
        assert_eq!(
            &escape_data(b"DATA \x1b\r\nX\n")[..],
            b"DATA \x1b\x1b\x1b\r\x1b\nX\n"
        );
    }

    #[test]
    fn limits() {
        assert!(check_address(30).is_ok());
        assert!(check_address(31).is_err());
        assert!(check_read_timeout(3000).is_ok());
        assert!(check_read_timeout(0).is_err());
        assert!(check_read_timeout(3001).is_err());
    }
}
