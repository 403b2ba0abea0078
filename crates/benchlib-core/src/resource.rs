//! Resource strings.
//!
//! A resource string names an instrument and the bus it is reached through,
//! in the VISA style:
//!
//! | Form | Example |
//! |------|---------|
//! | `ASRL[n]::<port>[::<baud>[::<framing>]]::INSTR` | `ASRL::/dev/ttyUSB0::9600::8N2::INSTR` |
//! | `GPIB[n]::<addr>[::<secondary>]::INSTR` | `GPIB0::10::INSTR` |
//! | `TCPIP[n]::<host>::<port>::SOCKET` | `TCPIP0::10.12.100.150::5025::SOCKET` |
//! | `USB[n]::<vid>::<pid>::<serial>[::<iface>]::INSTR` | `USB0::0x0957::0x0407::MY44035849::INSTR` |
//!
//! Any other well-formed `::INSTR` locator (VXI-11 `TCPIP::host::inst0::INSTR`,
//! `PXI`, `VXI`) parses as [`Resource::Visa`] and is handed to a VISA
//! resource manager unchanged. Parsing is eager: a malformed string is an
//! [`Error::InvalidResource`] before any connection is attempted.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Highest valid GPIB primary or secondary address.
pub const GPIB_MAX_ADDRESS: u8 = 30;

/// Default LXI raw socket port.
pub const DEFAULT_SOCKET_PORT: u16 = 5025;

/// Serial parity as spelled in a framing token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerialParity {
    None,
    Even,
    Odd,
}

/// Serial character framing such as `8N1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerialFraming {
    pub data_bits: u8,
    pub parity: SerialParity,
    pub stop_bits: u8,
}

impl Default for SerialFraming {
    fn default() -> Self {
        SerialFraming {
            data_bits: 8,
            parity: SerialParity::None,
            stop_bits: 1,
        }
    }
}

impl fmt::Display for SerialFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = match self.parity {
            SerialParity::None => 'N',
            SerialParity::Even => 'E',
            SerialParity::Odd => 'O',
        };
        write!(f, "{}{}{}", self.data_bits, p, self.stop_bits)
    }
}

impl FromStr for SerialFraming {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let b = s.as_bytes();
        if b.len() != 3 {
            return Err(format!("framing {s:?} must look like 8N1"));
        }
        let data_bits = match b[0] {
            b'5'..=b'8' => b[0] - b'0',
            _ => return Err(format!("data bits in {s:?} must be 5-8")),
        };
        let parity = match b[1].to_ascii_uppercase() {
            b'N' => SerialParity::None,
            b'E' => SerialParity::Even,
            b'O' => SerialParity::Odd,
            _ => return Err(format!("parity in {s:?} must be N, E or O")),
        };
        let stop_bits = match b[2] {
            b'1' => 1,
            b'2' => 2,
            _ => return Err(format!("stop bits in {s:?} must be 1 or 2")),
        };
        Ok(SerialFraming {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

/// A parsed resource string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Raw serial / RS-232 port.
    Serial {
        board: u32,
        port: String,
        baud: Option<u32>,
        framing: Option<SerialFraming>,
    },
    /// GPIB device behind a controller.
    Gpib {
        board: u32,
        address: u8,
        secondary: Option<u8>,
    },
    /// LXI raw TCP socket.
    Tcp { board: u32, host: String, port: u16 },
    /// USB Test & Measurement Class device.
    Usb {
        board: u32,
        vendor_id: u16,
        product_id: u16,
        serial_number: String,
        interface: Option<u8>,
    },
    /// A locator handed unchanged to a VISA resource manager.
    Visa { locator: String },
}

impl Resource {
    /// Short bus name used in log fields.
    pub fn bus(&self) -> &'static str {
        match self {
            Resource::Serial { .. } => "ASRL",
            Resource::Gpib { .. } => "GPIB",
            Resource::Tcp { .. } => "TCPIP",
            Resource::Usb { .. } => "USB",
            Resource::Visa { .. } => "VISA",
        }
    }
}

fn invalid(resource: &str, reason: impl Into<String>) -> Error {
    Error::InvalidResource {
        resource: resource.to_string(),
        reason: reason.into(),
    }
}

/// Split `GPIB0` into (`GPIB`, 0).
fn split_board(token: &str) -> Option<(String, u32)> {
    let prefix_len = token
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(token.len());
    let (prefix, digits) = token.split_at(prefix_len);
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
        return None;
    }
    let board = if digits.is_empty() {
        0
    } else {
        digits.parse().ok()?
    };
    Some((prefix.to_ascii_uppercase(), board))
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_gpib_address(resource: &str, s: &str, what: &str) -> Result<u8> {
    match parse_number(s) {
        Some(a) if a <= u64::from(GPIB_MAX_ADDRESS) => Ok(a as u8),
        _ => Err(invalid(
            resource,
            format!("{what} {s:?} must be 0-{GPIB_MAX_ADDRESS}"),
        )),
    }
}

impl FromStr for Resource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let tokens: Vec<&str> = trimmed.split("::").collect();
        if tokens.len() < 2 || tokens.iter().any(|t| t.is_empty()) {
            return Err(invalid(s, "expected <BUS>::...::INSTR"));
        }
        let (bus, board) =
            split_board(tokens[0]).ok_or_else(|| invalid(s, "unrecognized bus prefix"))?;
        let class = tokens[tokens.len() - 1].to_ascii_uppercase();
        let fields = &tokens[1..tokens.len() - 1];

        match (bus.as_str(), class.as_str()) {
            ("ASRL", "INSTR") => {
                let port = fields
                    .first()
                    .ok_or_else(|| invalid(s, "serial resource needs a port"))?;
                if fields.len() > 3 {
                    return Err(invalid(s, "too many serial fields"));
                }
                let baud = match fields.get(1) {
                    Some(b) => Some(
                        b.parse::<u32>()
                            .ok()
                            .filter(|b| *b > 0)
                            .ok_or_else(|| invalid(s, format!("bad baud rate {b:?}")))?,
                    ),
                    None => None,
                };
                let framing = match fields.get(2) {
                    Some(f) => Some(f.parse::<SerialFraming>().map_err(|e| invalid(s, e))?),
                    None => None,
                };
                Ok(Resource::Serial {
                    board,
                    port: port.to_string(),
                    baud,
                    framing,
                })
            }
            ("GPIB", "INSTR") => {
                let (address, secondary) = match fields {
                    [addr] => (parse_gpib_address(s, addr, "address")?, None),
                    [addr, sec] => (
                        parse_gpib_address(s, addr, "address")?,
                        Some(parse_gpib_address(s, sec, "secondary address")?),
                    ),
                    _ => return Err(invalid(s, "GPIB resource needs an address")),
                };
                Ok(Resource::Gpib {
                    board,
                    address,
                    secondary,
                })
            }
            ("TCPIP", "SOCKET") => match fields {
                [host, port] => {
                    let port = port
                        .parse::<u16>()
                        .ok()
                        .filter(|p| *p > 0)
                        .ok_or_else(|| invalid(s, format!("bad port {port:?}")))?;
                    Ok(Resource::Tcp {
                        board,
                        host: host.to_string(),
                        port,
                    })
                }
                _ => Err(invalid(s, "socket resource needs <host>::<port>")),
            },
            ("USB", "INSTR") => {
                let (vid, pid, serial, iface) = match fields {
                    [v, p, sn] => (v, p, sn, None),
                    [v, p, sn, i] => (v, p, sn, Some(i)),
                    _ => return Err(invalid(s, "USB resource needs <vid>::<pid>::<serial>")),
                };
                let id = |f: &str, what: &str| -> Result<u16> {
                    parse_number(f)
                        .and_then(|v| u16::try_from(v).ok())
                        .ok_or_else(|| invalid(s, format!("bad {what} {f:?}")))
                };
                let interface = match iface {
                    Some(i) => Some(
                        parse_number(i)
                            .and_then(|v| u8::try_from(v).ok())
                            .ok_or_else(|| invalid(s, format!("bad interface {i:?}")))?,
                    ),
                    None => None,
                };
                Ok(Resource::Usb {
                    board,
                    vendor_id: id(*vid, "vendor id")?,
                    product_id: id(*pid, "product id")?,
                    serial_number: serial.to_string(),
                    interface,
                })
            }
            (_, "INSTR") => Ok(Resource::Visa {
                locator: trimmed.to_string(),
            }),
            _ => Err(invalid(s, format!("unsupported resource class {class:?}"))),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Serial {
                board,
                port,
                baud,
                framing,
            } => {
                write!(f, "ASRL{board}::{port}")?;
                if let Some(b) = baud {
                    write!(f, "::{b}")?;
                    if let Some(fr) = framing {
                        write!(f, "::{fr}")?;
                    }
                }
                write!(f, "::INSTR")
            }
            Resource::Gpib {
                board,
                address,
                secondary,
            } => match secondary {
                Some(sec) => write!(f, "GPIB{board}::{address}::{sec}::INSTR"),
                None => write!(f, "GPIB{board}::{address}::INSTR"),
            },
            Resource::Tcp { board, host, port } => write!(f, "TCPIP{board}::{host}::{port}::SOCKET"),
            Resource::Usb {
                board,
                vendor_id,
                product_id,
                serial_number,
                interface,
            } => {
                write!(
                    f,
                    "USB{board}::0x{vendor_id:04X}::0x{product_id:04X}::{serial_number}"
                )?;
                if let Some(i) = interface {
                    write!(f, "::{i}")?;
                }
                write!(f, "::INSTR")
            }
            Resource::Visa { locator } => write!(f, "{locator}"),
        }
    }
}
