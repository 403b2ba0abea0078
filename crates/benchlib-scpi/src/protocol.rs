//! SCPI command framing and response decoding.
//!
//! Commands are ASCII text terminated by a configurable line terminator
//! (default `\n`). A command is a query when its header, the first
//! whitespace-delimited token, ends in `?`. Responses are terminated the
//! same way; a response may also carry an IEEE 488.2 definite-length block
//! (`#<n><len><bytes>`) whose bytes can contain the terminator.

use bytes::{BufMut, BytesMut};

/// Default command/response terminator.
pub const DEFAULT_TERMINATOR: &[u8] = b"\n";

/// Outbound command text plus whether a response is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    expects_response: bool,
}

impl Command {
    /// Build a command, deciding query-ness from its header.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let expects_response = is_query(&text);
        Command {
            text,
            expects_response,
        }
    }

    /// Build an action command regardless of its header.
    pub fn action(text: impl Into<String>) -> Self {
        Command {
            text: text.into(),
            expects_response: false,
        }
    }

    /// Build a query regardless of its header (for dialects whose queries
    /// do not end in `?`).
    pub fn query(text: impl Into<String>) -> Self {
        Command {
            text: text.into(),
            expects_response: true,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expects_response(&self) -> bool {
        self.expects_response
    }
}

/// Extract the command header (first whitespace-delimited token).
///
/// ```
/// use benchlib_scpi::protocol::extract_header;
///
/// assert_eq!(extract_header("VOLT:OFFS 0.5"), "VOLT:OFFS");
/// assert_eq!(extract_header("  *IDN?"), "*IDN?");
/// ```
pub fn extract_header(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

/// Whether `text` is a query: its header ends in `?`.
pub fn is_query(text: &str) -> bool {
    extract_header(text).ends_with('?')
}

/// Frame command text for the wire.
///
/// Any terminator already present at the end of `text` is stripped first so
/// a command is never sent double-terminated.
pub fn encode_command(text: &str, terminator: &[u8]) -> BytesMut {
    let body = text.trim_end_matches(['\r', '\n']);
    let mut buf = BytesMut::with_capacity(body.len() + terminator.len());
    buf.put_slice(body.as_bytes());
    buf.put_slice(terminator);
    buf
}

/// Result of attempting to decode one response from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete response was decoded.
    Response {
        /// Payload without the terminator.
        payload: Vec<u8>,
        /// Number of bytes consumed from the input buffer.
        consumed: usize,
    },

    /// The buffer does not yet contain a complete response.
    Incomplete,
}

/// Length of a definite-length block header at the start of `buf`, and the
/// number of data bytes it announces.
///
/// Returns `None` when `buf` does not start with a definite-length block or
/// the header itself is not complete yet.
fn block_header(buf: &[u8]) -> Option<(usize, usize)> {
    if buf.len() < 2 || buf[0] != b'#' {
        return None;
    }
    let digits = (buf[1] as char).to_digit(10)? as usize;
    if digits == 0 || buf.len() < 2 + digits {
        return None;
    }
    let len = std::str::from_utf8(&buf[2..2 + digits]).ok()?.parse().ok()?;
    Some((2 + digits, len))
}

/// Decode one terminated response from a byte buffer.
///
/// Returns the first complete response found, or
/// [`DecodeResult::Incomplete`] if no terminator is present yet.
pub fn decode_response(buf: &[u8], terminator: &[u8]) -> DecodeResult {
    if buf.is_empty() || terminator.is_empty() {
        return DecodeResult::Incomplete;
    }

    // Skip over a definite-length block so terminator bytes inside it are
    // not mistaken for the end of the response.
    let search_from = match block_header(buf) {
        Some((header, len)) => {
            if buf.len() < header + len {
                return DecodeResult::Incomplete;
            }
            header + len
        }
        None => 0,
    };

    let term_pos = match buf[search_from..]
        .windows(terminator.len())
        .position(|w| w == terminator)
    {
        Some(pos) => search_from + pos,
        None => return DecodeResult::Incomplete,
    };

    DecodeResult::Response {
        payload: buf[..term_pos].to_vec(),
        consumed: term_pos + terminator.len(),
    }
}

/// Trim the terminator and surrounding whitespace from a payload.
pub fn trim_payload(payload: &str) -> &str {
    payload.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}
