//! A register-backed SCPI instrument for driver tests.
//!
//! [`ScpiSimulator`] behaves like a forgiving SCPI instrument: a command
//! `HEADER value` stores `value` in a register, and the query `HEADER?`
//! answers with it. It also understands `*IDN?`, `*RST`, `*CLS`, `*OPC?`
//! and `SYST:ERR?`, keeps an error queue, and can scope registers under a
//! selector header such as `INST:SEL` for multi-output supplies.
//!
//! Unlike [`MockTransport`](crate::MockTransport), the simulator does not
//! need the exact command sequence up front, so set/get round trips can be
//! tested against it directly. Queries it cannot answer produce no response
//! (the session times out) and queue error `-113`, the way a real
//! instrument does.
//!
//! # Example
//!
//! ```
//! use benchlib_test_harness::ScpiSimulator;
//!
//! let sim = ScpiSimulator::new("Agilent Technologies,E3631A,0,2.1-5.0-1.0")
//!     .with_register("OUTP", "0")
//!     .scope_header("INST:SEL");
//! let transport = sim.transport();
//! // hand `Box::new(transport)` to a Session ...
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use benchlib_core::error::{Error, Result};
use benchlib_core::transport::Transport;

use crate::wire_log::WireLog;

const NO_ERROR: &str = "+0,\"No error\"";

#[derive(Debug, Default)]
struct SimState {
    identity: String,
    defaults: HashMap<String, String>,
    registers: HashMap<String, String>,
    canned: HashMap<String, String>,
    scope_headers: Vec<String>,
    scope: Option<String>,
    errors: VecDeque<(i32, String)>,
    stall_queries: usize,
    truncate_next: Option<usize>,
    read_after_write: bool,
    output: VecDeque<u8>,
    eof_pending: bool,
    log: WireLog,
}

/// Normalize a header for register lookup: no leading colon, upper case.
fn normalize(header: &str) -> String {
    header.trim_start_matches(':').to_ascii_uppercase()
}

/// Split a line into `;`-separated commands, ignoring `;` inside quotes.
fn split_commands(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (c, quote) {
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            (';', None) => {
                out.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&line[start..]);
    out
}

impl SimState {
    fn key(&self, header: &str) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}/{header}"),
            None => header.to_string(),
        }
    }

    fn is_scope_header(&self, header: &str) -> bool {
        self.scope_headers.iter().any(|h| h == header)
    }

    fn reply(&mut self, response: &str) {
        match self.truncate_next.take() {
            Some(n) => {
                let bytes = response.as_bytes();
                self.output.extend(&bytes[..n.min(bytes.len())]);
                self.eof_pending = true;
            }
            None => {
                self.output.extend(response.as_bytes());
                self.output.push_back(b'\n');
            }
        }
    }

    fn handle(&mut self, cmd: &str) {
        let cmd = cmd.trim();
        if cmd.is_empty() {
            return;
        }
        let (header, args) = match cmd.split_once(char::is_whitespace) {
            Some((h, a)) => (h, a.trim()),
            None => (cmd, ""),
        };
        let header = normalize(header);

        if let Some(base) = header.strip_suffix('?') {
            if self.stall_queries > 0 {
                self.stall_queries -= 1;
                return;
            }
            let full = if args.is_empty() {
                header.clone()
            } else {
                format!("{header} {}", args.to_ascii_uppercase())
            };
            let response = if let Some(canned) = self.canned.get(&full) {
                Some(canned.clone())
            } else if !args.is_empty() {
                None
            } else {
                match base {
                    "*IDN" => Some(self.identity.clone()),
                    "*OPC" => Some("1".to_string()),
                    "*ESR" | "*STB" => Some("0".to_string()),
                    "SYST:ERR" | "SYSTEM:ERROR" => Some(
                        self.errors
                            .pop_front()
                            .map(|(code, msg)| format!("{code:+},\"{msg}\""))
                            .unwrap_or_else(|| NO_ERROR.to_string()),
                    ),
                    b if self.is_scope_header(b) => self.scope.clone(),
                    b => self.registers.get(&self.key(b)).cloned(),
                }
            };
            match response {
                Some(r) => self.reply(&r),
                None => self.errors.push_back((-113, "Undefined header".into())),
            }
            return;
        }

        match header.as_str() {
            "*RST" => {
                self.registers = self.defaults.clone();
                self.scope = None;
            }
            "*CLS" => self.errors.clear(),
            h if self.is_scope_header(h) => {
                self.scope = Some(args.to_string());
            }
            h if !args.is_empty() => {
                let key = self.key(h);
                self.registers.insert(key, args.to_string());
            }
            // Bare actions (*TRG, INIT, ROUT:OPEN:ALL) are accepted.
            _ => {}
        }
    }
}

/// A register-backed SCPI instrument. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScpiSimulator {
    state: Arc<Mutex<SimState>>,
}

impl ScpiSimulator {
    /// Create a simulator that answers `*IDN?` with `identity`.
    pub fn new(identity: &str) -> Self {
        let sim = ScpiSimulator::default();
        sim.lock().identity = identity.to_string();
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Preload a register; `*RST` restores this value.
    pub fn with_register(self, header: &str, value: &str) -> Self {
        {
            let mut s = self.lock();
            s.defaults.insert(normalize(header), value.to_string());
            s.registers.insert(normalize(header), value.to_string());
        }
        self
    }

    /// Preload a register scoped under a selector value (e.g. `P6V`).
    pub fn with_scoped_register(self, scope: &str, header: &str, value: &str) -> Self {
        let key = format!("{scope}/{}", normalize(header));
        {
            let mut s = self.lock();
            s.defaults.insert(key.clone(), value.to_string());
            s.registers.insert(key, value.to_string());
        }
        self
    }

    /// Treat `header` as a selector: `HEADER value` switches the scope that
    /// later registers are stored under.
    pub fn scope_header(self, header: &str) -> Self {
        self.lock().scope_headers.push(normalize(header));
        self
    }

    /// Answer `query` (exact text, case-insensitive) with `response`.
    ///
    /// Canned responses take precedence over registers.
    pub fn respond(self, query: &str, response: &str) -> Self {
        self.set_response(query, response);
        self
    }

    /// Like [`respond`](Self::respond), on a running simulator.
    pub fn set_response(&self, query: &str, response: &str) {
        let (header, args) = match query.trim().split_once(char::is_whitespace) {
            Some((h, a)) => (h, a.trim()),
            None => (query.trim(), ""),
        };
        let key = if args.is_empty() {
            normalize(header)
        } else {
            format!("{} {}", normalize(header), args.to_ascii_uppercase())
        };
        self.lock().canned.insert(key, response.to_string());
    }

    /// Make the transport report that it reads after every write.
    pub fn read_after_write(self, on: bool) -> Self {
        self.lock().read_after_write = on;
        self
    }

    /// Silently drop the response to the next query.
    pub fn stall_next_query(&self) {
        self.lock().stall_queries += 1;
    }

    /// Deliver only the first `n` bytes of the next response, then report
    /// end-of-stream.
    pub fn truncate_next_query(&self, n: usize) {
        self.lock().truncate_next = Some(n);
    }

    /// Queue an instrument error for `SYST:ERR?`.
    pub fn push_error(&self, code: i32, message: &str) {
        self.lock().errors.push_back((code, message.to_string()));
    }

    /// Number of queued errors.
    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    /// Current value of an unscoped register.
    pub fn register(&self, header: &str) -> Option<String> {
        self.lock().registers.get(&normalize(header)).cloned()
    }

    /// Current value of a register under a selector value.
    pub fn scoped_register(&self, scope: &str, header: &str) -> Option<String> {
        self.lock()
            .registers
            .get(&format!("{scope}/{}", normalize(header)))
            .cloned()
    }

    /// Set a register on a running simulator (front-panel change).
    pub fn set_register(&self, header: &str, value: &str) {
        self.lock()
            .registers
            .insert(normalize(header), value.to_string());
    }

    /// Handle to the log of every line written to the simulator.
    pub fn wire_log(&self) -> WireLog {
        self.lock().log.clone()
    }

    /// A transport connected to this simulator.
    pub fn transport(&self) -> SimTransport {
        SimTransport {
            sim: self.clone(),
            connected: true,
        }
    }
}

/// [`Transport`] end of a [`ScpiSimulator`].
#[derive(Debug)]
pub struct SimTransport {
    sim: ScpiSimulator,
    connected: bool,
}

#[async_trait]
impl Transport for SimTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::Disconnected);
        }
        let mut s = self.sim.lock();
        s.log.record(data);
        let text = String::from_utf8_lossy(data);
        for line in text.split(['\n', '\r']) {
            for cmd in split_commands(line) {
                s.handle(cmd);
            }
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::Disconnected);
        }
        let mut s = self.sim.lock();
        if s.output.is_empty() {
            if s.eof_pending {
                s.eof_pending = false;
                return Ok(0);
            }
            return Err(Error::Timeout);
        }
        let n = s.output.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(s.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_after_write(&self) -> bool {
        self.sim.lock().read_after_write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exchange(t: &mut SimTransport, cmd: &str) -> Option<String> {
        t.send(format!("{cmd}\n").as_bytes()).await.unwrap();
        let mut buf = [0u8; 256];
        match t.receive(&mut buf, Duration::from_millis(10)).await {
            Ok(n) => Some(String::from_utf8_lossy(&buf[..n]).trim_end().to_string()),
            Err(Error::Timeout) => None,
            Err(e) => panic!("unexpected {e:?}"),
        }
    }

    #[tokio::test]
    async fn register_round_trip() {
        let sim = ScpiSimulator::new("ACME,X1,1,1");
        let mut t = sim.transport();
        assert_eq!(exchange(&mut t, "FREQ 1000").await, None);
        assert_eq!(exchange(&mut t, "freq?").await.as_deref(), Some("1000"));
        assert_eq!(exchange(&mut t, ":FREQ?").await.as_deref(), Some("1000"));
        assert_eq!(sim.register("FREQ").as_deref(), Some("1000"));
    }

    #[tokio::test]
    async fn identity_and_error_queue() {
        let sim = ScpiSimulator::new("ACME,X1,1,1");
        let mut t = sim.transport();
        assert_eq!(exchange(&mut t, "*IDN?").await.as_deref(), Some("ACME,X1,1,1"));
        assert_eq!(exchange(&mut t, "BOGUS?").await, None);
        assert_eq!(
            exchange(&mut t, "SYST:ERR?").await.as_deref(),
            Some("-113,\"Undefined header\"")
        );
        assert_eq!(exchange(&mut t, "SYST:ERR?").await.as_deref(), Some(NO_ERROR));
    }

    #[tokio::test]
    async fn scoped_registers() {
        let sim = ScpiSimulator::new("ACME,X1,1,1").scope_header("INST:SEL");
        let mut t = sim.transport();
        exchange(&mut t, "INST:SEL P6V").await;
        exchange(&mut t, "VOLT 5").await;
        exchange(&mut t, "INST:SEL P25V").await;
        exchange(&mut t, "VOLT 20").await;
        assert_eq!(exchange(&mut t, "VOLT?").await.as_deref(), Some("20"));
        assert_eq!(exchange(&mut t, "INST:SEL?").await.as_deref(), Some("P25V"));
        assert_eq!(sim.scoped_register("P6V", "VOLT").as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let sim = ScpiSimulator::new("ACME,X1,1,1").with_register("OUTP", "0");
        let mut t = sim.transport();
        exchange(&mut t, "OUTP ON").await;
        exchange(&mut t, "*RST").await;
        assert_eq!(exchange(&mut t, "OUTP?").await.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn canned_response_wins() {
        let sim = ScpiSimulator::new("ACME,X1,1,1")
            .with_register("VOLT", "1")
            .respond("VOLT?", "+5.00000000E+00")
            .respond(":MEAS:VPP? CHAN1", "+1.2E+00");
        let mut t = sim.transport();
        assert_eq!(exchange(&mut t, "VOLT?").await.as_deref(), Some("+5.00000000E+00"));
        assert_eq!(
            exchange(&mut t, ":MEAS:VPP? chan1").await.as_deref(),
            Some("+1.2E+00")
        );
    }

    #[tokio::test]
    async fn stall_and_truncate() {
        let sim = ScpiSimulator::new("ACME,X1,1,1");
        let mut t = sim.transport();
        sim.stall_next_query();
        assert_eq!(exchange(&mut t, "*IDN?").await, None);
        assert_eq!(sim.error_count(), 0);

        sim.truncate_next_query(4);
        t.send(b"*IDN?\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = t.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"ACME");
        assert_eq!(t.receive(&mut buf, Duration::from_millis(10)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn wire_log_records_lines() {
        let sim = ScpiSimulator::new("ACME,X1,1,1");
        let log = sim.wire_log();
        let mut t = sim.transport();
        exchange(&mut t, "VOLT 5").await;
        assert_eq!(log.lines(), vec!["VOLT 5"]);
    }

    #[test]
    fn split_respects_quotes() {
        assert_eq!(
            split_commands("DISP:TEXT 'a;b';*OPC?"),
            vec!["DISP:TEXT 'a;b'", "*OPC?"]
        );
    }
}
