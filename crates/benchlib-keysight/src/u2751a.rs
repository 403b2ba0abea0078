//! Keysight U2751A USB 4x8 two-wire switch matrix.
//!
//! Channels are the matrix lines: `Row1`..`Row4` (indices 0-3) followed by
//! `Col1`..`Col8` (indices 4-11). A path joins one row to one column and is
//! addressed with a three-digit channel list entry `(@RCC)`, e.g. Row1 to
//! Col2 is `(@102)`. Two rows or two columns can never be joined directly,
//! and two lines marked as sources must not be joined; both are rejected
//! with [`Error::InvalidTopology`] before anything is sent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use benchlib_core::error::{Error, Result};
use benchlib_core::parse;
use benchlib_core::{
    CapabilityGroup, ChannelMap, CommandDispatcher, DriverOptions, Instrument, InstrumentCore,
    PathCapability, Switch, Transport,
};
use benchlib_scpi::Session;

const MODELS: &[&str] = &["U2751A"];

pub const ROWS: usize = 4;
pub const COLUMNS: usize = 8;
const WIRE_MODE: u32 = 2;

/// Driver for the U2751A.
pub struct U2751a {
    core: InstrumentCore,
    sources: Mutex<HashSet<usize>>,
}

/// Fluent builder for [`U2751a`].
#[derive(Debug, Clone, Default)]
pub struct U2751aBuilder {
    options: DriverOptions,
}

impl U2751aBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Send `*RST` (all relays open) during construction.
    pub fn reset(mut self, on: bool) -> Self {
        self.options.reset = on;
        self
    }

    /// Give a matrix line a virtual name, e.g. `("Row1", "dmm_hi")`.
    pub fn alias(mut self, channel: &str, alias: &str) -> Self {
        self.options = self.options.alias(channel, alias);
        self
    }

    pub async fn build<S: CommandDispatcher + 'static>(self, session: S) -> Result<U2751a> {
        let names = (1..=ROWS)
            .map(|r| format!("Row{r}"))
            .chain((1..=COLUMNS).map(|c| format!("Col{c}")));
        let core = InstrumentCore::new(
            Arc::new(session),
            CapabilityGroup::Switch,
            ChannelMap::new(names),
        )
        .with_supported_models(MODELS);
        core.initialize(&self.options).await?;
        Ok(U2751a {
            core,
            sources: Mutex::new(HashSet::new()),
        })
    }

    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<U2751a> {
        self.build(Session::with_defaults(transport)).await
    }
}

/// One matrix line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line {
    Row(usize),
    Col(usize),
}

impl Line {
    fn from_index(index: usize) -> Line {
        if index < ROWS {
            Line::Row(index + 1)
        } else {
            Line::Col(index - ROWS + 1)
        }
    }
}

/// A validated row/column crosspoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Crosspoint {
    row: usize,
    col: usize,
}

impl Crosspoint {
    /// The `(@RCC)` channel list for this crosspoint.
    fn channel_list(&self) -> String {
        format!("(@{}{:02})", self.row, self.col)
    }
}

impl U2751a {
    pub fn builder() -> U2751aBuilder {
        U2751aBuilder::new()
    }

    fn sources(&self) -> MutexGuard<'_, HashSet<usize>> {
        self.sources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve two endpoints and classify the path between them.
    fn classify(&self, a: &str, b: &str) -> Result<(PathCapability, Option<Crosspoint>)> {
        let ia = self.core.resolve_channel(a)?;
        let ib = self.core.resolve_channel(b)?;
        let crosspoint = match (Line::from_index(ia), Line::from_index(ib)) {
            (Line::Row(row), Line::Col(col)) | (Line::Col(col), Line::Row(row)) => {
                Crosspoint { row, col }
            }
            _ => return Ok((PathCapability::Unsupported, None)),
        };
        let sources = self.sources();
        if sources.contains(&ia) && sources.contains(&ib) {
            return Ok((PathCapability::SourceConflict, Some(crosspoint)));
        }
        Ok((PathCapability::Available, Some(crosspoint)))
    }

    /// Resolve two endpoints to a crosspoint the topology can make.
    fn crosspoint(&self, a: &str, b: &str) -> Result<Crosspoint> {
        match self.classify(a, b)? {
            (PathCapability::Available, Some(crosspoint)) => Ok(crosspoint),
            (PathCapability::SourceConflict, _) => Err(Error::InvalidTopology(format!(
                "{a} and {b} are both source channels"
            ))),
            _ => Err(Error::InvalidTopology(format!(
                "{a} and {b} are on the same axis of the matrix"
            ))),
        }
    }

    async fn closed(&self, crosspoint: Crosspoint) -> Result<bool> {
        let query = format!("ROUT:CLOS? {}", crosspoint.channel_list());
        let response = self.core.dispatcher().query(&query).await?;
        parse::parse_bool(&response).map_err(|e| e.with_command(query))
    }

    /// Relay cycle counts for the eight crosspoints of one row.
    pub async fn relay_cycle_counts(&self, row: &str) -> Result<Vec<u64>> {
        let index = self.core.resolve_channel(row)?;
        let Line::Row(row_number) = Line::from_index(index) else {
            return Err(Error::InvalidParameter(format!("{row} is not a row")));
        };
        let query = format!("DIAG:REL:CYCL? (@{row_number}01:{row_number}{COLUMNS:02})");
        let response = self.core.dispatcher().query(&query).await?;
        parse::split_fields(&response)
            .into_iter()
            .map(|field| {
                parse::parse_i64(field)
                    .and_then(|n| {
                        u64::try_from(n).map_err(|_| Error::malformed(field, "negative cycle count"))
                    })
                    .map_err(|e| e.with_command(query.as_str()))
            })
            .collect()
    }
}

impl Instrument for U2751a {
    fn core(&self) -> &InstrumentCore {
        &self.core
    }

    fn as_switch(&self) -> Option<&dyn Switch> {
        Some(self)
    }
}

#[async_trait]
impl Switch for U2751a {
    fn topology(&self) -> Result<String> {
        Ok(format!("{ROWS}x{COLUMNS} matrix"))
    }

    fn wire_mode(&self, ch: usize) -> Result<u32> {
        self.core.check_index(ch)?;
        Ok(WIRE_MODE)
    }

    fn is_source_channel(&self, ch: usize) -> Result<bool> {
        self.core.check_index(ch)?;
        Ok(self.sources().contains(&ch))
    }

    fn set_source_channel(&self, ch: usize, source: bool) -> Result<()> {
        self.core.check_index(ch)?;
        let mut sources = self.sources();
        if source {
            sources.insert(ch);
        } else {
            sources.remove(&ch);
        }
        Ok(())
    }

    async fn can_connect(&self, a: &str, b: &str) -> Result<PathCapability> {
        match self.classify(a, b)? {
            (PathCapability::Available, Some(crosspoint)) => {
                if self.closed(crosspoint).await? {
                    Ok(PathCapability::Exists)
                } else {
                    Ok(PathCapability::Available)
                }
            }
            (capability, _) => Ok(capability),
        }
    }

    async fn connect(&self, a: &str, b: &str) -> Result<()> {
        let crosspoint = self.crosspoint(a, b)?;
        self.core
            .dispatcher()
            .command(&format!("ROUT:CLOS {}", crosspoint.channel_list()))
            .await?;
        debug!(a, b, channel = %crosspoint.channel_list(), "path connected");
        Ok(())
    }

    async fn disconnect(&self, a: &str, b: &str) -> Result<()> {
        let crosspoint = self.crosspoint(a, b)?;
        self.core
            .dispatcher()
            .command(&format!("ROUT:OPEN {}", crosspoint.channel_list()))
            .await?;
        debug!(a, b, channel = %crosspoint.channel_list(), "path disconnected");
        Ok(())
    }

    async fn disconnect_all(&self) -> Result<()> {
        let rows: Vec<String> = (1..=ROWS)
            .map(|r| format!("{r}01:{r}{COLUMNS:02}"))
            .collect();
        self.core
            .dispatcher()
            .command(&format!("ROUT:OPEN (@{})", rows.join(",")))
            .await
    }

    async fn is_connected(&self, a: &str, b: &str) -> Result<bool> {
        // Sources only restrict new connections; any row/column pair can be
        // queried.
        let ia = self.core.resolve_channel(a)?;
        let ib = self.core.resolve_channel(b)?;
        match (Line::from_index(ia), Line::from_index(ib)) {
            (Line::Row(row), Line::Col(col)) | (Line::Col(col), Line::Row(row)) => {
                self.closed(Crosspoint { row, col }).await
            }
            _ => Ok(false),
        }
    }

    async fn wait_for_debounce(&self, max_time: Duration) -> Result<()> {
        let response = self
            .core
            .dispatcher()
            .query_with_timeout("*OPC?", max_time)
            .await?;
        parse::parse_bool(&response).map_err(|e| e.with_command("*OPC?"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_core::ErrorKind;
    use benchlib_test_harness::{MockTransport, ScpiSimulator};
    use std::collections::HashMap;

    const IDN: &str = "Agilent Technologies,U2751A,MY50010001,A.02.02";

    async fn driver(sim: &ScpiSimulator) -> U2751a {
        U2751a::builder()
            .build_with_transport(Box::new(sim.transport()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn lines_and_topology() {
        let sim = ScpiSimulator::new(IDN);
        let sw = driver(&sim).await;
        assert_eq!(sw.channel_count(), 12);
        assert_eq!(sw.channel_names()[0], "Row1");
        assert_eq!(sw.channel_names()[11], "Col8");
        assert_eq!(sw.topology().unwrap(), "4x8 matrix");
        assert_eq!(sw.wire_mode(0).unwrap(), 2);
        assert!(matches!(sw.wire_mode(12), Err(Error::UnknownChannel(_))));
    }

    #[tokio::test]
    async fn connect_by_virtual_name() {
        let sim = ScpiSimulator::new(IDN);
        let sw = driver(&sim).await;
        let names: HashMap<String, String> = [
            ("Row1", "dmmblack"),
            ("Row2", "dmmred"),
            ("Col1", "pin1"),
            ("Col2", "pin2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        sw.set_virtual_names(&names).unwrap();

        sw.set_source_channel(0, true).unwrap();
        sw.connect("dmmblack", "pin2").await.unwrap();
        sw.connect("Col1", "Row2").await.unwrap();
        sw.disconnect("pin2", "Row1").await.unwrap();

        assert_eq!(
            sim.wire_log().lines(),
            vec![
                "*IDN?",
                "ROUT:CLOS (@102)",
                "ROUT:CLOS (@201)",
                "ROUT:OPEN (@102)"
            ]
        );
    }

    #[tokio::test]
    async fn same_axis_is_rejected_before_io() {
        let sim = ScpiSimulator::new(IDN);
        let sw = driver(&sim).await;
        let sent = sim.wire_log().len();

        let err = sw.connect("Col1", "Col2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTopology);
        let err = sw.disconnect("Row1", "Row3").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTopology);
        assert_eq!(
            sw.can_connect("Row1", "Row2").await.unwrap(),
            PathCapability::Unsupported
        );
        assert!(matches!(
            sw.connect("Row9", "Col1").await,
            Err(Error::UnknownChannel(_))
        ));

        assert_eq!(sim.wire_log().len(), sent);
        assert_eq!(sim.wire_log().count_starting_with("ROUT:CLOS"), 0);
    }

    #[tokio::test]
    async fn two_sources_never_connect() {
        let sim = ScpiSimulator::new(IDN);
        let sw = driver(&sim).await;
        sw.set_source_channel(0, true).unwrap();
        sw.set_source_channel(5, true).unwrap();
        assert!(sw.is_source_channel(5).unwrap());
        assert!(!sw.is_source_channel(6).unwrap());

        assert_eq!(
            sw.can_connect("Row1", "Col2").await.unwrap(),
            PathCapability::SourceConflict
        );
        let err = sw.connect("Row1", "Col2").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTopology(_)));

        sw.set_source_channel(5, false).unwrap();
        sw.connect("Row1", "Col2").await.unwrap();
    }

    #[tokio::test]
    async fn connection_state_comes_from_the_relays() {
        let sim = ScpiSimulator::new(IDN)
            .respond("ROUT:CLOS? (@102)", "1")
            .respond("ROUT:CLOS? (@103)", "0");
        let sw = driver(&sim).await;
        assert!(sw.is_connected("Row1", "Col2").await.unwrap());
        assert!(!sw.is_connected("Col3", "Row1").await.unwrap());
        assert!(!sw.is_connected("Col3", "Col4").await.unwrap());
        assert_eq!(
            sw.can_connect("Row1", "Col2").await.unwrap(),
            PathCapability::Exists
        );
        assert_eq!(
            sw.can_connect("Row1", "Col3").await.unwrap(),
            PathCapability::Available
        );
    }

    #[tokio::test]
    async fn disconnect_all_and_debounce() {
        let mut mock = MockTransport::new();
        mock.expect(b"*IDN?\n", format!("{IDN}\n").as_bytes());
        mock.expect_send(b"ROUT:OPEN (@101:108,201:208,301:308,401:408)\n");
        mock.expect(b"*OPC?\n", b"1\n");
        let sw = U2751a::builder()
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        sw.disconnect_all().await.unwrap();
        sw.wait_for_debounce(Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn cycle_counts_per_row() {
        let sim = ScpiSimulator::new(IDN).respond(
            "DIAG:REL:CYCL? (@201:208)",
            "+12,+0,+3,+0,+0,+0,+0,+40",
        );
        let sw = driver(&sim).await;
        assert_eq!(
            sw.relay_cycle_counts("Row2").await.unwrap(),
            vec![12, 0, 3, 0, 0, 0, 0, 40]
        );
        assert!(matches!(
            sw.relay_cycle_counts("Col1").await,
            Err(Error::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn switch_channel_view() {
        let sim = ScpiSimulator::new(IDN);
        let sw = driver(&sim).await;
        let s: &dyn Switch = &sw;
        let row1 = s.channel("Row1").unwrap();
        row1.set_source_channel(true).unwrap();
        assert!(row1.is_source_channel().unwrap());
        assert_eq!(row1.wire_mode().unwrap(), 2);
    }
}
